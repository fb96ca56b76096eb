//! Range placement and retrieval over the bin tree.
//!
//! `add_range` descends from the root to the smallest bin that wholly
//! contains the new interval, splitting bins along the way (never below
//! [`MIN_BIN_SIZE`]) and growing the root in place when a range lands
//! beyond it. `query` walks back down, pruning subtrees whose absolute
//! span misses the window and composing the coordinate transform one
//! frame at a time.

use crate::backend::{CacheKey, RecordId, RecordType};
use crate::bintree::coords::{Frame, Mapper};
use crate::bintree::node::{Bin, BinParent, MateInfo, Range, RangeFlags, RangeKind, MIN_BIN_SIZE};
use crate::bintree::{bin_key, contig_key};
use crate::cache::{Cache, Payload};
use crate::error::{ConsistencyViolation, ContractViolation, Result};
use crate::seq::block::SeqId;

/// A range to be placed, in absolute contig coordinates (inclusive).
#[derive(Debug, Clone, Copy)]
pub struct NewRange {
    /// Absolute start, inclusive
    pub start: i64,
    /// Absolute end, inclusive
    pub end: i64,
    /// Record the placement points at
    pub rec: RecordId,
    /// Kind of record
    pub kind: RangeKind,
    /// Orientation and pairing bits
    pub flags: RangeFlags,
    /// Denormalized mate cache, if already known
    pub mate: Option<MateInfo>,
}

/// Where `add_range` put a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// The owning bin
    pub bin: RecordId,
    /// Slot index within the bin's range array
    pub slot: usize,
}

/// Display-layout row assignment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// No assignment; every result reports row zero
    #[default]
    None,
    /// Everything on one row
    SingleRow,
    /// First-fit greedy packing into as few rows as needed
    Greedy,
}

/// Options for [`query`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Refresh each paired result's mate cache from the mate's actual
    /// placement when the mate also falls inside the window
    pub link_mates: bool,
    /// Row assignment policy
    pub layout: Layout,
    /// Sort results by absolute start (always on for greedy layout)
    pub sort_by_start: bool,
}

/// One query result, fully resolved to absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedRange {
    /// Absolute start, inclusive
    pub start: i64,
    /// Absolute end, inclusive
    pub end: i64,
    /// Record the placement points at
    pub rec: RecordId,
    /// Kind of record
    pub kind: RangeKind,
    /// Effective orientation: the stored flag composed with every
    /// complement on the root-to-bin path
    pub comp: bool,
    /// Whether the record is one end of a pair
    pub paired: bool,
    /// Assigned display row
    pub row: u32,
    /// Mate cache, possibly refreshed by the query
    pub mate: Option<MateInfo>,
    /// Owning bin
    pub bin: RecordId,
    /// Slot within the owning bin
    pub slot: usize,
}

fn bin_frame(pos: i64, size: i64, complemented: bool) -> Frame {
    Frame {
        offset: pos,
        size,
        complemented,
    }
}

/// Loads a contig's root and its mapper.
pub(crate) fn root_mapper<C: Cache>(
    cache: &mut C,
    contig: RecordId,
) -> Result<(RecordId, Mapper)> {
    let root = cache.acquire(contig_key(contig))?.as_contig()?.root;
    let bin = cache.acquire(bin_key(root))?.as_bin()?;
    Ok((root, Mapper::root(bin.size, bin.complemented)))
}

/// Grows the root bin in place until it spans `[0, needed)`.
///
/// In a complemented root, growth happens at the low end of the local
/// frame, so everything already placed shifts locally by the growth
/// amount to keep its absolute position fixed.
fn grow_root<C: Cache>(cache: &mut C, root: RecordId, needed: i64) -> Result<()> {
    let (old_size, complemented, children) = {
        let bin = cache.acquire(bin_key(root))?.as_bin()?;
        (bin.size, bin.complemented, bin.children)
    };
    if needed <= old_size {
        return Ok(());
    }
    let mut new_size = old_size;
    while new_size < needed {
        new_size *= 2;
    }
    let delta = new_size - old_size;
    log::debug!("growing root bin {root} from {old_size} to {new_size}");
    {
        let bin = cache.make_writable(bin_key(root))?.as_bin_mut()?;
        bin.size = new_size;
        if complemented {
            for range in bin.ranges.iter_mut().flatten() {
                range.start += delta;
                range.end += delta;
            }
            bin.recompute_used();
        }
    }
    if complemented {
        for child in children.into_iter().flatten() {
            cache.make_writable(bin_key(child))?.as_bin_mut()?.pos += delta;
        }
    }
    Ok(())
}

/// Places a range on a contig, descending to the smallest bin that wholly
/// contains it.
///
/// Bins split at their midpoint on the way down, never below
/// [`MIN_BIN_SIZE`]; a range that straddles the midpoint stays in the
/// current bin. Only the owning bin's bounding box is updated eagerly.
/// Sequence and annotation records get their back-pointers stamped, and
/// every cached track on the descent path is invalidated.
pub fn add_range<C: Cache>(cache: &mut C, contig: RecordId, range: NewRange) -> Result<Placement> {
    if range.start < 0 || range.end < range.start {
        return Err(ContractViolation::PositionOutOfRange {
            pos: range.start.min(range.end),
            len: range.end + 1,
        }
        .into());
    }
    let (root, _) = root_mapper(cache, contig)?;
    grow_root(cache, root, range.end + 1)?;
    let (_, mut mapper) = root_mapper(cache, contig)?;

    let mut cur = root;
    let mut path = vec![root];
    let placement = loop {
        let (size, children) = {
            let bin = cache.acquire(bin_key(cur))?.as_bin()?;
            (bin.size, bin.children)
        };
        let (ls, le) = mapper.local_interval(range.start, range.end);

        let mut next = None;
        for child in children.into_iter().flatten() {
            let (pos, csize, comp) = {
                let bin = cache.acquire(bin_key(child))?.as_bin()?;
                (bin.pos, bin.size, bin.complemented)
            };
            if pos < 0 || pos + csize > size {
                let violation = ConsistencyViolation::ChildOutOfSpan {
                    child: child.0,
                    parent: cur.0,
                    start: pos,
                    end: pos + csize - 1,
                    size,
                };
                log::error!("{violation}");
                return Err(violation.into());
            }
            if ls >= pos && le < pos + csize {
                next = Some((child, bin_frame(pos, csize, comp)));
                break;
            }
        }
        if next.is_none() {
            // Midpoint split, if the range fits a vacant half entirely.
            let half = size / 2;
            let vacancy = if le < half && children[0].is_none() {
                Some((0, 0, half))
            } else if ls >= half && children[1].is_none() {
                Some((1, half, size - half))
            } else {
                None
            };
            if let Some((idx, pos, csize)) = vacancy {
                if csize >= MIN_BIN_SIZE {
                    let child = cache.create(
                        RecordType::Bin,
                        Payload::Bin(Bin::new(RecordId(0), BinParent::Bin(cur), pos, csize)),
                    )?;
                    cache.make_writable(bin_key(cur))?.as_bin_mut()?.children[idx] = Some(child);
                    next = Some((child, bin_frame(pos, csize, false)));
                }
            }
        }
        match next {
            Some((child, frame)) => {
                mapper = mapper.child(frame);
                cur = child;
                path.push(child);
            }
            None => {
                let slot = cache.make_writable(bin_key(cur))?.as_bin_mut()?.alloc_slot(Range {
                    start: ls,
                    end: le,
                    rec: range.rec,
                    kind: range.kind,
                    flags: range.flags,
                    mate: range.mate,
                });
                break Placement { bin: cur, slot };
            }
        }
    };

    match range.kind {
        RangeKind::Seq => {
            let record = cache.seq_mut(SeqId(range.rec.0))?;
            record.bin = Some(placement.bin);
            record.slot = placement.slot;
        }
        RangeKind::Anno => {
            let key = CacheKey::new(RecordType::Anno, range.rec);
            cache.make_writable(key)?.as_anno_mut()?.bin = Some(placement.bin);
        }
        _ => {}
    }
    invalidate_path(cache, &path)?;

    {
        let contig = cache.make_writable(contig_key(contig))?.as_contig_mut()?;
        if contig.end < contig.start {
            contig.start = range.start;
            contig.end = range.end;
        } else {
            contig.start = contig.start.min(range.start);
            contig.end = contig.end.max(range.end);
        }
    }
    Ok(placement)
}

/// Invalidates cached tracks on every bin of `path` that has any.
pub(crate) fn invalidate_path<C: Cache>(cache: &mut C, path: &[RecordId]) -> Result<()> {
    for id in path {
        let stale = cache
            .acquire(bin_key(*id))?
            .as_bin()?
            .tracks
            .iter()
            .any(|t| t.valid);
        if stale {
            cache
                .make_writable(bin_key(*id))?
                .as_bin_mut()?
                .invalidate_tracks();
        }
    }
    Ok(())
}

/// Returns every range intersecting `[start, end]` on `contig`, in
/// absolute coordinates.
///
/// Subtrees whose span misses the window are pruned without loading their
/// ranges; a bin's own ranges are scanned only when its bounding box
/// intersects. Sparse regions yield an empty result, never a failure.
pub fn query<C: Cache>(
    cache: &mut C,
    contig: RecordId,
    start: i64,
    end: i64,
    options: QueryOptions,
) -> Result<Vec<PlacedRange>> {
    let (root, mapper) = root_mapper(cache, contig)?;
    let mut results = Vec::new();
    let mut stack = vec![(root, mapper)];
    while let Some((id, mapper)) = stack.pop() {
        let (a, b) = mapper.span();
        if b < start || a > end {
            continue;
        }
        let children = {
            let bin = cache.acquire(bin_key(id))?.as_bin()?;
            let scan = bin.used.is_some_and(|(s, e)| {
                let (ua, ub) = mapper.abs_interval(s, e);
                ub >= start && ua <= end
            });
            if scan {
                for (slot, range) in bin.iter_ranges() {
                    let (ra, rb) = mapper.abs_interval(range.start, range.end);
                    if rb < start || ra > end {
                        continue;
                    }
                    results.push(PlacedRange {
                        start: ra,
                        end: rb,
                        rec: range.rec,
                        kind: range.kind,
                        comp: range.flags.comp ^ mapper.flipped,
                        paired: range.flags.paired,
                        row: 0,
                        mate: range.mate,
                        bin: id,
                        slot,
                    });
                }
            }
            bin.children
        };
        for child in children.into_iter().flatten() {
            let frame = {
                let bin = cache.acquire(bin_key(child))?.as_bin()?;
                bin_frame(bin.pos, bin.size, bin.complemented)
            };
            stack.push((child, mapper.child(frame)));
        }
    }

    if options.sort_by_start || options.layout == Layout::Greedy {
        results.sort_unstable_by_key(|r| (r.start, r.end, r.rec.0));
    }
    if options.link_mates {
        link_mates(&mut results);
    }
    match options.layout {
        Layout::None => {}
        Layout::SingleRow => {
            for r in &mut results {
                r.row = 0;
            }
        }
        Layout::Greedy => assign_rows(&mut results, options.link_mates),
    }
    Ok(results)
}

/// Refreshes each paired result's mate cache from the mate's actual
/// placement, when the mate is also in the result set.
fn link_mates(results: &mut [PlacedRange]) {
    let placed: Vec<(u64, i64, i64)> = results.iter().map(|r| (r.rec.0, r.start, r.end)).collect();
    for r in results {
        let Some(mate) = r.mate.as_mut() else {
            continue;
        };
        if let Some((_, s, e)) = placed.iter().find(|(rec, _, _)| *rec == mate.rec.0) {
            mate.start = *s;
            mate.end = *e;
        }
    }
}

/// First-fit greedy packing; assumes `results` is sorted by start.
///
/// With mate linking on, a pair occupies the union of both footprints so
/// the two ends land on the same row.
fn assign_rows(results: &mut [PlacedRange], span_mates: bool) {
    let mut row_ends: Vec<i64> = Vec::new();
    for r in results {
        let (start, end) = match (span_mates, r.mate) {
            (true, Some(mate)) => (r.start.min(mate.start), r.end.max(mate.end)),
            _ => (r.start, r.end),
        };
        let row = row_ends.iter().position(|&last| last < start);
        match row {
            Some(row) => {
                row_ends[row] = row_ends[row].max(end);
                r.row = row as u32;
            }
            None => {
                r.row = row_ends.len() as u32;
                row_ends.push(end);
            }
        }
    }
}

/// Unlinks a record's placement from its owning bin.
///
/// The owning bin is found through the record's back-pointer and its
/// range array linear-scanned; a back-pointer that disagrees with the
/// scan is a consistency violation. The freed slot goes onto the bin's
/// free-list and cached tracks up the parent chain are invalidated.
pub fn remove_item<C: Cache>(cache: &mut C, rtype: RecordType, rec: RecordId) -> Result<()> {
    let (bin_id, claimed, kind) = match rtype {
        RecordType::Seq => {
            let record = cache.seq(SeqId(rec.0))?;
            let bin = record.bin.ok_or(ContractViolation::NotPlaced(rec.0))?;
            (bin, Some(record.slot), RangeKind::Seq)
        }
        RecordType::Anno => {
            let key = CacheKey::new(RecordType::Anno, rec);
            let anno = cache.acquire(key)?.as_anno()?;
            let bin = anno.bin.ok_or(ContractViolation::NotPlaced(rec.0))?;
            (bin, None, RangeKind::Anno)
        }
        _ => {
            return Err(ContractViolation::WrongRecordType {
                key: CacheKey::new(rtype, rec),
                expected: RecordType::Seq,
            }
            .into())
        }
    };

    // Sequence ids and other record ids are separate numeric spaces, so
    // the scan must match on kind as well as id.
    let found = cache
        .acquire(bin_key(bin_id))?
        .as_bin()?
        .iter_ranges()
        .find(|(_, r)| r.kind == kind && r.rec == rec)
        .map(|(slot, _)| slot);
    let Some(slot) = found else {
        let violation = ConsistencyViolation::RangeBackPointer {
            bin: bin_id.0,
            slot: claimed.unwrap_or(0),
            referenced: 0,
            claimed: claimed.unwrap_or(0),
        };
        log::error!("{violation}");
        return Err(violation.into());
    };
    if let Some(claimed) = claimed {
        if claimed != slot {
            let violation = ConsistencyViolation::RangeBackPointer {
                bin: bin_id.0,
                slot,
                referenced: rec.0,
                claimed,
            };
            log::error!("{violation}");
            return Err(violation.into());
        }
    }

    cache
        .make_writable(bin_key(bin_id))?
        .as_bin_mut()?
        .free_slot(slot);
    match rtype {
        RecordType::Seq => {
            let record = cache.seq_mut(SeqId(rec.0))?;
            record.bin = None;
            record.slot = 0;
        }
        RecordType::Anno => {
            let key = CacheKey::new(RecordType::Anno, rec);
            cache.make_writable(key)?.as_anno_mut()?.bin = None;
        }
        _ => {}
    }

    // Stale depth caches all the way up.
    let mut cur = bin_id;
    loop {
        invalidate_path(cache, &[cur])?;
        match cache.acquire(bin_key(cur))?.as_bin()?.parent {
            BinParent::Bin(parent) => cur = parent,
            BinParent::Contig(_) => break,
        }
    }
    Ok(())
}
