//! Bin tree node types.
//!
//! A bin owns a local coordinate interval `[0, size)` placed at an offset
//! inside its parent's frame, a slot array of [`Range`] placements with a
//! free-list for reuse, up to two children, and cached per-bin track state.
//! The `complemented` flag mirrors the local frame, which is what makes an
//! orientation flip of an entire subtree O(1).

use std::io::Cursor;

use crate::backend::RecordId;
use crate::codec;
use crate::error::Result;

/// Smallest span a bin may be split down to.
pub const MIN_BIN_SIZE: i64 = 4096;

/// Span of a freshly created root bin; the root grows in place if a range
/// lands beyond it.
pub const START_BIN_SIZE: i64 = 65536;

/// What a bin hangs off: the contig record (for roots) or another bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinParent {
    /// Root bin, anchored directly to a contig
    Contig(RecordId),
    /// Interior bin, nested in another bin
    Bin(RecordId),
}

/// Kind of record a range places on the coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// An aligned sequence read
    Seq,
    /// A free-text annotation
    Anno,
    /// A cached consensus fragment, dropped whenever a covered column is edited
    Consensus,
    /// A reference marker
    Reference,
    /// A record with no live placement
    Unmapped,
}

/// Orientation and pairing bits of a placement.
///
/// `comp` is the record's orientation relative to the contig; path flips
/// only affect coordinate mapping and are composed at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeFlags {
    /// Record is reverse-complement relative to the contig
    pub comp: bool,
    /// Record is one end of a read pair
    pub paired: bool,
}

/// Denormalized cache of a mate's placement, kept for fast pair rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MateInfo {
    /// Record id of the mate
    pub rec: RecordId,
    /// Mate's absolute start
    pub start: i64,
    /// Mate's absolute end
    pub end: i64,
    /// Mate's mapping quality
    pub mapq: u8,
}

/// A placement linking a bin-local interval to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Bin-local start, inclusive
    pub start: i64,
    /// Bin-local end, inclusive
    pub end: i64,
    /// Stored record this placement points at
    pub rec: RecordId,
    /// What kind of record it is
    pub kind: RangeKind,
    /// Orientation and pairing bits
    pub flags: RangeFlags,
    /// Denormalized mate cache, if paired
    pub mate: Option<MateInfo>,
}

/// Kind of cached derived statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Read depth
    Depth,
}

/// Per-bin cached track state: `absent` is no slot at all, `valid` flips to
/// false whenever a covered range is added, removed, or edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSlot {
    /// Statistic cached in this slot
    pub kind: TrackKind,
    /// Backend record holding the samples
    pub rec: RecordId,
    /// Whether the cached samples still reflect the bin's contents
    pub valid: bool,
}

/// A node of a contig's interval tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Backend record id of this bin
    pub id: RecordId,
    /// Parent anchor
    pub parent: BinParent,
    /// Offset of local 0 within the parent's local frame
    pub pos: i64,
    /// Local span size
    pub size: i64,
    /// Tight bounding box of the bin's own ranges (local, inclusive)
    pub used: Option<(i64, i64)>,
    /// Whether the local frame is mirrored relative to the parent
    pub complemented: bool,
    /// Child bins, at most two
    pub children: [Option<RecordId>; 2],
    /// Range slot array; freed slots are reused through `free`
    pub ranges: Vec<Option<Range>>,
    /// Free-list of reusable slot indices
    pub free: Vec<u32>,
    /// Count of sequence ranges held directly by this bin
    pub nseq: u32,
    /// Count of annotation ranges held directly by this bin
    pub nanno: u32,
    /// Cached track slots
    pub tracks: Vec<TrackSlot>,
}

impl Bin {
    /// Creates an empty bin covering `[0, size)` at `pos` in its parent.
    #[must_use]
    pub fn new(id: RecordId, parent: BinParent, pos: i64, size: i64) -> Self {
        Self {
            id,
            parent,
            pos,
            size,
            used: None,
            complemented: false,
            children: [None, None],
            ranges: Vec::new(),
            free: Vec::new(),
            nseq: 0,
            nanno: 0,
            tracks: Vec::new(),
        }
    }

    /// Writes a range into a free slot, reusing the free-list first.
    ///
    /// Updates the bin's own bounding box and per-kind counters.
    pub fn alloc_slot(&mut self, range: Range) -> usize {
        self.accumulate_used(range.start, range.end);
        match range.kind {
            RangeKind::Seq => self.nseq += 1,
            RangeKind::Anno => self.nanno += 1,
            _ => {}
        }
        if let Some(slot) = self.free.pop() {
            self.ranges[slot as usize] = Some(range);
            slot as usize
        } else {
            self.ranges.push(Some(range));
            self.ranges.len() - 1
        }
    }

    /// Clears a slot onto the free-list, returning the evicted range.
    ///
    /// The bin's own bounding box is recomputed from the survivors;
    /// ancestors are left to lazy recomputation by query paths.
    pub fn free_slot(&mut self, slot: usize) -> Option<Range> {
        let range = self.ranges.get_mut(slot)?.take()?;
        self.free.push(slot as u32);
        match range.kind {
            RangeKind::Seq => self.nseq = self.nseq.saturating_sub(1),
            RangeKind::Anno => self.nanno = self.nanno.saturating_sub(1),
            _ => {}
        }
        self.recompute_used();
        Some(range)
    }

    /// Grows the own-range bounding box to cover `[start, end]`.
    pub fn accumulate_used(&mut self, start: i64, end: i64) {
        self.used = match self.used {
            None => Some((start, end)),
            Some((s, e)) => Some((s.min(start), e.max(end))),
        };
    }

    /// Recomputes the own-range bounding box from scratch.
    pub fn recompute_used(&mut self) {
        self.used = None;
        let spans: Vec<(i64, i64)> = self
            .ranges
            .iter()
            .flatten()
            .map(|r| (r.start, r.end))
            .collect();
        for (start, end) in spans {
            self.accumulate_used(start, end);
        }
    }

    /// Occupied slots, in slot order.
    pub fn iter_ranges(&self) -> impl Iterator<Item = (usize, &Range)> {
        self.ranges
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (i, r)))
    }

    /// The track slot for `kind`, if one was ever computed.
    #[must_use]
    pub fn track_slot(&self, kind: TrackKind) -> Option<&TrackSlot> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Installs or revalidates the track slot for `kind`.
    pub fn set_track(&mut self, kind: TrackKind, rec: RecordId) {
        if let Some(slot) = self.tracks.iter_mut().find(|t| t.kind == kind) {
            slot.rec = rec;
            slot.valid = true;
        } else {
            self.tracks.push(TrackSlot {
                kind,
                rec,
                valid: true,
            });
        }
    }

    /// Marks every cached track stale.
    pub fn invalidate_tracks(&mut self) {
        for slot in &mut self.tracks {
            slot.valid = false;
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.id.0);
        match self.parent {
            BinParent::Contig(id) => {
                codec::put_u8(out, 0);
                codec::put_u64(out, id.0);
            }
            BinParent::Bin(id) => {
                codec::put_u8(out, 1);
                codec::put_u64(out, id.0);
            }
        }
        codec::put_i64(out, self.pos);
        codec::put_i64(out, self.size);
        match self.used {
            Some((s, e)) => {
                codec::put_bool(out, true);
                codec::put_i64(out, s);
                codec::put_i64(out, e);
            }
            None => codec::put_bool(out, false),
        }
        codec::put_bool(out, self.complemented);
        for child in &self.children {
            codec::put_u64(out, child.map_or(0, |c| c.0));
        }
        codec::put_u32(out, self.ranges.len() as u32);
        for range in &self.ranges {
            match range {
                None => codec::put_u8(out, 0),
                Some(r) => {
                    codec::put_u8(out, 1);
                    encode_range(out, r);
                }
            }
        }
        codec::put_u32(out, self.free.len() as u32);
        for slot in &self.free {
            codec::put_u32(out, *slot);
        }
        codec::put_u32(out, self.nseq);
        codec::put_u32(out, self.nanno);
        codec::put_u32(out, self.tracks.len() as u32);
        for track in &self.tracks {
            codec::put_u8(out, track_kind_tag(track.kind));
            codec::put_u64(out, track.rec.0);
            codec::put_bool(out, track.valid);
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = RecordId(codec::get_u64(cur)?);
        let parent = match codec::get_u8(cur)? {
            0 => BinParent::Contig(RecordId(codec::get_u64(cur)?)),
            _ => BinParent::Bin(RecordId(codec::get_u64(cur)?)),
        };
        let pos = codec::get_i64(cur)?;
        let size = codec::get_i64(cur)?;
        let used = if codec::get_bool(cur)? {
            Some((codec::get_i64(cur)?, codec::get_i64(cur)?))
        } else {
            None
        };
        let complemented = codec::get_bool(cur)?;
        let mut children = [None, None];
        for child in &mut children {
            let raw = codec::get_u64(cur)?;
            *child = (raw != 0).then_some(RecordId(raw));
        }
        let n_ranges = codec::get_u32(cur)? as usize;
        let mut ranges = Vec::with_capacity(n_ranges);
        for _ in 0..n_ranges {
            match codec::get_u8(cur)? {
                0 => ranges.push(None),
                _ => ranges.push(Some(decode_range(cur)?)),
            }
        }
        let n_free = codec::get_u32(cur)? as usize;
        let mut free = Vec::with_capacity(n_free);
        for _ in 0..n_free {
            free.push(codec::get_u32(cur)?);
        }
        let nseq = codec::get_u32(cur)?;
        let nanno = codec::get_u32(cur)?;
        let n_tracks = codec::get_u32(cur)? as usize;
        let mut tracks = Vec::with_capacity(n_tracks);
        for _ in 0..n_tracks {
            let kind = track_kind_from_tag(codec::get_u8(cur)?);
            let rec = RecordId(codec::get_u64(cur)?);
            let valid = codec::get_bool(cur)?;
            tracks.push(TrackSlot { kind, rec, valid });
        }
        Ok(Self {
            id,
            parent,
            pos,
            size,
            used,
            complemented,
            children,
            ranges,
            free,
            nseq,
            nanno,
            tracks,
        })
    }
}

fn encode_range(out: &mut Vec<u8>, r: &Range) {
    codec::put_i64(out, r.start);
    codec::put_i64(out, r.end);
    codec::put_u64(out, r.rec.0);
    codec::put_u8(out, range_kind_tag(r.kind));
    codec::put_bool(out, r.flags.comp);
    codec::put_bool(out, r.flags.paired);
    match &r.mate {
        Some(mate) => {
            codec::put_bool(out, true);
            codec::put_u64(out, mate.rec.0);
            codec::put_i64(out, mate.start);
            codec::put_i64(out, mate.end);
            codec::put_u8(out, mate.mapq);
        }
        None => codec::put_bool(out, false),
    }
}

fn decode_range(cur: &mut Cursor<&[u8]>) -> Result<Range> {
    let start = codec::get_i64(cur)?;
    let end = codec::get_i64(cur)?;
    let rec = RecordId(codec::get_u64(cur)?);
    let kind = range_kind_from_tag(codec::get_u8(cur)?);
    let flags = RangeFlags {
        comp: codec::get_bool(cur)?,
        paired: codec::get_bool(cur)?,
    };
    let mate = if codec::get_bool(cur)? {
        Some(MateInfo {
            rec: RecordId(codec::get_u64(cur)?),
            start: codec::get_i64(cur)?,
            end: codec::get_i64(cur)?,
            mapq: codec::get_u8(cur)?,
        })
    } else {
        None
    };
    Ok(Range {
        start,
        end,
        rec,
        kind,
        flags,
        mate,
    })
}

fn range_kind_tag(kind: RangeKind) -> u8 {
    match kind {
        RangeKind::Seq => 0,
        RangeKind::Anno => 1,
        RangeKind::Consensus => 2,
        RangeKind::Reference => 3,
        RangeKind::Unmapped => 4,
    }
}

fn range_kind_from_tag(tag: u8) -> RangeKind {
    match tag {
        1 => RangeKind::Anno,
        2 => RangeKind::Consensus,
        3 => RangeKind::Reference,
        4 => RangeKind::Unmapped,
        _ => RangeKind::Seq,
    }
}

fn track_kind_tag(kind: TrackKind) -> u8 {
    match kind {
        TrackKind::Depth => 0,
    }
}

fn track_kind_from_tag(_tag: u8) -> TrackKind {
    TrackKind::Depth
}
