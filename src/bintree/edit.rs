//! Column edits: inserting or deleting one base position across a contig.
//!
//! An edit at absolute position `pos` shifts every coordinate beyond it
//! by one. The walk descends only the root-to-leaf path containing `pos`:
//! each visited bin grows or shrinks by one, its own ranges are remapped
//! through the resized frame, the edit is forwarded into every sequence
//! whose range covers `pos`, and a whole child subtree strictly beyond
//! the edit point moves by adjusting its offset, an O(1) shift no matter
//! how much it contains.
//!
//! A failure partway leaves the tree partially shifted; there is no
//! rollback.

use crate::backend::RecordId;
use crate::bintree::coords::Mapper;
use crate::bintree::index::root_mapper;
use crate::bintree::node::RangeKind;
use crate::bintree::{bin_key, contig_key};
use crate::cache::Cache;
use crate::error::{ContractViolation, Result};
use crate::seq::block::SeqId;

#[derive(Debug, Clone, Copy)]
enum Edit {
    Insert { base: u8, conf: u8 },
    Delete,
}

impl Edit {
    fn delta(self) -> i64 {
        match self {
            Self::Insert { .. } => 1,
            Self::Delete => -1,
        }
    }
}

/// Inserts a column holding `base` before absolute position `pos`.
///
/// Every sequence covering `pos` gains the base (complemented as needed
/// for its storage orientation); everything beyond shifts right by one.
/// Cached consensus fragments covering `pos` are dropped.
pub fn insert_base<C: Cache>(
    cache: &mut C,
    contig: RecordId,
    pos: i64,
    base: u8,
    conf: u8,
) -> Result<()> {
    apply_edit(cache, contig, pos, Edit::Insert { base, conf })
}

/// Deletes the column at absolute position `pos`.
///
/// Every sequence covering `pos` loses the base, except a range already
/// down to a single column, which is skipped rather than emptied.
pub fn delete_base<C: Cache>(cache: &mut C, contig: RecordId, pos: i64) -> Result<()> {
    apply_edit(cache, contig, pos, Edit::Delete)
}

fn apply_edit<C: Cache>(cache: &mut C, contig: RecordId, pos: i64, edit: Edit) -> Result<()> {
    let (root, mapper) = root_mapper(cache, contig)?;
    if pos < 0 || pos >= mapper.size {
        return Err(ContractViolation::PositionOutOfRange {
            pos,
            len: mapper.size,
        }
        .into());
    }
    shift_bin(cache, root, mapper, pos, edit)?;

    let delta = edit.delta();
    let contig = cache.make_writable(contig_key(contig))?.as_contig_mut()?;
    if contig.end >= contig.start {
        if pos < contig.start {
            contig.start += delta;
        }
        if pos <= contig.end {
            contig.end += delta;
        }
    }
    Ok(())
}

/// Applies `edit` at absolute `pos` to one bin and recurses into the
/// single child whose span contains it.
fn shift_bin<C: Cache>(
    cache: &mut C,
    bin_id: RecordId,
    mapper: Mapper,
    pos: i64,
    edit: Edit,
) -> Result<()> {
    let delta = edit.delta();
    let (size, children, snapshot) = {
        let bin = cache.acquire(bin_key(bin_id))?.as_bin()?;
        let snapshot: Vec<_> = bin.iter_ranges().map(|(slot, r)| (slot, *r)).collect();
        (bin.size, bin.children, snapshot)
    };
    let resized = mapper.with_size(size + delta);

    // Remap own ranges through the resized frame, collecting content
    // edits to forward and consensus slots to drop.
    let mut updates: Vec<(usize, i64, i64)> = Vec::new();
    let mut drops: Vec<usize> = Vec::new();
    let mut forwards: Vec<(RecordId, i64)> = Vec::new();
    for (slot, range) in snapshot {
        let (a, b) = mapper.abs_interval(range.start, range.end);
        let covers = match edit {
            Edit::Insert { .. } => a < pos && pos <= b,
            Edit::Delete => a <= pos && pos <= b,
        };
        let (ta, tb) = if covers {
            match range.kind {
                RangeKind::Consensus => {
                    drops.push(slot);
                    continue;
                }
                _ if a == b && matches!(edit, Edit::Delete) => {
                    // A single-column range is skipped, not emptied.
                    (a, b)
                }
                kind => {
                    if kind == RangeKind::Seq {
                        let lp = mapper.local(pos);
                        let mut rp = lp - range.start;
                        if matches!(edit, Edit::Insert { .. }) && mapper.flipped {
                            rp += 1;
                        }
                        forwards.push((range.rec, rp));
                    }
                    (a, b + delta)
                }
            }
        } else if b < pos {
            (a, b)
        } else {
            (a + delta, b + delta)
        };
        let (ls, le) = resized.local_interval(ta, tb);
        if (ls, le) != (range.start, range.end) {
            updates.push((slot, ls, le));
        }
    }

    for (rec, rp) in forwards {
        let record = cache.seq_mut(SeqId(rec.0))?;
        match edit {
            Edit::Insert { base, conf } => record.insert_base(rp, base, conf, mapper.flipped)?,
            Edit::Delete => record.delete_base(rp, mapper.flipped)?,
        }
    }

    {
        let bin = cache.make_writable(bin_key(bin_id))?.as_bin_mut()?;
        bin.size += delta;
        for slot in drops {
            bin.free_slot(slot);
        }
        for (slot, ls, le) in updates {
            if let Some(range) = bin.ranges.get_mut(slot).and_then(Option::as_mut) {
                range.start = ls;
                range.end = le;
            }
        }
        bin.recompute_used();
        bin.invalidate_tracks();
    }

    // Children: one contains the edit point and recurses; the rest move
    // whole, by offset only.
    for child in children.into_iter().flatten() {
        let frame = {
            let bin = cache.acquire(bin_key(child))?.as_bin()?;
            crate::bintree::coords::Frame {
                offset: bin.pos,
                size: bin.size,
                complemented: bin.complemented,
            }
        };
        let child_mapper = mapper.child(frame);
        let (ca, cb) = child_mapper.span();
        let contains = match edit {
            Edit::Insert { .. } => ca < pos && pos <= cb,
            Edit::Delete => ca <= pos && pos <= cb,
        };
        let (ta, tb) = if contains {
            shift_bin(cache, child, child_mapper, pos, edit)?;
            (ca, cb + delta)
        } else if cb < pos {
            (ca, cb)
        } else {
            (ca + delta, cb + delta)
        };
        let new_pos = resized.local_interval(ta, tb).0;
        if new_pos != frame.offset {
            cache.make_writable(bin_key(child))?.as_bin_mut()?.pos = new_pos;
        }
    }
    Ok(())
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::backend::{MemBackend, RecordType};
    use crate::bintree::index::{add_range, query, NewRange, QueryOptions};
    use crate::bintree::node::RangeFlags;
    use crate::cache::{Cache, ObjectCache, Payload};
    use crate::contig::create_contig;
    use crate::seq::block::{SeqBlock, SeqId};
    use crate::seq::record::{Confidence, SeqRecord};
    use anyhow::Result;

    fn reference(start: i64, end: i64, rec: u64) -> NewRange {
        NewRange {
            start,
            end,
            rec: RecordId(rec),
            kind: RangeKind::Reference,
            flags: RangeFlags::default(),
            mate: None,
        }
    }

    fn sorted_query(
        cache: &mut ObjectCache<MemBackend>,
        contig: RecordId,
    ) -> Result<Vec<(i64, i64)>> {
        let hits = query(
            cache,
            contig,
            0,
            i64::MAX - 1,
            QueryOptions {
                sort_by_start: true,
                ..QueryOptions::default()
            },
        )?;
        Ok(hits.iter().map(|h| (h.start, h.end)).collect())
    }

    fn make_seq(cache: &mut ObjectCache<MemBackend>, bases: &[u8]) -> Result<SeqId> {
        let mut block = SeqBlock::new(RecordId(0));
        let slot = block.push(SeqRecord {
            name: "read1".into(),
            trace_name: None,
            alignment: None,
            bin: None,
            slot: 0,
            parent: None,
            left: 1,
            right: bases.len() as i64,
            len: bases.len() as i64,
            bases: bases.to_vec(),
            conf: Confidence::Phred(vec![30; bases.len()]),
            aux: Vec::new(),
        });
        let id = cache.create(RecordType::Seq, Payload::SeqBlock(block))?;
        Ok(SeqId::new(id, slot))
    }

    #[test]
    fn insert_shifts_following_and_grows_covering() -> Result<()> {
        // Ranges [10, 50] and [4000, 4090] in one leaf; an insert at 30
        // grows the first, shifts the second, and grows the bin by one.
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        let a = add_range(&mut cache, contig, reference(10, 50, 1))?;
        let b = add_range(&mut cache, contig, reference(4000, 4090, 2))?;
        assert_eq!(a.bin, b.bin);
        let leaf_size = cache.acquire(bin_key(a.bin))?.as_bin()?.size;
        assert_eq!(leaf_size, 4096);

        insert_base(&mut cache, contig, 30, b'A', 40)?;
        assert_eq!(sorted_query(&mut cache, contig)?, vec![(10, 51), (4001, 4091)]);
        assert_eq!(cache.acquire(bin_key(a.bin))?.as_bin()?.size, 4097);
        Ok(())
    }

    #[test]
    fn delete_reverses_insert_layout() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        add_range(&mut cache, contig, reference(10, 50, 1))?;
        add_range(&mut cache, contig, reference(4000, 4090, 2))?;
        let before = sorted_query(&mut cache, contig)?;

        insert_base(&mut cache, contig, 30, b'A', 40)?;
        delete_base(&mut cache, contig, 30)?;
        assert_eq!(sorted_query(&mut cache, contig)?, before);
        Ok(())
    }

    #[test]
    fn covering_sequences_receive_the_edit() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        let seq = make_seq(&mut cache, b"ACGTACGT")?;
        add_range(
            &mut cache,
            contig,
            NewRange {
                start: 100,
                end: 107,
                rec: RecordId(seq.0),
                kind: RangeKind::Seq,
                flags: RangeFlags::default(),
                mate: None,
            },
        )?;

        insert_base(&mut cache, contig, 102, b'T', 40)?;
        {
            let record = cache.seq(seq)?;
            assert_eq!(record.bases, b"ACTGTACGT");
            assert_eq!(record.len, 9);
        }
        assert_eq!(sorted_query(&mut cache, contig)?, vec![(100, 108)]);

        delete_base(&mut cache, contig, 102)?;
        {
            let record = cache.seq(seq)?;
            assert_eq!(record.bases, b"ACGTACGT");
            assert_eq!(record.len, 8);
        }
        assert_eq!(sorted_query(&mut cache, contig)?, vec![(100, 107)]);
        Ok(())
    }

    #[test]
    fn edits_through_a_complemented_subtree_land_in_storage_frame() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        let (root, _) = root_mapper(&mut cache, contig)?;
        cache.make_writable(bin_key(root))?.as_bin_mut()?.complemented = true;

        let seq = make_seq(&mut cache, b"ACGTACGT")?;
        add_range(
            &mut cache,
            contig,
            NewRange {
                start: 100,
                end: 107,
                rec: RecordId(seq.0),
                kind: RangeKind::Seq,
                flags: RangeFlags::default(),
                mate: None,
            },
        )?;
        let before = sorted_query(&mut cache, contig)?;
        assert_eq!(before, vec![(100, 107)]);

        // The column base arrives in contig orientation; through the flip
        // it is stored complemented, at the mirrored offset.
        insert_base(&mut cache, contig, 102, b'T', 40)?;
        {
            let record = cache.seq(seq)?;
            assert_eq!(record.bases, b"ACAGTACGT");
            assert_eq!(record.len, 9);
        }
        assert_eq!(sorted_query(&mut cache, contig)?, vec![(100, 108)]);
        assert_eq!(crate::seq::store::get_base(&mut cache, seq, 6, true)?, b'T');

        delete_base(&mut cache, contig, 102)?;
        {
            let record = cache.seq(seq)?;
            assert_eq!(record.bases, b"ACGTACGT");
            assert_eq!(record.len, 8);
        }
        assert_eq!(sorted_query(&mut cache, contig)?, before);
        Ok(())
    }

    #[test]
    fn edit_before_a_sequence_shifts_without_touching_it() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        let seq = make_seq(&mut cache, b"ACGT")?;
        add_range(
            &mut cache,
            contig,
            NewRange {
                start: 200,
                end: 203,
                rec: RecordId(seq.0),
                kind: RangeKind::Seq,
                flags: RangeFlags::default(),
                mate: None,
            },
        )?;

        insert_base(&mut cache, contig, 50, b'G', 40)?;
        assert_eq!(cache.seq(seq)?.bases, b"ACGT");
        assert_eq!(sorted_query(&mut cache, contig)?, vec![(201, 204)]);
        Ok(())
    }

    #[test]
    fn consensus_covering_the_edit_is_dropped() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        add_range(
            &mut cache,
            contig,
            NewRange {
                start: 10,
                end: 60,
                rec: RecordId(77),
                kind: RangeKind::Consensus,
                flags: RangeFlags::default(),
                mate: None,
            },
        )?;
        add_range(&mut cache, contig, reference(100, 140, 1))?;

        insert_base(&mut cache, contig, 30, b'C', 40)?;
        let spans = sorted_query(&mut cache, contig)?;
        assert_eq!(spans, vec![(101, 141)]);
        Ok(())
    }

    #[test]
    fn delete_skips_single_column_ranges() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        add_range(&mut cache, contig, reference(20, 20, 1))?;
        delete_base(&mut cache, contig, 20)?;
        let spans = sorted_query(&mut cache, contig)?;
        assert_eq!(spans, vec![(20, 20)]);
        Ok(())
    }

    #[test]
    fn out_of_range_edit_is_a_contract_violation() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let contig = create_contig(&mut cache, "ctgB")?;
        let (_, mapper) = root_mapper(&mut cache, contig)?;
        assert!(insert_base(&mut cache, contig, mapper.size, b'A', 40).is_err());
        assert!(delete_base(&mut cache, contig, -1).is_err());
        Ok(())
    }
}
