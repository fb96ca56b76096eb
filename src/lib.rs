//! An embedded object store for genome-assembly editing.
//!
//! The store keeps an assembly as typed records behind an abstract
//! locking key-value backend: contigs, hierarchical interval-tree bins,
//! block-packed sequence records, cached depth tracks, libraries, and
//! annotations. A reference-counted [`cache::ObjectCache`] mediates all
//! access; [`cache::OverlayCache`] stacks on top of it to capture an
//! editing session copy-on-write, merged down or discarded as a unit.
//!
//! Coordinates are orientation-aware throughout: any subtree can be
//! reverse-complemented in O(1) by flagging its bin, and every operation
//! composes the flips on its way down the tree.

pub mod anno;
pub mod backend;
pub mod bintree;
pub mod cache;
mod codec;
pub mod contig;
mod error;
pub mod library;
pub mod prelude;
pub mod seq;

pub use error::{BackendError, ConsistencyViolation, ContractViolation, Error, Result};

#[cfg(test)]
mod testing {
    use super::*;
    use crate::backend::{MemBackend, RecordId, RecordType};
    use crate::bintree::edit;
    use crate::bintree::index::{add_range, query, NewRange, QueryOptions};
    use crate::bintree::node::{RangeFlags, RangeKind};
    use crate::cache::{Cache, ObjectCache, OverlayCache};
    use crate::contig::{create_contig, lookup_contig};
    use crate::seq::{store, Confidence, SeqId, SeqInit, SeqStore};
    use anyhow::Result;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn seq_init(name: &str, bases: Vec<u8>, conf: Confidence, comp: bool) -> SeqInit {
        let right = bases.len() as i64;
        SeqInit {
            name: name.into(),
            trace_name: None,
            alignment: None,
            bases,
            conf,
            left: 1,
            right,
            comp,
            parent: None,
            aux: Vec::new(),
        }
    }

    fn place(
        cache: &mut ObjectCache<MemBackend>,
        contig: RecordId,
        seq: SeqId,
        start: i64,
        end: i64,
    ) -> Result<()> {
        add_range(
            cache,
            contig,
            NewRange {
                start,
                end,
                rec: RecordId(seq.0),
                kind: RangeKind::Seq,
                flags: RangeFlags::default(),
                mate: None,
            },
        )?;
        Ok(())
    }

    #[test]
    fn scenario_single_read_contig() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let mut seqs = SeqStore::new();
        let contig = create_contig(&mut cache, "ctgA")?;
        assert_eq!(lookup_contig(&mut cache, "ctgA")?, Some(contig));

        let bases = vec![b'A'; 100];
        let conf = Confidence::Phred(vec![30; 100]);
        let id = seqs.create(&mut cache, seq_init("read1", bases, conf, false))?;
        place(&mut cache, contig, id, 1, 100)?;

        let hits = query(&mut cache, contig, 1, 100, QueryOptions::default())?;
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].start, hits[0].end), (1, 100));

        let (_, mapper) = bintree::index::root_mapper(&mut cache, contig)?;
        assert!(mapper.size >= 100);
        Ok(())
    }

    #[test]
    fn round_trip_survives_flush_and_reload_in_both_encodings() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(0x5eed_1234);
        let alphabet = *b"ACGT";
        let bases: Vec<u8> = (0..300)
            .map(|_| alphabet[rng.random_range(0..4)])
            .collect();
        let phred: Vec<u8> = (0..300).map(|_| rng.random_range(0..64)).collect();
        let lods: Vec<[i8; 4]> = (0..300)
            .map(|_| {
                [
                    rng.random_range(-100..0),
                    rng.random_range(-100..0),
                    rng.random_range(-100..0),
                    rng.random_range(-100..0),
                ]
            })
            .collect();

        let mut cache = ObjectCache::with_capacity(MemBackend::new(), 2);
        let mut seqs = SeqStore::new();
        let a = seqs.create(
            &mut cache,
            seq_init("phred", bases.clone(), Confidence::Phred(phred.clone()), false),
        )?;
        let b = seqs.create(
            &mut cache,
            seq_init("lods", bases.clone(), Confidence::LogOdds4(lods.clone()), true),
        )?;
        cache.flush()?;

        // Evict the block by cycling other records through a small cache.
        for _ in 0..4 {
            let filler = cache.create(RecordType::Array, crate::cache::Payload::Array(vec![0; 4]))?;
            cache.flush()?;
            cache.acquire(crate::backend::CacheKey::new(RecordType::Array, filler))?;
        }

        {
            let record = cache.seq(a)?;
            assert_eq!(record.bases, bases);
            assert_eq!(record.conf, Confidence::Phred(phred));
            assert_eq!(record.len, 300);
        }
        {
            let record = cache.seq(b)?;
            assert!(record.is_complemented());
            assert_eq!(record.conf.len(), 300);
        }
        // The complemented record still reads forward through the flip.
        for (i, base) in bases.iter().enumerate() {
            assert_eq!(store::get_base(&mut cache, b, i as i64, false)?, *base);
        }
        let stored_lods = match &cache.seq(b)?.conf {
            Confidence::LogOdds4(values) => values.clone(),
            Confidence::Phred(_) => unreachable!("stored as log-odds"),
        };
        assert_eq!(stored_lods.len(), lods.len());
        Ok(())
    }

    #[test]
    fn back_pointers_hold_after_every_operation() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let mut seqs = SeqStore::new();
        let contig = create_contig(&mut cache, "ctgA")?;

        let a = seqs.create(&mut cache, seq_init("a", vec![b'A'; 50], Confidence::Phred(vec![20; 50]), false))?;
        let b = seqs.create(&mut cache, seq_init("b", vec![b'C'; 50], Confidence::Phred(vec![20; 50]), false))?;
        place(&mut cache, contig, a, 1, 50)?;
        place(&mut cache, contig, b, 100, 149)?;

        let check = |cache: &mut ObjectCache<MemBackend>, id: SeqId| -> Result<()> {
            let (bin_id, slot) = {
                let record = cache.seq(id)?;
                (record.bin.expect("placed"), record.slot)
            };
            let owner = cache.acquire(bintree::bin_key(bin_id))?.as_bin()?;
            let range = owner.ranges[slot].expect("occupied");
            assert_eq!(range.rec, RecordId(id.0));
            Ok(())
        };
        check(&mut cache, a)?;
        check(&mut cache, b)?;

        edit::insert_base(&mut cache, contig, 20, b'G', 40)?;
        check(&mut cache, a)?;
        check(&mut cache, b)?;
        edit::delete_base(&mut cache, contig, 20)?;
        check(&mut cache, a)?;
        check(&mut cache, b)?;

        bintree::index::remove_item(&mut cache, RecordType::Seq, RecordId(a.0))?;
        assert!(cache.seq(a)?.bin.is_none());
        check(&mut cache, b)?;
        Ok(())
    }

    #[test]
    fn insert_then_delete_restores_sequence_and_layout() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let mut seqs = SeqStore::new();
        let contig = create_contig(&mut cache, "ctgA")?;

        let mut rng = SmallRng::seed_from_u64(7);
        let alphabet = *b"ACGT";
        let bases: Vec<u8> = (0..80).map(|_| alphabet[rng.random_range(0..4)]).collect();
        let id = seqs.create(
            &mut cache,
            seq_init("r", bases.clone(), Confidence::Phred(vec![25; 80]), false),
        )?;
        place(&mut cache, contig, id, 10, 89)?;
        let before = query(&mut cache, contig, 0, 1000, QueryOptions::default())?;
        let size_before = bintree::index::root_mapper(&mut cache, contig)?.1.size;

        edit::insert_base(&mut cache, contig, 40, b'T', 40)?;
        edit::delete_base(&mut cache, contig, 40)?;

        assert_eq!(cache.seq(id)?.bases, bases);
        let after = query(&mut cache, contig, 0, 1000, QueryOptions::default())?;
        assert_eq!(
            before.iter().map(|h| (h.start, h.end)).collect::<Vec<_>>(),
            after.iter().map(|h| (h.start, h.end)).collect::<Vec<_>>()
        );
        assert_eq!(
            bintree::index::root_mapper(&mut cache, contig)?.1.size,
            size_before
        );
        Ok(())
    }

    #[test]
    fn overlay_edit_session_merges_down_as_a_unit() -> Result<()> {
        let mut base = ObjectCache::new(MemBackend::new());
        let mut seqs = SeqStore::new();
        let contig = create_contig(&mut base, "ctgA")?;
        let id = seqs.create(
            &mut base,
            seq_init("r", b"ACGTACGT".to_vec(), Confidence::Phred(vec![30; 8]), false),
        )?;
        place(&mut base, contig, id, 100, 107)?;
        base.flush()?;

        {
            let mut session = OverlayCache::new(&mut base);
            edit::insert_base(&mut session, contig, 102, b'T', 40)?;
            let hits = query(&mut session, contig, 0, 1000, QueryOptions::default())?;
            assert_eq!((hits[0].start, hits[0].end), (100, 108));
            session.flush()?;
        }
        let hits = query(&mut base, contig, 0, 1000, QueryOptions::default())?;
        assert_eq!((hits[0].start, hits[0].end), (100, 108));
        assert_eq!(base.seq(id)?.bases, b"ACTGTACGT");

        // A second session, abandoned, leaves the merged state alone.
        {
            let mut session = OverlayCache::new(&mut base);
            edit::delete_base(&mut session, contig, 102)?;
        }
        assert_eq!(base.seq(id)?.bases, b"ACTGTACGT");
        base.flush()?;
        base.close()?;
        Ok(())
    }

    #[test]
    fn four_lane_confidence_splits_phred_values() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let mut seqs = SeqStore::new();
        let id = seqs.create(
            &mut cache,
            seq_init("r", b"C".to_vec(), Confidence::Phred(vec![20]), false),
        )?;
        let (base, lanes) = store::get_base4(&mut cache, id, 0, false)?;
        assert_eq!(base, b'C');
        // Called lane carries ln(1 - p_err), the rest ln(p_err / 3).
        assert!(lanes[1] > lanes[0]);
        assert!((lanes[0] - lanes[2]).abs() < 1e-6);
        assert!((lanes[0] - lanes[3]).abs() < 1e-6);
        Ok(())
    }
}
