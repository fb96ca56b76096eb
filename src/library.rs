//! Paired-read library records.
//!
//! A library accumulates insert-size statistics for the read pairs ingested
//! under it, bucketed by the relative orientation of the two ends. Means and
//! standard deviations are derived from running sums so updates are O(1).

use std::io::Cursor;

use crate::backend::{CacheKey, RecordId, RecordType};
use crate::cache::{Cache, Payload};
use crate::codec;
use crate::error::Result;

/// Relative orientation of a read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOrientation {
    /// Ends point at each other (the common case)
    Inward,
    /// Ends point away from each other
    Outward,
    /// Both ends on the same strand
    SameStrand,
}

impl PairOrientation {
    fn index(self) -> usize {
        match self {
            Self::Inward => 0,
            Self::Outward => 1,
            Self::SameStrand => 2,
        }
    }
}

/// Insert-size statistics for one sequencing library.
#[derive(Debug, Clone, PartialEq)]
pub struct Library {
    /// Backend record id
    pub id: RecordId,
    /// Library name
    pub name: String,
    counts: [u64; 3],
    sums: [f64; 3],
    sum_sqs: [f64; 3],
}

impl Library {
    #[must_use]
    pub fn new(id: RecordId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            counts: [0; 3],
            sums: [0.0; 3],
            sum_sqs: [0.0; 3],
        }
    }

    /// Folds one observed insert size into the statistics.
    pub fn record_insert(&mut self, orientation: PairOrientation, size: i64) {
        let i = orientation.index();
        let size = size.unsigned_abs() as f64;
        self.counts[i] += 1;
        self.sums[i] += size;
        self.sum_sqs[i] += size * size;
    }

    /// Number of pairs observed with the given orientation.
    #[must_use]
    pub fn count(&self, orientation: PairOrientation) -> u64 {
        self.counts[orientation.index()]
    }

    /// Mean insert size for the given orientation, if any pairs were seen.
    #[must_use]
    pub fn mean(&self, orientation: PairOrientation) -> Option<f64> {
        let i = orientation.index();
        (self.counts[i] > 0).then(|| self.sums[i] / self.counts[i] as f64)
    }

    /// Insert-size standard deviation for the given orientation.
    #[must_use]
    pub fn sd(&self, orientation: PairOrientation) -> Option<f64> {
        let i = orientation.index();
        if self.counts[i] < 2 {
            return None;
        }
        let n = self.counts[i] as f64;
        let mean = self.sums[i] / n;
        let var = (self.sum_sqs[i] / n - mean * mean).max(0.0);
        Some(var.sqrt())
    }

    /// The orientation with the most observed pairs, used to pick the
    /// expected insert-size model for a library.
    #[must_use]
    pub fn dominant_orientation(&self) -> PairOrientation {
        let mut best = PairOrientation::Inward;
        for o in [PairOrientation::Outward, PairOrientation::SameStrand] {
            if self.count(o) > self.count(best) {
                best = o;
            }
        }
        best
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.id.0);
        codec::put_str(out, &self.name);
        for i in 0..3 {
            codec::put_u64(out, self.counts[i]);
            codec::put_f64(out, self.sums[i]);
            codec::put_f64(out, self.sum_sqs[i]);
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = RecordId(codec::get_u64(cur)?);
        let name = codec::get_str(cur)?;
        let mut counts = [0u64; 3];
        let mut sums = [0.0f64; 3];
        let mut sum_sqs = [0.0f64; 3];
        for i in 0..3 {
            counts[i] = codec::get_u64(cur)?;
            sums[i] = codec::get_f64(cur)?;
            sum_sqs[i] = codec::get_f64(cur)?;
        }
        Ok(Self {
            id,
            name,
            counts,
            sums,
            sum_sqs,
        })
    }
}

/// Creates an empty library record.
pub fn create_library<C: Cache>(cache: &mut C, name: &str) -> Result<RecordId> {
    cache.create(
        RecordType::Library,
        Payload::Library(Library::new(RecordId(0), name)),
    )
}

/// Folds one observed pair into a stored library's statistics.
pub fn observe_pair<C: Cache>(
    cache: &mut C,
    library: RecordId,
    orientation: PairOrientation,
    insert_size: i64,
) -> Result<()> {
    let key = CacheKey::new(RecordType::Library, library);
    cache
        .make_writable(key)?
        .as_library_mut()?
        .record_insert(orientation, insert_size);
    Ok(())
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn running_stats() {
        let mut lib = Library::new(RecordId(1), "lib1");
        for size in [400, 500, 600] {
            lib.record_insert(PairOrientation::Inward, size);
        }
        lib.record_insert(PairOrientation::SameStrand, 10_000);

        assert_eq!(lib.count(PairOrientation::Inward), 3);
        assert_eq!(lib.mean(PairOrientation::Inward), Some(500.0));
        let sd = lib.sd(PairOrientation::Inward).unwrap();
        assert!((sd - 81.649_658).abs() < 1e-3);
        assert_eq!(lib.dominant_orientation(), PairOrientation::Inward);
        assert_eq!(lib.mean(PairOrientation::Outward), None);
    }

    #[test]
    fn stored_library_accumulates_across_flushes() -> Result<()> {
        use crate::backend::MemBackend;
        use crate::cache::ObjectCache;

        let mut cache = ObjectCache::new(MemBackend::new());
        let lib = create_library(&mut cache, "lib1")?;
        observe_pair(&mut cache, lib, PairOrientation::Inward, 480)?;
        observe_pair(&mut cache, lib, PairOrientation::Inward, 520)?;
        cache.flush()?;

        let key = CacheKey::new(RecordType::Library, lib);
        let stored = cache.acquire(key)?.as_library()?;
        assert_eq!(stored.count(PairOrientation::Inward), 2);
        assert_eq!(stored.mean(PairOrientation::Inward), Some(500.0));
        Ok(())
    }

    #[test]
    fn codec_round_trip() -> Result<()> {
        let mut lib = Library::new(RecordId(2), "lib2");
        lib.record_insert(PairOrientation::Outward, 123);
        let mut out = Vec::new();
        lib.encode(&mut out);
        assert_eq!(Library::decode(&mut Cursor::new(out.as_slice()))?, lib);
        Ok(())
    }
}
