//! Cached per-bin depth tracks.
//!
//! A track is a derived statistic sampled across a bin's local frame at
//! the bin's natural resolution, one value per [`natural_bpv`] positions,
//! covering the whole subtree below the bin. Tracks are computed on first
//! demand, persisted as their own records, and invalidated (not deleted)
//! whenever a covered range is added, removed, or edited.
//!
//! Queries resample: box filtering when cached data is finer than asked
//! for, linear interpolation when a leaf's cache is all there is and it
//! is coarser than asked for.

use std::io::Cursor;

use crate::backend::{CacheKey, RecordId, RecordType};
use crate::bintree::bin_key;
use crate::bintree::coords::{Frame, Mapper};
use crate::bintree::index::root_mapper;
use crate::bintree::node::{Range, RangeKind, TrackKind};
use crate::cache::{Cache, Payload};
use crate::codec;
use crate::error::{ContractViolation, Result};

/// Samples per bin at natural resolution.
const SAMPLES_PER_BIN: i64 = 1024;

/// Natural sampling interval of a bin of the given span.
#[must_use]
pub fn natural_bpv(size: i64) -> i64 {
    (size / SAMPLES_PER_BIN).max(1)
}

/// A persisted sample vector for one bin and statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Backend record id
    pub id: RecordId,
    /// Statistic these samples summarize
    pub kind: TrackKind,
    /// Positions per sample
    pub bpv: i64,
    /// Samples across the owning bin's local frame, subtree-inclusive
    pub samples: Vec<f32>,
}

impl Track {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.id.0);
        codec::put_u8(out, match self.kind {
            TrackKind::Depth => 0,
        });
        codec::put_i64(out, self.bpv);
        codec::put_bytes(out, bytemuck::cast_slice(&self.samples));
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = RecordId(codec::get_u64(cur)?);
        let _kind_tag = codec::get_u8(cur)?;
        let bpv = codec::get_i64(cur)?;
        let raw = codec::get_bytes(cur)?;
        // pod_collect handles the alignment of the decode buffer.
        let samples: Vec<f32> = bytemuck::pod_collect_to_vec(&raw);
        Ok(Self {
            id,
            kind: TrackKind::Depth,
            bpv,
            samples,
        })
    }
}

fn track_key(id: RecordId) -> CacheKey {
    CacheKey::new(RecordType::Track, id)
}

/// Average of piecewise-constant `src` (`src_bpv` positions per sample)
/// over the half-open window `[from, to)` in the same local frame.
fn box_average(src: &[f32], src_bpv: i64, from: i64, to: i64) -> f32 {
    if to <= from || src.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f64;
    let first = (from / src_bpv).max(0);
    let last = ((to - 1) / src_bpv).min(src.len() as i64 - 1);
    for i in first..=last {
        let (sa, sb) = (i * src_bpv, (i + 1) * src_bpv);
        let overlap = (sb.min(to) - sa.max(from)).max(0);
        sum += f64::from(src[i as usize]) * overlap as f64;
    }
    (sum / (to - from) as f64) as f32
}

/// Linear interpolation of `src` at local position `pos`, with sample
/// values anchored at sample centers.
fn lerp_at(src: &[f32], src_bpv: i64, pos: f64) -> f32 {
    if src.is_empty() {
        return 0.0;
    }
    let x = pos / src_bpv as f64 - 0.5;
    if x <= 0.0 {
        return src[0];
    }
    let i = x.floor() as usize;
    if i + 1 >= src.len() {
        return src[src.len() - 1];
    }
    let t = (x - i as f64) as f32;
    src[i] * (1.0 - t) + src[i + 1] * t
}

/// Depth contribution of a bin's own ranges over one local window.
fn own_coverage(ranges: &[Range], from: i64, to: i64) -> f32 {
    let mut covered = 0i64;
    for range in ranges {
        if range.kind != RangeKind::Seq {
            continue;
        }
        covered += (range.end.min(to - 1) - range.start.max(from) + 1).max(0);
    }
    covered as f32 / (to - from) as f32
}

/// Returns the valid cached track record for `bin_id`, computing and
/// persisting it (and any stale descendant tracks) first if needed.
pub fn ensure_track<C: Cache>(cache: &mut C, bin_id: RecordId, kind: TrackKind) -> Result<RecordId> {
    let existing = cache
        .acquire(bin_key(bin_id))?
        .as_bin()?
        .track_slot(kind)
        .copied();
    if let Some(slot) = existing {
        if slot.valid {
            return Ok(slot.rec);
        }
    }

    let (size, samples) = compute_subtree(cache, bin_id, kind)?;
    let bpv = natural_bpv(size);
    let rec = match existing {
        Some(slot) => {
            let track = cache.make_writable(track_key(slot.rec))?.as_track_mut()?;
            track.bpv = bpv;
            track.samples = samples;
            slot.rec
        }
        None => cache.create(
            RecordType::Track,
            Payload::Track(Track {
                id: RecordId(0),
                kind,
                bpv,
                samples,
            }),
        )?,
    };
    cache
        .make_writable(bin_key(bin_id))?
        .as_bin_mut()?
        .set_track(kind, rec);
    Ok(rec)
}

/// Computes a bin's subtree-inclusive samples at its natural resolution,
/// in its own local frame.
fn compute_subtree<C: Cache>(
    cache: &mut C,
    bin_id: RecordId,
    kind: TrackKind,
) -> Result<(i64, Vec<f32>)> {
    let (size, children, ranges) = {
        let bin = cache.acquire(bin_key(bin_id))?.as_bin()?;
        let ranges: Vec<Range> = bin.iter_ranges().map(|(_, r)| *r).collect();
        (bin.size, bin.children, ranges)
    };
    let bpv = natural_bpv(size);
    let n = ((size + bpv - 1) / bpv) as usize;
    let mut samples = vec![0.0f32; n];
    for (i, sample) in samples.iter_mut().enumerate() {
        let from = i as i64 * bpv;
        *sample = own_coverage(&ranges, from, (from + bpv).min(size));
    }

    for child in children.into_iter().flatten() {
        let rec = ensure_track(cache, child, kind)?;
        let (pos, csize, comp) = {
            let bin = cache.acquire(bin_key(child))?.as_bin()?;
            (bin.pos, bin.size, bin.complemented)
        };
        let (cbpv, mut child_samples) = {
            let track = cache.acquire(track_key(rec))?.as_track()?;
            (track.bpv, track.samples.clone())
        };
        if comp {
            child_samples.reverse();
        }
        for (i, sample) in samples.iter_mut().enumerate() {
            let from = (i as i64 * bpv).max(pos);
            let to = ((i as i64 + 1) * bpv).min(pos + csize);
            if to <= from {
                continue;
            }
            let value = box_average(&child_samples, cbpv, from - pos, to - pos);
            *sample += value * (to - from) as f32 / bpv as f32;
        }
    }
    Ok((size, samples))
}

/// Returns `kind` samples over `[start, end]` at `bpv` positions per
/// sample, computing or resampling cached per-bin tracks as needed.
pub fn get_track<C: Cache>(
    cache: &mut C,
    contig: RecordId,
    start: i64,
    end: i64,
    kind: TrackKind,
    bpv: i64,
) -> Result<Vec<f32>> {
    if bpv < 1 || end < start {
        return Err(ContractViolation::PositionOutOfRange {
            pos: start,
            len: end - start + 1,
        }
        .into());
    }
    let (root, mapper) = root_mapper(cache, contig)?;
    let n = ((end - start + 1 + bpv - 1) / bpv) as usize;
    let mut out = vec![0.0f32; n];
    fill(cache, root, mapper, kind, bpv, start, &mut out)?;
    Ok(out)
}

/// Adds one bin's contribution to the output windows, serving from the
/// cached subtree track when it is at least as fine as requested and
/// descending otherwise.
fn fill<C: Cache>(
    cache: &mut C,
    bin_id: RecordId,
    mapper: Mapper,
    kind: TrackKind,
    bpv: i64,
    out_start: i64,
    out: &mut [f32],
) -> Result<()> {
    let (a, b) = mapper.span();
    let out_end = out_start + out.len() as i64 * bpv - 1;
    if b < out_start || a > out_end {
        return Ok(());
    }
    let (size, children, ranges) = {
        let bin = cache.acquire(bin_key(bin_id))?.as_bin()?;
        let ranges: Vec<Range> = bin.iter_ranges().map(|(_, r)| *r).collect();
        (bin.size, bin.children, ranges)
    };
    let natural = natural_bpv(size);

    if natural <= bpv {
        // Cached subtree data is fine enough; box filter it down.
        let rec = ensure_track(cache, bin_id, kind)?;
        let samples = cache.acquire(track_key(rec))?.as_track()?.samples.clone();
        for (i, slot) in out.iter_mut().enumerate() {
            let wa = (out_start + i as i64 * bpv).max(a);
            let wb = (out_start + (i as i64 + 1) * bpv).min(b + 1);
            if wb <= wa {
                continue;
            }
            let (la, lb) = mapper.local_interval(wa, wb - 1);
            let value = box_average(&samples, natural, la, lb + 1);
            *slot += value * (wb - wa) as f32 / bpv as f32;
        }
        return Ok(());
    }

    // Finer than this bin caches: the bin's own ranges contribute
    // exactly, children recurse.
    for (i, slot) in out.iter_mut().enumerate() {
        let wa = (out_start + i as i64 * bpv).max(a);
        let wb = (out_start + (i as i64 + 1) * bpv).min(b + 1);
        if wb <= wa {
            continue;
        }
        let (la, lb) = mapper.local_interval(wa, wb - 1);
        let value = own_coverage(&ranges, la, lb + 1);
        *slot += value * (wb - wa) as f32 / bpv as f32;
    }
    for child in children.into_iter().flatten() {
        let frame = {
            let bin = cache.acquire(bin_key(child))?.as_bin()?;
            Frame {
                offset: bin.pos,
                size: bin.size,
                complemented: bin.complemented,
            }
        };
        fill(cache, child, mapper.child(frame), kind, bpv, out_start, out)?;
    }
    Ok(())
}

/// Upsamples a leaf's cached track across `[start, end]` by linear
/// interpolation, one value per `bpv` positions.
///
/// Used by display code that prefers the smoothed cached shape over the
/// exact per-range recount that [`get_track`] performs.
pub fn upsample_track<C: Cache>(
    cache: &mut C,
    bin_id: RecordId,
    kind: TrackKind,
    start: i64,
    end: i64,
    bpv: i64,
) -> Result<Vec<f32>> {
    let rec = ensure_track(cache, bin_id, kind)?;
    let (tbpv, samples) = {
        let track = cache.acquire(track_key(rec))?.as_track()?;
        (track.bpv, track.samples.clone())
    };
    let n = ((end - start + 1 + bpv - 1) / bpv) as usize;
    let mut out = vec![0.0f32; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let center = start as f64 + (i as f64 + 0.5) * bpv as f64;
        *slot = lerp_at(&samples, tbpv, center);
    }
    Ok(out)
}
