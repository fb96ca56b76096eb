//! Variable-length sequence records.
//!
//! A record holds a read's name, bases, per-base confidence, clip bounds,
//! and orientation. All variable-length fields are owned growable buffers:
//! an in-place edit is a vector splice, so there are no internal offsets to
//! re-derive after a reallocation.
//!
//! Orientation is encoded in the sign of `len`: a negative length means the
//! record is stored complemented relative to its contig. Callers address
//! bases in display orientation; the record translates into storage
//! orientation internally.

use std::io::Cursor;

use crate::backend::RecordId;
use crate::codec;
use crate::error::{ContractViolation, Result};

/// Base-complement lookup table, computed at compile time.
///
/// Maps A↔T and C↔G in both cases, leaves everything else (including `N`
/// and pad bytes) untouched.
pub const COMPLEMENT: [u8; 256] = complement_table();

const fn complement_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    table[b'A' as usize] = b'T';
    table[b'T' as usize] = b'A';
    table[b'C' as usize] = b'G';
    table[b'G' as usize] = b'C';
    table[b'a' as usize] = b't';
    table[b't' as usize] = b'a';
    table[b'c' as usize] = b'g';
    table[b'g' as usize] = b'c';
    table
}

/// Log-odds floor written into the non-called lanes when a single-value
/// confidence is spliced into a four-value record.
pub const LOG_ODDS_FLOOR: i8 = -127;

/// Per-base confidence storage.
///
/// `Phred` stores one phred-scaled value per base; `LogOdds4` stores four
/// log-odds values per base, one per lane in A, C, G, T order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confidence {
    /// One phred-scaled value per base
    Phred(Vec<u8>),
    /// Four log-odds values per base (A, C, G, T lanes)
    LogOdds4(Vec<[i8; 4]>),
}

impl Confidence {
    /// Number of bases covered.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Phred(v) => v.len(),
            Self::LogOdds4(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, at: usize, value: u8, base: u8) {
        match self {
            Self::Phred(v) => v.insert(at, value),
            Self::LogOdds4(v) => {
                let mut lanes = [LOG_ODDS_FLOOR; 4];
                if let Some(idx) = base_index(base) {
                    lanes[idx] = value.min(127) as i8;
                }
                v.insert(at, lanes);
            }
        }
    }

    fn remove(&mut self, at: usize) {
        match self {
            Self::Phred(v) => {
                v.remove(at);
            }
            Self::LogOdds4(v) => {
                v.remove(at);
            }
        }
    }

    fn reverse_complement(&mut self) {
        match self {
            Self::Phred(v) => v.reverse(),
            Self::LogOdds4(v) => {
                v.reverse();
                for lanes in v.iter_mut() {
                    // A↔T and C↔G is a full lane reversal in ACGT order.
                    lanes.reverse();
                }
            }
        }
    }

    /// Bytes this confidence contributes to the packed block estimate.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Phred(v) => v.len(),
            Self::LogOdds4(v) => v.len() * 4,
        }
    }
}

/// Lane index of a called base in A, C, G, T order.
#[must_use]
pub fn base_index(base: u8) -> Option<usize> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// A single aligned read.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqRecord {
    /// Read name
    pub name: String,
    /// Optional trace file name
    pub trace_name: Option<String>,
    /// Optional alignment name
    pub alignment: Option<String>,
    /// Owning bin, set when the record is placed by `add_range`
    pub bin: Option<RecordId>,
    /// Range slot index within the owning bin
    pub slot: usize,
    /// Parent record (template / pair), if any
    pub parent: Option<RecordId>,
    /// Left soft-clip bound, 1-based inclusive, storage orientation
    pub left: i64,
    /// Right soft-clip bound, 1-based inclusive, storage orientation
    pub right: i64,
    /// Signed length; the sign encodes orientation
    pub len: i64,
    /// Base calls in storage orientation
    pub bases: Vec<u8>,
    /// Per-base confidence in storage orientation
    pub conf: Confidence,
    /// Opaque auxiliary bytes carried through unchanged
    pub aux: Vec<u8>,
}

impl SeqRecord {
    /// Unsigned length in bases.
    #[must_use]
    pub fn alen(&self) -> i64 {
        self.len.abs()
    }

    /// Whether the record is stored complemented relative to its contig.
    #[must_use]
    pub fn is_complemented(&self) -> bool {
        self.len < 0
    }

    /// Effective storage flip for a caller viewing through `flipped`.
    fn effective_flip(&self, flipped: bool) -> bool {
        flipped ^ self.is_complemented()
    }

    fn check_pos(&self, pos: i64, upper: i64) -> Result<usize> {
        if pos < 0 || pos >= upper {
            return Err(ContractViolation::PositionOutOfRange {
                pos,
                len: self.alen(),
            }
            .into());
        }
        Ok(pos as usize)
    }

    /// Returns the base at `pos` in the caller's display orientation.
    ///
    /// `flipped` is the caller's frame relative to the contig (true when the
    /// query path crossed an odd number of complemented bins); it composes
    /// with the record's stored orientation.
    pub fn get_base(&self, pos: i64, flipped: bool) -> Result<u8> {
        let pos = self.check_pos(pos, self.alen())?;
        let eff = self.effective_flip(flipped);
        let spos = if eff {
            self.alen() as usize - 1 - pos
        } else {
            pos
        };
        let base = self.bases[spos];
        Ok(if eff { COMPLEMENT[base as usize] } else { base })
    }

    /// Returns the base at `pos` together with four natural-log
    /// probabilities, one per lane in A, C, G, T order.
    ///
    /// A stored single phred value is split: the called lane receives
    /// `ln(1 - p_err)` and the rest `ln(p_err / 3)`. Stored four-value
    /// confidences are returned directly, lane-reversed when the effective
    /// orientation is flipped.
    pub fn get_base4(&self, pos: i64, flipped: bool) -> Result<(u8, [f32; 4])> {
        let base = self.get_base(pos, flipped)?;
        let eff = self.effective_flip(flipped);
        let spos = if eff {
            (self.alen() - 1 - pos) as usize
        } else {
            pos as usize
        };
        let lanes = match &self.conf {
            Confidence::Phred(values) => phred_to_log4(values[spos], base),
            Confidence::LogOdds4(values) => {
                let mut lanes = values[spos].map(f32::from);
                if eff {
                    lanes.reverse();
                }
                lanes
            }
        };
        Ok((base, lanes))
    }

    /// Inserts `base` before display position `pos` (`pos == len` appends).
    ///
    /// Clip bounds at or beyond the edit point shift right with it.
    pub fn insert_base(&mut self, pos: i64, base: u8, conf: u8, flipped: bool) -> Result<()> {
        let pos = self.check_pos(pos, self.alen() + 1)?;
        let eff = self.effective_flip(flipped);
        let spos = if eff {
            self.alen() as usize - pos
        } else {
            pos
        };
        let stored = if eff { COMPLEMENT[base as usize] } else { base };
        self.bases.insert(spos, stored);
        self.conf.insert(spos, conf, stored);
        let edit = spos as i64 + 1; // 1-based position the new base occupies
        if edit <= self.left {
            self.left += 1;
        }
        if edit <= self.right {
            self.right += 1;
        }
        self.len = if self.len < 0 {
            self.len - 1
        } else {
            self.len + 1
        };
        Ok(())
    }

    /// Removes the base at display position `pos`.
    ///
    /// Clip bounds beyond the edit point shift left with it.
    pub fn delete_base(&mut self, pos: i64, flipped: bool) -> Result<()> {
        let pos = self.check_pos(pos, self.alen())?;
        let eff = self.effective_flip(flipped);
        let spos = if eff {
            self.alen() as usize - 1 - pos
        } else {
            pos
        };
        self.bases.remove(spos);
        self.conf.remove(spos);
        let edit = spos as i64 + 1;
        if edit < self.left {
            self.left -= 1;
        }
        if edit <= self.right && self.right > 0 {
            self.right -= 1;
        }
        self.len = if self.len < 0 {
            self.len + 1
        } else {
            self.len - 1
        };
        Ok(())
    }

    /// Reverse-complements the record in place.
    ///
    /// Bases and confidences are mirrored, clip bounds are renumbered from
    /// the opposite end, and the stored orientation sign flips.
    pub fn complement(&mut self) {
        self.bases.reverse();
        for base in &mut self.bases {
            *base = COMPLEMENT[*base as usize];
        }
        self.conf.reverse_complement();
        let alen = self.alen();
        let (left, right) = (self.left, self.right);
        self.left = alen - right + 1;
        self.right = alen - left + 1;
        self.len = -self.len;
    }

    /// Approximate packed footprint, used for block rollover accounting.
    #[must_use]
    pub fn byte_estimate(&self) -> usize {
        64 + self.name.len()
            + self.trace_name.as_ref().map_or(0, String::len)
            + self.alignment.as_ref().map_or(0, String::len)
            + self.bases.len()
            + self.conf.byte_len()
            + self.aux.len()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_str(out, &self.name);
        codec::put_opt_str(out, self.trace_name.as_deref());
        codec::put_opt_str(out, self.alignment.as_deref());
        match self.bin {
            Some(bin) => {
                codec::put_bool(out, true);
                codec::put_u64(out, bin.0);
            }
            None => codec::put_bool(out, false),
        }
        codec::put_u64(out, self.slot as u64);
        match self.parent {
            Some(parent) => {
                codec::put_bool(out, true);
                codec::put_u64(out, parent.0);
            }
            None => codec::put_bool(out, false),
        }
        codec::put_i64(out, self.left);
        codec::put_i64(out, self.right);
        codec::put_i64(out, self.len);
        codec::put_bytes(out, &self.bases);
        match &self.conf {
            Confidence::Phred(values) => {
                codec::put_u8(out, 0);
                codec::put_bytes(out, values);
            }
            Confidence::LogOdds4(values) => {
                codec::put_u8(out, 1);
                codec::put_bytes(out, bytemuck::cast_slice(values));
            }
        }
        codec::put_bytes(out, &self.aux);
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let name = codec::get_str(cur)?;
        let trace_name = codec::get_opt_str(cur)?;
        let alignment = codec::get_opt_str(cur)?;
        let bin = if codec::get_bool(cur)? {
            Some(RecordId(codec::get_u64(cur)?))
        } else {
            None
        };
        let slot = codec::get_u64(cur)? as usize;
        let parent = if codec::get_bool(cur)? {
            Some(RecordId(codec::get_u64(cur)?))
        } else {
            None
        };
        let left = codec::get_i64(cur)?;
        let right = codec::get_i64(cur)?;
        let len = codec::get_i64(cur)?;
        let bases = codec::get_bytes(cur)?;
        let conf = match codec::get_u8(cur)? {
            0 => Confidence::Phred(codec::get_bytes(cur)?),
            _ => {
                let raw = codec::get_bytes(cur)?;
                let values = raw
                    .chunks_exact(4)
                    .map(|c| [c[0] as i8, c[1] as i8, c[2] as i8, c[3] as i8])
                    .collect();
                Confidence::LogOdds4(values)
            }
        };
        let aux = codec::get_bytes(cur)?;
        Ok(Self {
            name,
            trace_name,
            alignment,
            bin,
            slot,
            parent,
            left,
            right,
            len,
            bases,
            conf,
            aux,
        })
    }
}

/// Splits one phred value into four natural-log probabilities.
fn phred_to_log4(qv: u8, base: u8) -> [f32; 4] {
    let flat = (0.25f64.ln()) as f32;
    if qv == 0 {
        return [flat; 4];
    }
    let Some(called) = base_index(base) else {
        return [flat; 4];
    };
    let p_err = 10f64.powf(-f64::from(qv) / 10.0).clamp(1e-10, 0.75);
    let mut lanes = [(p_err / 3.0).ln() as f32; 4];
    lanes[called] = (1.0 - p_err).ln() as f32;
    lanes
}

#[cfg(test)]
mod testing {
    use super::*;

    fn record(bases: &[u8], conf: Confidence, len_sign: i64) -> SeqRecord {
        SeqRecord {
            name: "read1".into(),
            trace_name: None,
            alignment: None,
            bin: None,
            slot: 0,
            parent: None,
            left: 1,
            right: bases.len() as i64,
            len: len_sign * bases.len() as i64,
            bases: bases.to_vec(),
            conf,
            aux: Vec::new(),
        }
    }

    #[test]
    fn forward_access() -> Result<()> {
        let rec = record(b"ACGT", Confidence::Phred(vec![30, 30, 30, 30]), 1);
        assert_eq!(rec.get_base(0, false)?, b'A');
        assert_eq!(rec.get_base(3, false)?, b'T');
        Ok(())
    }

    #[test]
    fn complemented_access() -> Result<()> {
        // Stored complemented: display frame reads the reverse complement.
        let rec = record(b"ACGT", Confidence::Phred(vec![30; 4]), -1);
        assert_eq!(rec.get_base(0, false)?, b'A');
        assert_eq!(rec.get_base(1, false)?, b'C');
        // Viewing through a flipped frame cancels the stored flip.
        assert_eq!(rec.get_base(0, true)?, b'A');
        Ok(())
    }

    #[test]
    fn out_of_range_is_contract_violation() {
        let rec = record(b"ACGT", Confidence::Phred(vec![30; 4]), 1);
        let err = rec.get_base(4, false).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Contract(ContractViolation::PositionOutOfRange { .. })
        ));
    }

    #[test]
    fn phred_split_prefers_called_lane() -> Result<()> {
        let rec = record(b"ACGT", Confidence::Phred(vec![20; 4]), 1);
        let (base, lanes) = rec.get_base4(1, false)?;
        assert_eq!(base, b'C');
        let called = lanes[1];
        for (i, lane) in lanes.iter().enumerate() {
            if i != 1 {
                assert!(*lane < called);
            }
        }
        Ok(())
    }

    #[test]
    fn log_odds_lanes_reverse_under_flip() -> Result<()> {
        let conf = Confidence::LogOdds4(vec![[10, -5, -20, -40]]);
        let rec = record(b"A", conf, 1);
        let (_, fwd) = rec.get_base4(0, false)?;
        let (_, rev) = rec.get_base4(0, true)?;
        assert_eq!(fwd, [10.0, -5.0, -20.0, -40.0]);
        assert_eq!(rev, [-40.0, -20.0, -5.0, 10.0]);
        Ok(())
    }

    #[test]
    fn insert_then_delete_restores_bytes() -> Result<()> {
        let mut rec = record(b"ACGT", Confidence::Phred(vec![10, 20, 30, 40]), 1);
        let original = rec.clone();
        rec.insert_base(2, b'N', 5, false)?;
        assert_eq!(rec.bases, b"ACNGT");
        assert_eq!(rec.len, 5);
        rec.delete_base(2, false)?;
        assert_eq!(rec, original);
        Ok(())
    }

    #[test]
    fn insert_before_clip_shifts_bounds() -> Result<()> {
        let mut rec = record(b"ACGTACGT", Confidence::Phred(vec![30; 8]), 1);
        rec.left = 3;
        rec.right = 6;
        rec.insert_base(0, b'G', 9, false)?;
        assert_eq!((rec.left, rec.right), (4, 7));
        rec.delete_base(0, false)?;
        assert_eq!((rec.left, rec.right), (3, 6));
        Ok(())
    }

    #[test]
    fn complement_round_trip() {
        let conf = Confidence::LogOdds4(vec![[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]]);
        let mut rec = record(b"ACG", conf, 1);
        rec.left = 2;
        rec.right = 3;
        let original = rec.clone();

        rec.complement();
        assert_eq!(rec.bases, b"CGT");
        assert_eq!(rec.len, -3);
        assert_eq!((rec.left, rec.right), (1, 2));
        assert_eq!(
            rec.conf,
            Confidence::LogOdds4(vec![[12, 11, 10, 9], [8, 7, 6, 5], [4, 3, 2, 1]])
        );

        rec.complement();
        assert_eq!(rec, original);
    }

    #[test]
    fn codec_round_trip() -> Result<()> {
        let mut rec = record(b"ACGTN", Confidence::LogOdds4(vec![[1, -2, 3, -4]; 5]), -1);
        rec.trace_name = Some("read1.scf".into());
        rec.bin = Some(RecordId(9));
        rec.slot = 3;
        rec.aux = vec![0xCA, 0xFE];
        let mut out = Vec::new();
        rec.encode(&mut out);
        let decoded = SeqRecord::decode(&mut Cursor::new(out.as_slice()))?;
        assert_eq!(decoded, rec);
        Ok(())
    }
}
