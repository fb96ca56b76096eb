//! Free-text annotation records.
//!
//! Annotations anchor arbitrary notes in the bin tree: they are placed with
//! `add_range` like sequences and removed with `remove_item`, so display and
//! editing code treats them uniformly with reads.

use std::io::Cursor;

use crate::backend::RecordId;
use crate::codec;
use crate::error::Result;

/// A note anchored on the coordinate axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Backend record id
    pub id: RecordId,
    /// Owning bin, set when the annotation is placed
    pub bin: Option<RecordId>,
    /// The record this annotation describes (a sequence or contig), if any
    pub target: Option<RecordId>,
    /// Caller-defined annotation kind code
    pub kind: u32,
    /// The annotation body
    pub text: String,
}

impl Annotation {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.id.0);
        codec::put_u64(out, self.bin.map_or(0, |b| b.0));
        codec::put_u64(out, self.target.map_or(0, |t| t.0));
        codec::put_u32(out, self.kind);
        codec::put_str(out, &self.text);
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = RecordId(codec::get_u64(cur)?);
        let bin = codec::get_u64(cur)?;
        let target = codec::get_u64(cur)?;
        Ok(Self {
            id,
            bin: (bin != 0).then_some(RecordId(bin)),
            target: (target != 0).then_some(RecordId(target)),
            kind: codec::get_u32(cur)?,
            text: codec::get_str(cur)?,
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn codec_round_trip() -> Result<()> {
        let anno = Annotation {
            id: RecordId(4),
            bin: Some(RecordId(2)),
            target: None,
            kind: u32::from_be_bytes(*b"COMM"),
            text: "suspicious join".into(),
        };
        let mut out = Vec::new();
        anno.encode(&mut out);
        assert_eq!(Annotation::decode(&mut Cursor::new(out.as_slice()))?, anno);
        Ok(())
    }
}
