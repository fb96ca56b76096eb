//! Decoded record payloads.
//!
//! The cache is heterogeneous: one map holds bins, sequence blocks, contigs,
//! tracks, libraries, annotations, the global registry, and generic arrays.
//! [`Payload`] is the envelope's decoded body, with checked accessors that
//! turn a type-tag mismatch into a [`ConsistencyViolation`] instead of a
//! panic.

use std::io::Cursor;

use crate::anno::Annotation;
use crate::backend::{RecordId, RecordType};
use crate::bintree::node::Bin;
use crate::bintree::track::Track;
use crate::contig::{Contig, Registry};
use crate::error::{ConsistencyViolation, Result};
use crate::library::Library;
use crate::seq::block::SeqBlock;

/// Decoded body of one cached record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A bin-tree node
    Bin(Bin),
    /// A block of packed sequence records
    SeqBlock(SeqBlock),
    /// A contig record
    Contig(Contig),
    /// A cached track
    Track(Track),
    /// A library record
    Library(Library),
    /// An annotation record
    Anno(Annotation),
    /// The global name registry
    Registry(Registry),
    /// A generic variable-length byte array
    Array(Vec<u8>),
}

macro_rules! accessors {
    ($as_ref:ident, $as_mut:ident, $variant:ident, $ty:ty) => {
        /// Checked accessor; fails with a consistency violation on a
        /// payload-kind mismatch.
        pub fn $as_ref(&self) -> Result<&$ty> {
            match self {
                Self::$variant(inner) => Ok(inner),
                other => Err(kind_mismatch(stringify!($variant), other.kind())),
            }
        }

        /// Mutable checked accessor.
        pub fn $as_mut(&mut self) -> Result<&mut $ty> {
            match self {
                Self::$variant(inner) => Ok(inner),
                other => Err(kind_mismatch(stringify!($variant), other.kind())),
            }
        }
    };
}

impl Payload {
    accessors!(as_bin, as_bin_mut, Bin, Bin);
    accessors!(as_seq_block, as_seq_block_mut, SeqBlock, SeqBlock);
    accessors!(as_contig, as_contig_mut, Contig, Contig);
    accessors!(as_track, as_track_mut, Track, Track);
    accessors!(as_library, as_library_mut, Library, Library);
    accessors!(as_anno, as_anno_mut, Anno, Annotation);
    accessors!(as_registry, as_registry_mut, Registry, Registry);
    accessors!(as_array, as_array_mut, Array, Vec<u8>);

    /// Human-readable payload kind, used in consistency reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bin(_) => "Bin",
            Self::SeqBlock(_) => "SeqBlock",
            Self::Contig(_) => "Contig",
            Self::Track(_) => "Track",
            Self::Library(_) => "Library",
            Self::Anno(_) => "Anno",
            Self::Registry(_) => "Registry",
            Self::Array(_) => "Array",
        }
    }

    /// Record type this payload persists under.
    #[must_use]
    pub fn rtype(&self) -> RecordType {
        match self {
            Self::Bin(_) => RecordType::Bin,
            Self::SeqBlock(_) => RecordType::Seq,
            Self::Contig(_) => RecordType::Contig,
            Self::Track(_) => RecordType::Track,
            Self::Library(_) => RecordType::Library,
            Self::Anno(_) => RecordType::Anno,
            Self::Registry(_) => RecordType::Meta,
            Self::Array(_) => RecordType::Array,
        }
    }

    /// Stamps the payload's self-id after the backend assigns one.
    pub(crate) fn set_id(&mut self, id: RecordId) {
        match self {
            Self::Bin(b) => b.id = id,
            Self::SeqBlock(b) => b.id = id,
            Self::Contig(c) => c.id = id,
            Self::Track(t) => t.id = id,
            Self::Library(l) => l.id = id,
            Self::Anno(a) => a.id = id,
            Self::Registry(_) | Self::Array(_) => {}
        }
    }

    /// Structural duplicate for copy-on-write overlays.
    ///
    /// Blocks duplicate as shadows — their per-slot sub-records materialize
    /// lazily, one at a time, on their own first write. Everything else is
    /// small enough to copy eagerly.
    #[must_use]
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::SeqBlock(block) => Self::SeqBlock(block.shadow_clone()),
            other => other.clone(),
        }
    }

    /// Serializes the payload for the backend.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Bin(b) => b.encode(&mut out),
            Self::SeqBlock(b) => b.encode(&mut out)?,
            Self::Contig(c) => c.encode(&mut out),
            Self::Track(t) => t.encode(&mut out),
            Self::Library(l) => l.encode(&mut out),
            Self::Anno(a) => a.encode(&mut out),
            Self::Registry(r) => r.encode(&mut out),
            Self::Array(bytes) => out.extend_from_slice(bytes),
        }
        Ok(out)
    }

    /// Decodes a backend payload under the given type tag.
    pub fn decode(rtype: RecordType, bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        Ok(match rtype {
            RecordType::Bin => Self::Bin(Bin::decode(&mut cur)?),
            RecordType::Seq => Self::SeqBlock(SeqBlock::decode(&mut cur)?),
            RecordType::Contig => Self::Contig(Contig::decode(&mut cur)?),
            RecordType::Track => Self::Track(Track::decode(&mut cur)?),
            RecordType::Library => Self::Library(Library::decode(&mut cur)?),
            RecordType::Anno => Self::Anno(Annotation::decode(&mut cur)?),
            RecordType::Meta => Self::Registry(Registry::decode(&mut cur)?),
            RecordType::Array => Self::Array(bytes.to_vec()),
        })
    }
}

fn kind_mismatch(expected: &'static str, found: &'static str) -> crate::Error {
    let violation = ConsistencyViolation::PayloadKind { expected, found };
    log::error!("{violation}");
    violation.into()
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::bintree::node::BinParent;

    #[test]
    fn accessor_mismatch_is_consistency_violation() {
        let payload = Payload::Array(vec![1, 2, 3]);
        assert!(payload.as_bin().is_err());
        assert!(payload.as_array().is_ok());
    }

    #[test]
    fn encode_decode_dispatch() -> Result<()> {
        let bin = Bin::new(RecordId(2), BinParent::Contig(RecordId(1)), 0, 4096);
        let payload = Payload::Bin(bin);
        let bytes = payload.encode()?;
        let decoded = Payload::decode(RecordType::Bin, &bytes)?;
        assert_eq!(decoded, payload);
        Ok(())
    }
}
