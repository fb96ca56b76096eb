//! The hierarchical interval index.
//!
//! Each contig owns a binary tree of [`node::Bin`]s. A bin covers a local
//! coordinate interval placed inside its parent's frame, holds the ranges
//! that fit it and no smaller bin, and caches derived statistics per
//! subtree. Orientation flips are O(1): a bin's `complemented` flag
//! mirrors its whole frame, and [`coords::Mapper`] composes the flips on
//! the way down.

pub mod coords;
pub mod edit;
pub mod index;
pub mod node;
pub mod track;

use crate::backend::{CacheKey, RecordId, RecordType};

pub(crate) fn bin_key(id: RecordId) -> CacheKey {
    CacheKey::new(RecordType::Bin, id)
}

pub(crate) fn contig_key(id: RecordId) -> CacheKey {
    CacheKey::new(RecordType::Contig, id)
}
