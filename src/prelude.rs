//! Common imports for working with the store.

pub use crate::backend::{Backend, CacheKey, LockMode, MemBackend, RecordId, RecordType};
pub use crate::bintree::edit::{delete_base, insert_base};
pub use crate::bintree::index::{add_range, query, remove_item, NewRange, Placement, QueryOptions};
pub use crate::bintree::node::{RangeFlags, RangeKind, TrackKind};
pub use crate::bintree::track::get_track;
pub use crate::cache::{Cache, ObjectCache, OverlayCache, Payload};
pub use crate::contig::{create_contig, lookup_contig, Contig};
pub use crate::error::{Error, Result};
pub use crate::library::{create_library, observe_pair, Library, PairOrientation};
pub use crate::seq::{Confidence, SeqId, SeqInit, SeqStore};
