//! The cached item envelope.

use crate::backend::{BackendHandle, LockMode};
use crate::cache::Payload;

/// One resident record: backend handle, lock mode, dirty flag, external
/// reference count, and the decoded payload.
///
/// Invariants: an item with a nonzero reference count or a set dirty flag
/// is never evicted, and dirty implies a reference count of at least one
/// (the dirty pin, taken when the item first becomes writable and dropped
/// by flush).
#[derive(Debug)]
pub(crate) struct CachedItem {
    /// Opaque backend token; meaningless inside an overlay cache, which
    /// never talks to the backend directly.
    pub handle: BackendHandle,
    /// Strongest lock granted by the backend so far
    pub lock: LockMode,
    /// Whether the payload has unpersisted modifications
    pub dirty: bool,
    /// External reference count; the sole eviction guard
    pub refs: u32,
    /// Last-access tick, for least-recently-used eviction ordering
    pub tick: u64,
    /// Decoded record body
    pub payload: Payload,
}

impl CachedItem {
    /// Whether eviction may reclaim this item.
    pub fn evictable(&self) -> bool {
        self.refs == 0 && !self.dirty
    }
}
