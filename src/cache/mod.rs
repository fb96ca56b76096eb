//! The object cache layer.
//!
//! Everything above the backend goes through a [`Cache`]: a typed,
//! reference-counted map from [`CacheKey`] to decoded [`Payload`]. Two
//! implementations exist. [`ObjectCache`] is the base cache, backed by
//! storage; [`OverlayCache`] stacks on any cache and captures writes
//! copy-on-write, so an editor can accumulate a contig's worth of edits
//! and either merge them down with `flush` or drop them wholesale.
//!
//! Bin-tree and sequence operations are generic over the trait, so the
//! same code path serves reads from the base store and edits inside an
//! overlay.

mod base;
mod item;
mod overlay;
mod payload;

pub use base::{ObjectCache, DEFAULT_MAX_RESIDENT};
pub use overlay::OverlayCache;
pub use payload::Payload;

use crate::backend::{CacheKey, LockMode, RecordId, RecordType};
use crate::error::{ContractViolation, Result};
use crate::seq::block::SeqId;
use crate::seq::record::SeqRecord;

/// The cache seam every store operation runs over.
pub trait Cache {
    /// Borrows the payload under `key`, loading it if necessary.
    ///
    /// Does not pin: the borrow is valid until the next cache call, and
    /// the item may be evicted any time after that.
    fn acquire(&mut self, key: CacheKey) -> Result<&Payload>;

    /// Pins `key` against eviction. Every `retain` needs a matching
    /// [`release`](Cache::release).
    fn retain(&mut self, key: CacheKey) -> Result<()>;

    /// Drops one pin on `key`.
    fn release(&mut self, key: CacheKey) -> Result<()>;

    /// Requests a stronger backend lock on `key` without dirtying it.
    fn upgrade(&mut self, key: CacheKey, mode: LockMode) -> Result<()>;

    /// Borrows the payload mutably, upgrading the lock and marking it
    /// dirty on the first write. Dirty items hold a pin until flushed.
    fn make_writable(&mut self, key: CacheKey) -> Result<&mut Payload>;

    /// Allocates a new record for `payload`, stamps its assigned id into
    /// it, and leaves it resident and dirty.
    fn create(&mut self, rtype: RecordType, payload: Payload) -> Result<RecordId>;

    /// Allocates a record id in the underlying store without keeping the
    /// record resident here. Used by overlays, whose created records must
    /// have real ids before the overlay merges down.
    fn reserve(&mut self, rtype: RecordType, initial: &[u8]) -> Result<RecordId>;

    /// Persists every dirty item and drops its dirty pin.
    fn flush(&mut self) -> Result<()>;

    /// Resolves a sequence id to its record inside the owning block.
    fn seq(&mut self, id: SeqId) -> Result<&SeqRecord>;

    /// Mutable counterpart of [`seq`](Cache::seq); dirties the block.
    fn seq_mut(&mut self, id: SeqId) -> Result<&mut SeqRecord>;

    /// Grows or truncates a variable-length array record in place.
    ///
    /// Checks the payload kind before dirtying the record, so a refused
    /// resize leaves it clean.
    fn resize(&mut self, key: CacheKey, new_len: usize) -> Result<()> {
        match self.acquire(key)? {
            Payload::Array(_) => {
                self.make_writable(key)?.as_array_mut()?.resize(new_len, 0);
                Ok(())
            }
            other => Err(ContractViolation::NotResizable(other.kind()).into()),
        }
    }
}
