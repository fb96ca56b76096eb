//! Storage backend contract.
//!
//! The store treats its persistence layer as an abstract locking key-value
//! store: every record — a sequence block, a bin, a contig, a cached track —
//! is addressed by a [`CacheKey`] and exchanged as an opaque byte payload.
//! The physical on-disk encoding is entirely the backend's business.
//!
//! The object cache is the only component that talks to the backend. It
//! loads through [`Backend::read`], persists through [`Backend::write`], and
//! escalates its access through [`Backend::upgrade`]; lock denial is the one
//! failure that models cross-process contention and it is reported, never
//! retried automatically.

mod mem;

pub use mem::MemBackend;

use auto_impl::auto_impl;

use crate::error::Result;

/// Identifier of a stored record, unique within its [`RecordType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Type tag of a stored record.
///
/// `Seq` records are *blocks* of sequences: individual reads are packed
/// 1024-to-a-block and addressed by a [`crate::seq::SeqId`] that encodes
/// block id and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// A block of packed sequence records
    Seq,
    /// A node of a contig's interval tree
    Bin,
    /// A contig: extent plus root bin reference
    Contig,
    /// A cached per-bin derived statistic
    Track,
    /// Paired-read insert-size statistics
    Library,
    /// A free-text annotation anchored in the bin tree
    Anno,
    /// The global metadata record (name registry)
    Meta,
    /// A generic variable-length byte array
    Array,
}

/// A (type tag, record id) pair uniquely identifying any stored object.
///
/// Keys order by type tag, then id, so sorted flush batches group records
/// of one type together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Type tag of the record
    pub rtype: RecordType,
    /// Identifier within the type
    pub id: RecordId,
}

impl CacheKey {
    #[must_use]
    pub fn new(rtype: RecordType, id: RecordId) -> Self {
        Self { rtype, id }
    }
}

/// Access mode held on a backend record.
///
/// The three tiers model cross-process contention at the backend boundary;
/// within one process every cache operation is single-threaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LockMode {
    /// Shared read access
    #[default]
    Read,
    /// Read-write access
    Write,
    /// Exclusive access
    Exclusive,
}

/// Opaque token minted by the backend when a record is loaded.
///
/// The cache stores it in the item envelope and hands it back on every
/// write, upgrade, and unlock; its contents mean nothing outside the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHandle(pub u64);

/// Abstract locking key-value store underneath the object cache.
#[auto_impl(&mut, Box)]
pub trait Backend {
    /// Loads a record, returning its handle and encoded payload.
    ///
    /// The record is locked [`LockMode::Read`] until upgraded or unlocked.
    fn read(&mut self, key: CacheKey) -> Result<(BackendHandle, Vec<u8>)>;

    /// Persists a record's encoded payload.
    ///
    /// Requires a handle holding at least [`LockMode::Write`].
    fn write(&mut self, key: CacheKey, handle: BackendHandle, payload: &[u8]) -> Result<()>;

    /// Allocates a fresh record of the given type, seeded with `initial`.
    fn create(&mut self, rtype: RecordType, initial: &[u8]) -> Result<RecordId>;

    /// Requests a stronger lock on a loaded record.
    ///
    /// Fails with [`crate::BackendError::LockDenied`] on contention, leaving
    /// the held lock unchanged.
    fn upgrade(&mut self, key: CacheKey, handle: BackendHandle, mode: LockMode) -> Result<()>;

    /// Releases whatever lock the handle holds.
    fn unlock(&mut self, key: CacheKey, handle: BackendHandle);

    /// Ordering hint used to sort dirty records before write-back.
    ///
    /// Flush order affects write locality only, never correctness.
    fn order_hint(&self, key: CacheKey) -> u64 {
        key.id.0
    }
}
