use crate::backend::{CacheKey, LockMode, RecordType};

/// Custom Result type for asmstore operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the asmstore library, encompassing all failure
/// classes that can occur while operating the store.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// I/O or lock-contention failures reported by the storage backend
    Backend(#[from] BackendError),
    /// A runtime invariant was found false, indicating a prior bug
    Consistency(#[from] ConsistencyViolation),
    /// Programmer error detected defensively at an API boundary
    Contract(#[from] ContractViolation),
    /// Standard I/O errors from the Rust standard library
    Io(#[from] std::io::Error),
    /// UTF-8 decoding errors while reading string fields from a payload
    Utf8(#[from] std::str::Utf8Error),
    /// Generic errors that can occur in any part of the system
    Anyhow(#[from] anyhow::Error),
}

/// Failures reported by the storage backend.
///
/// These are always surfaced to the caller and never silently retried; lock
/// denial in particular models cross-process contention and is a decision for
/// the caller, not the cache.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// No record exists under the requested key
    #[error("record not found: {0:?}")]
    NotFound(CacheKey),

    /// The backend refused to grant a stronger lock on the record
    #[error("lock upgrade to {requested:?} denied for {key:?}")]
    LockDenied {
        /// Key of the record whose lock upgrade was refused
        key: CacheKey,
        /// The lock mode that was requested
        requested: LockMode,
    },

    /// A write was rejected by the backend
    #[error("write rejected for {0:?}: {1}")]
    WriteRejected(CacheKey, String),

    /// A stored payload could not be decoded
    #[error("corrupt payload for {0:?}: {1}")]
    Corrupt(CacheKey, String),
}

/// An invariant was found false at runtime.
///
/// These indicate a prior bug rather than a recoverable condition: they are
/// logged at `error!` level and the operation that discovered them aborts.
#[derive(thiserror::Error, Debug)]
pub enum ConsistencyViolation {
    /// A cached item held a payload of the wrong kind for its type tag
    #[error("payload kind mismatch: expected {expected}, found {found}")]
    PayloadKind {
        /// Payload kind expected by the caller
        expected: &'static str,
        /// Payload kind actually resident
        found: &'static str,
    },

    /// A range slot and its sequence record disagree about ownership
    #[error(
        "back-pointer mismatch: bin {bin} slot {slot} references record {referenced}, \
         but the record claims slot {claimed}"
    )]
    RangeBackPointer {
        /// Record id of the owning bin
        bin: u64,
        /// Slot index scanned in the bin's range array
        slot: usize,
        /// Record id stored in the range slot
        referenced: u64,
        /// Slot index stored in the sequence record
        claimed: usize,
    },

    /// A child bin's span does not lie within its parent's local span
    #[error("bin {child} (local [{start}, {end}]) escapes its parent {parent} of size {size}")]
    ChildOutOfSpan {
        /// Record id of the child bin
        child: u64,
        /// Record id of the parent bin
        parent: u64,
        /// Child's local start within the parent
        start: i64,
        /// Child's local end within the parent
        end: i64,
        /// Parent's local span size
        size: i64,
    },

    /// A sequence id resolved to a vacant or shadowed slot in its block
    #[error("sequence {0} points at an unoccupied block slot")]
    DanglingSeq(u64),

    /// An unmerged copy-on-write slot reached the persistence path
    #[error("block {0} still holds shadowed slots at encode time")]
    ShadowedSlot(u64),

    /// `close` was called while dirty items were still resident
    #[error("{0} dirty item(s) resident at cache close")]
    DirtyAtClose(usize),

    /// The backend allocated the global name registry off its well-known id
    #[error("name registry allocated as record {0}, not the well-known id 1")]
    MisallocatedRegistry(u64),
}

/// Programmer error, checked defensively and reported rather than corrected.
#[derive(thiserror::Error, Debug)]
pub enum ContractViolation {
    /// A base position fell outside the record it addresses
    #[error("position {pos} out of range for record of length {len}")]
    PositionOutOfRange {
        /// The offending position (display orientation)
        pos: i64,
        /// Length of the record being addressed
        len: i64,
    },

    /// `release` was called on an item whose reference count is already zero
    #[error("release without matching retain for {0:?}")]
    UnbalancedRelease(CacheKey),

    /// A mutation was attempted through a handle that is still read-only
    #[error("write attempted through a read-only handle: {0:?}")]
    ReadOnlyWrite(CacheKey),

    /// `resize` was called on a payload kind with no variable-length body
    #[error("resize is not applicable to a {0} payload")]
    NotResizable(&'static str),

    /// An unlink was requested for a record that has no live placement
    #[error("record {0} has no placement to remove")]
    NotPlaced(u64),

    /// An operation expected a record of one type but was handed another
    #[error("operation on {key:?} expected a {expected:?} record")]
    WrongRecordType {
        /// Key actually supplied
        key: CacheKey,
        /// Record type the operation requires
        expected: RecordType,
    },
}
