//! Block-packed variable-length sequence storage.
//!
//! Records are grouped into blocks of up to 1024 slots, each block one
//! backend record targeting 128KiB packed, and addressed by a [`block::SeqId`]
//! that packs the block id and slot index into one integer. Bases and
//! confidences are stored in a fixed storage orientation; the signed
//! record length carries the orientation, and every accessor composes
//! the caller's view with it.

pub mod block;
pub mod record;
pub mod store;

pub use block::{SeqBlock, SeqId};
pub use record::{Confidence, SeqRecord, COMPLEMENT};
pub use store::{SeqInit, SeqStore};
