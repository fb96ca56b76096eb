//! Block-based allocation for sequence records.
//!
//! Individual reads are far too small to carry their own backend record
//! each; they are packed into fixed-capacity blocks that share one backing
//! storage record, amortizing persistence overhead. A block holds up to
//! [`SLOTS_PER_BLOCK`] records and is retired from ingestion once it
//! reaches [`BLOCK_BYTE_TARGET`] estimated packed bytes.

use std::io::Cursor;

use crate::backend::RecordId;
use crate::codec;
use crate::error::{ConsistencyViolation, Result};
use crate::seq::record::SeqRecord;

/// Bits of a [`SeqId`] used for the slot index.
pub const SLOT_BITS: u32 = 10;

/// Maximum records per block.
pub const SLOTS_PER_BLOCK: usize = 1 << SLOT_BITS;

/// Estimated packed bytes after which a block stops accepting new records.
pub const BLOCK_BYTE_TARGET: usize = 128 * 1024;

/// Identifier of one sequence record: block id and slot packed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqId(pub u64);

impl SeqId {
    /// Composes a sequence id from a block record id and a slot index.
    #[must_use]
    pub fn new(block: RecordId, slot: usize) -> Self {
        Self((block.0 << SLOT_BITS) | slot as u64)
    }

    /// Record id of the containing block.
    #[must_use]
    pub fn block(self) -> RecordId {
        RecordId(self.0 >> SLOT_BITS)
    }

    /// Slot index within the block.
    #[must_use]
    pub fn slot(self) -> usize {
        (self.0 & (SLOTS_PER_BLOCK as u64 - 1)) as usize
    }
}

impl std::fmt::Display for SeqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// State of one block slot.
///
/// `Shadowed` appears only in copy-on-write block duplicates held by an
/// overlay cache: the slot exists in the base copy but has not been
/// materialized in the overlay yet. Base-cache blocks never contain it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Vacant,
    Shadowed,
    Occupied(SeqRecord),
}

/// A fixed-capacity pack of sequence records sharing one backend record.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqBlock {
    /// Backend record id of this block
    pub id: RecordId,
    slots: Vec<Slot>,
    est_bytes: usize,
}

impl SeqBlock {
    /// Creates an empty block under the given record id.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            slots: Vec::new(),
            est_bytes: 0,
        }
    }

    /// Number of slots allocated so far (occupied, vacant, or shadowed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Estimated packed footprint of the resident records.
    #[must_use]
    pub fn est_bytes(&self) -> usize {
        self.est_bytes
    }

    /// Whether the block can still accept a record of `incoming` bytes.
    #[must_use]
    pub fn has_room(&self, incoming: usize) -> bool {
        self.slots.len() < SLOTS_PER_BLOCK
            && (self.is_empty() || self.est_bytes + incoming <= BLOCK_BYTE_TARGET)
    }

    /// Appends a record, returning its slot index.
    pub fn push(&mut self, record: SeqRecord) -> usize {
        self.est_bytes += record.byte_estimate();
        self.slots.push(Slot::Occupied(record));
        self.slots.len() - 1
    }

    /// The record in `slot`, if one is materialized there.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&SeqRecord> {
        match self.slots.get(slot) {
            Some(Slot::Occupied(rec)) => Some(rec),
            _ => None,
        }
    }

    /// Mutable access to the record in `slot`, if materialized.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut SeqRecord> {
        match self.slots.get_mut(slot) {
            Some(Slot::Occupied(rec)) => Some(rec),
            _ => None,
        }
    }

    /// Whether `slot` holds a materialized record (not vacant, not shadowed).
    #[must_use]
    pub fn is_materialized(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Slot::Occupied(_)))
    }

    /// Replaces `slot` with `record`, growing the slot table if needed.
    pub fn put(&mut self, slot: usize, record: SeqRecord) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, Slot::Vacant);
        }
        self.slots[slot] = Slot::Occupied(record);
    }

    /// Clears `slot`, returning the record that occupied it.
    pub fn take(&mut self, slot: usize) -> Option<SeqRecord> {
        if !self.is_materialized(slot) {
            return None;
        }
        match std::mem::replace(&mut self.slots[slot], Slot::Vacant) {
            Slot::Occupied(rec) => {
                self.est_bytes = self.est_bytes.saturating_sub(rec.byte_estimate());
                Some(rec)
            }
            _ => None,
        }
    }

    /// Copy-on-write duplicate for an overlay cache: same shape, every
    /// occupied slot shadowed. Records materialize one at a time on their
    /// own first write.
    #[must_use]
    pub fn shadow_clone(&self) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Vacant => Slot::Vacant,
                _ => Slot::Shadowed,
            })
            .collect();
        Self {
            id: self.id,
            slots,
            est_bytes: self.est_bytes,
        }
    }

    /// Merges an overlay copy into this (parent) block, slot by slot.
    ///
    /// Only slots the overlay materialized are transferred; shadowed slots
    /// keep the parent's records.
    pub fn merge_from(&mut self, overlay: SeqBlock) {
        for (i, slot) in overlay.slots.into_iter().enumerate() {
            if let Slot::Occupied(rec) = slot {
                self.put(i, rec);
            }
        }
        self.recompute_bytes();
    }

    /// Recomputes the packed byte estimate from the resident records.
    pub fn recompute_bytes(&mut self) {
        self.est_bytes = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Occupied(rec) => rec.byte_estimate(),
                _ => 0,
            })
            .sum();
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        codec::put_u64(out, self.id.0);
        codec::put_u32(out, self.slots.len() as u32);
        for slot in &self.slots {
            match slot {
                Slot::Vacant => codec::put_u8(out, 0),
                Slot::Occupied(rec) => {
                    codec::put_u8(out, 1);
                    rec.encode(out);
                }
                Slot::Shadowed => {
                    return Err(ConsistencyViolation::ShadowedSlot(self.id.0).into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = RecordId(codec::get_u64(cur)?);
        let n = codec::get_u32(cur)? as usize;
        let mut block = Self::new(id);
        for _ in 0..n {
            match codec::get_u8(cur)? {
                0 => block.slots.push(Slot::Vacant),
                _ => block.slots.push(Slot::Occupied(SeqRecord::decode(cur)?)),
            }
        }
        block.recompute_bytes();
        Ok(block)
    }
}
