//! Sequence ingest and record-level access.
//!
//! [`SeqStore`] tracks the block currently accepting new records for an
//! ingest stream; once a block's packed estimate crosses the byte target
//! or its slots run out, the next create opens a fresh block. Access and
//! edits address records by [`SeqId`] and go through whichever cache the
//! caller is working in, so the same calls serve the base store and an
//! edit overlay.

use crate::backend::{CacheKey, RecordId, RecordType};
use crate::cache::{Cache, Payload};
use crate::error::Result;
use crate::seq::block::{SeqBlock, SeqId};
use crate::seq::record::{Confidence, SeqRecord};

fn seq_key(block: RecordId) -> CacheKey {
    CacheKey::new(RecordType::Seq, block)
}

/// A fully decoded record handed over by an importer.
#[derive(Debug, Clone)]
pub struct SeqInit {
    /// Read name
    pub name: String,
    /// Original trace file name, if distinct
    pub trace_name: Option<String>,
    /// Alignment description, if any
    pub alignment: Option<String>,
    /// Base calls in contig orientation
    pub bases: Vec<u8>,
    /// Per-base confidence, parallel to `bases`
    pub conf: Confidence,
    /// Left soft-clip bound, 1-based inclusive
    pub left: i64,
    /// Right soft-clip bound, 1-based inclusive
    pub right: i64,
    /// Whether the record should be stored reverse-complement
    pub comp: bool,
    /// Pairing key shared with the mate, if paired
    pub parent: Option<RecordId>,
    /// Opaque auxiliary bytes
    pub aux: Vec<u8>,
}

/// Allocates sequence records into packed blocks.
#[derive(Debug, Default)]
pub struct SeqStore {
    open_block: Option<RecordId>,
}

impl SeqStore {
    /// A store with no block open yet; the first create opens one.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, rolling over to a new block when the open one is
    /// full. The record is not placed on any contig; that is a separate
    /// `add_range` call.
    pub fn create<C: Cache>(&mut self, cache: &mut C, init: SeqInit) -> Result<SeqId> {
        let len = init.bases.len() as i64;
        let mut record = SeqRecord {
            name: init.name,
            trace_name: init.trace_name,
            alignment: init.alignment,
            bin: None,
            slot: 0,
            parent: init.parent,
            left: init.left,
            right: init.right,
            len,
            bases: init.bases,
            conf: init.conf,
            aux: init.aux,
        };
        if init.comp {
            record.complement();
        }
        let incoming = record.byte_estimate();

        if let Some(block_id) = self.open_block {
            let fits = cache
                .acquire(seq_key(block_id))?
                .as_seq_block()?
                .has_room(incoming);
            if fits {
                let block = cache.make_writable(seq_key(block_id))?.as_seq_block_mut()?;
                let slot = block.push(record);
                return Ok(SeqId::new(block_id, slot));
            }
            log::debug!("sequence block {block_id} full, rolling over");
        }

        let block_id = cache.create(
            RecordType::Seq,
            Payload::SeqBlock(SeqBlock::new(RecordId(0))),
        )?;
        self.open_block = Some(block_id);
        let block = cache.make_writable(seq_key(block_id))?.as_seq_block_mut()?;
        let slot = block.push(record);
        Ok(SeqId::new(block_id, slot))
    }
}

/// Base at display position `pos`, viewed through `flipped`.
pub fn get_base<C: Cache>(cache: &mut C, id: SeqId, pos: i64, flipped: bool) -> Result<u8> {
    cache.seq(id)?.get_base(pos, flipped)
}

/// Base plus four log-probability lanes at display position `pos`.
pub fn get_base4<C: Cache>(
    cache: &mut C,
    id: SeqId,
    pos: i64,
    flipped: bool,
) -> Result<(u8, [f32; 4])> {
    cache.seq(id)?.get_base4(pos, flipped)
}

/// Inserts a base into one record, keeping the block's size estimate
/// current for rollover accounting.
pub fn insert_base<C: Cache>(
    cache: &mut C,
    id: SeqId,
    pos: i64,
    base: u8,
    conf: u8,
    flipped: bool,
) -> Result<()> {
    cache.seq_mut(id)?.insert_base(pos, base, conf, flipped)?;
    cache
        .make_writable(seq_key(id.block()))?
        .as_seq_block_mut()?
        .recompute_bytes();
    Ok(())
}

/// Removes a base from one record.
pub fn delete_base<C: Cache>(cache: &mut C, id: SeqId, pos: i64, flipped: bool) -> Result<()> {
    cache.seq_mut(id)?.delete_base(pos, flipped)?;
    cache
        .make_writable(seq_key(id.block()))?
        .as_seq_block_mut()?
        .recompute_bytes();
    Ok(())
}

/// Reverse-complements one record in place.
pub fn complement<C: Cache>(cache: &mut C, id: SeqId) -> Result<()> {
    cache.seq_mut(id)?.complement();
    Ok(())
}
