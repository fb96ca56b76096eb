//! Contig records and the global name registry.
//!
//! A contig anchors one assembled unit: its extent on the absolute axis and
//! the root of its bin tree. Contigs are created once, grow as edits extend
//! them, and are never destroyed except by explicit deletion.

use std::collections::BTreeMap;
use std::io::Cursor;

use crate::backend::{CacheKey, RecordId, RecordType};
use crate::bintree::node::{Bin, BinParent, START_BIN_SIZE};
use crate::cache::{Cache, Payload};
use crate::codec;
use crate::error::{BackendError, ConsistencyViolation, Error, Result};

/// Well-known record id of the global name registry.
pub const REGISTRY_ID: RecordId = RecordId(1);

/// One assembled unit: extent plus bin-tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    /// Backend record id
    pub id: RecordId,
    /// Human-readable contig name
    pub name: String,
    /// Smallest absolute coordinate in use
    pub start: i64,
    /// Largest absolute coordinate in use
    pub end: i64,
    /// Root bin of the interval tree
    pub root: RecordId,
}

impl Contig {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u64(out, self.id.0);
        codec::put_str(out, &self.name);
        codec::put_i64(out, self.start);
        codec::put_i64(out, self.end);
        codec::put_u64(out, self.root.0);
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            id: RecordId(codec::get_u64(cur)?),
            name: codec::get_str(cur)?,
            start: codec::get_i64(cur)?,
            end: codec::get_i64(cur)?,
            root: RecordId(codec::get_u64(cur)?),
        })
    }
}

/// Global metadata record mapping contig names to record ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registry {
    /// Contig name → contig record id
    pub contigs: BTreeMap<String, u64>,
}

impl Registry {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        codec::put_u32(out, self.contigs.len() as u32);
        for (name, id) in &self.contigs {
            codec::put_str(out, name);
            codec::put_u64(out, *id);
        }
    }

    pub(crate) fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let n = codec::get_u32(cur)? as usize;
        let mut contigs = BTreeMap::new();
        for _ in 0..n {
            let name = codec::get_str(cur)?;
            let id = codec::get_u64(cur)?;
            contigs.insert(name, id);
        }
        Ok(Self { contigs })
    }
}

/// Creates a contig with an empty root bin and registers its name.
///
/// The new contig and its root bin are dirty in the cache until the next
/// flush.
pub fn create_contig<C: Cache>(cache: &mut C, name: &str) -> Result<RecordId> {
    let contig_id = cache.create(
        RecordType::Contig,
        Payload::Contig(Contig {
            id: RecordId(0),
            name: name.to_string(),
            start: 0,
            end: -1,
            root: RecordId(0),
        }),
    )?;
    let root_id = cache.create(
        RecordType::Bin,
        Payload::Bin(Bin::new(
            RecordId(0),
            BinParent::Contig(contig_id),
            0,
            START_BIN_SIZE,
        )),
    )?;

    cache
        .make_writable(CacheKey::new(RecordType::Contig, contig_id))?
        .as_contig_mut()?
        .root = root_id;

    let registry = ensure_registry(cache)?;
    registry.contigs.insert(name.to_string(), contig_id.0);
    Ok(contig_id)
}

/// Looks a contig up by name in the global registry.
pub fn lookup_contig<C: Cache>(cache: &mut C, name: &str) -> Result<Option<RecordId>> {
    let key = CacheKey::new(RecordType::Meta, REGISTRY_ID);
    match cache.acquire(key) {
        Ok(payload) => {
            let registry = payload.as_registry()?;
            Ok(registry.contigs.get(name).map(|id| RecordId(*id)))
        }
        Err(Error::Backend(BackendError::NotFound(_))) => Ok(None),
        Err(e) => Err(e),
    }
}

fn ensure_registry<C: Cache>(cache: &mut C) -> Result<&mut Registry> {
    let key = CacheKey::new(RecordType::Meta, REGISTRY_ID);
    let missing = matches!(
        cache.acquire(key),
        Err(Error::Backend(BackendError::NotFound(_)))
    );
    if missing {
        // The registry is addressed by its well-known id everywhere; a
        // backend that hands out something else cannot host this store.
        let id = cache.create(RecordType::Meta, Payload::Registry(Registry::default()))?;
        if id != REGISTRY_ID {
            let violation = ConsistencyViolation::MisallocatedRegistry(id.0);
            log::error!("{violation}");
            return Err(violation.into());
        }
    }
    cache.make_writable(key)?.as_registry_mut()
}
