//! The base object cache.
//!
//! Typed, reference-counted, lazily-loaded handles over an abstract storage
//! backend. Loads insert at reference count zero so passive scans never pin
//! memory; `retain`/`release` are explicit and must be paired by the
//! caller; eviction reclaims only clean, unpinned items in
//! least-recently-used order and performs no backend writes.

use std::collections::HashMap;

use crate::backend::{Backend, CacheKey, LockMode, RecordId, RecordType};
use crate::cache::item::CachedItem;
use crate::cache::{Cache, Payload};
use crate::error::{BackendError, ConsistencyViolation, ContractViolation, Result};
use crate::seq::block::SeqId;
use crate::seq::record::SeqRecord;

/// Default soft cap on resident items.
pub const DEFAULT_MAX_RESIDENT: usize = 4096;

/// A reference-counted object cache over one storage backend.
///
/// Single-threaded by design: one active thread per cache, no internal
/// locking. The three-tier backend lock mode models cross-process
/// contention only.
#[derive(Debug)]
pub struct ObjectCache<B: Backend> {
    backend: B,
    items: HashMap<CacheKey, CachedItem>,
    max_resident: usize,
    tick: u64,
}

impl<B: Backend> ObjectCache<B> {
    /// Creates a cache with the default residency cap.
    pub fn new(backend: B) -> Self {
        Self::with_capacity(backend, DEFAULT_MAX_RESIDENT)
    }

    /// Creates a cache that starts evicting beyond `max_resident` items.
    pub fn with_capacity(backend: B, max_resident: usize) -> Self {
        Self {
            backend,
            items: HashMap::new(),
            max_resident,
            tick: 0,
        }
    }

    /// Shared access to the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether `key` is currently resident.
    #[must_use]
    pub fn is_resident(&self, key: CacheKey) -> bool {
        self.items.contains_key(&key)
    }

    /// Current external reference count of `key` (zero if not resident).
    #[must_use]
    pub fn refs(&self, key: CacheKey) -> u32 {
        self.items.get(&key).map_or(0, |item| item.refs)
    }

    /// Whether `key` is resident with unpersisted modifications.
    #[must_use]
    pub fn is_dirty(&self, key: CacheKey) -> bool {
        self.items.get(&key).is_some_and(|item| item.dirty)
    }

    /// Force-unloads every resident item regardless of reference count.
    ///
    /// Fails with a [`ConsistencyViolation`] if dirty items remain — the
    /// caller forgot a flush, and unloading would lose edits.
    pub fn close(mut self) -> Result<()> {
        let dirty = self.items.values().filter(|item| item.dirty).count();
        if dirty > 0 {
            let violation = ConsistencyViolation::DirtyAtClose(dirty);
            log::error!("{violation}");
            return Err(violation.into());
        }
        for (key, item) in self.items.drain() {
            self.backend.unlock(key, item.handle);
        }
        Ok(())
    }

    fn load(&mut self, key: CacheKey) -> Result<()> {
        let (handle, bytes) = self.backend.read(key)?;
        let payload = Payload::decode(key.rtype, &bytes)?;
        self.tick += 1;
        self.items.insert(
            key,
            CachedItem {
                handle,
                lock: LockMode::Read,
                dirty: false,
                refs: 0,
                tick: self.tick,
                payload,
            },
        );
        self.evict_over_cap(key);
        Ok(())
    }

    /// Evicts clean, unpinned items oldest-first until the cap is met.
    /// `keep` (the item just loaded) is never a victim.
    fn evict_over_cap(&mut self, keep: CacheKey) {
        while self.items.len() > self.max_resident {
            let victim = self
                .items
                .iter()
                .filter(|(key, item)| **key != keep && item.evictable())
                .min_by_key(|(_, item)| item.tick)
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                break; // everything left is pinned or dirty
            };
            if let Some(item) = self.items.remove(&key) {
                log::trace!("evicting {key:?}");
                self.backend.unlock(key, item.handle);
            }
        }
    }

    fn resident(&self, key: CacheKey) -> Result<&CachedItem> {
        self.items
            .get(&key)
            .ok_or_else(|| BackendError::NotFound(key).into())
    }

    fn resident_mut(&mut self, key: CacheKey) -> Result<&mut CachedItem> {
        self.items
            .get_mut(&key)
            .ok_or_else(|| BackendError::NotFound(key).into())
    }
}

impl<B: Backend> Cache for ObjectCache<B> {
    fn acquire(&mut self, key: CacheKey) -> Result<&Payload> {
        if !self.items.contains_key(&key) {
            self.load(key)?;
        }
        self.tick += 1;
        let tick = self.tick;
        let item = self.resident_mut(key)?;
        item.tick = tick;
        Ok(&item.payload)
    }

    fn retain(&mut self, key: CacheKey) -> Result<()> {
        if !self.items.contains_key(&key) {
            self.load(key)?;
        }
        self.resident_mut(key)?.refs += 1;
        Ok(())
    }

    fn release(&mut self, key: CacheKey) -> Result<()> {
        match self.items.get_mut(&key) {
            Some(item) if item.refs > 0 => {
                item.refs -= 1;
                Ok(())
            }
            _ => Err(ContractViolation::UnbalancedRelease(key).into()),
        }
    }

    fn upgrade(&mut self, key: CacheKey, mode: LockMode) -> Result<()> {
        if !self.items.contains_key(&key) {
            self.load(key)?;
        }
        let handle = self.resident(key)?.handle;
        self.backend.upgrade(key, handle, mode)?;
        let item = self.resident_mut(key)?;
        item.lock = item.lock.max(mode);
        Ok(())
    }

    fn make_writable(&mut self, key: CacheKey) -> Result<&mut Payload> {
        if !self.items.contains_key(&key) {
            self.load(key)?;
        }
        let (handle, lock, dirty) = {
            let item = self.resident(key)?;
            (item.handle, item.lock, item.dirty)
        };
        if !dirty {
            if lock < LockMode::Write {
                // A denied upgrade surfaces here and leaves the item
                // untouched.
                self.backend.upgrade(key, handle, LockMode::Write)?;
            }
            let item = self.resident_mut(key)?;
            item.lock = item.lock.max(LockMode::Write);
            item.dirty = true;
            item.refs += 1; // dirty pin, dropped by flush
        }
        Ok(&mut self.resident_mut(key)?.payload)
    }

    fn create(&mut self, rtype: RecordType, mut payload: Payload) -> Result<RecordId> {
        let initial = payload.encode()?;
        let id = self.backend.create(rtype, &initial)?;
        payload.set_id(id);
        let key = CacheKey::new(rtype, id);
        let (handle, _) = self.backend.read(key)?;
        self.backend.upgrade(key, handle, LockMode::Write)?;
        self.tick += 1;
        self.items.insert(
            key,
            CachedItem {
                handle,
                lock: LockMode::Write,
                dirty: true,
                refs: 1, // dirty pin
                tick: self.tick,
                payload,
            },
        );
        self.evict_over_cap(key);
        Ok(id)
    }

    fn reserve(&mut self, rtype: RecordType, initial: &[u8]) -> Result<RecordId> {
        self.backend.create(rtype, initial)
    }

    fn flush(&mut self) -> Result<()> {
        let mut dirty = Vec::new();
        for (key, item) in &self.items {
            if item.dirty {
                dirty.push((self.backend.order_hint(*key), *key));
            }
        }
        // Backend-supplied ordering hint, for write locality only.
        dirty.sort_unstable();
        log::debug!("flushing {} dirty item(s)", dirty.len());
        for (_, key) in dirty {
            let (handle, bytes) = {
                let item = self.resident(key)?;
                (item.handle, item.payload.encode()?)
            };
            self.backend.write(key, handle, &bytes)?;
            let item = self.resident_mut(key)?;
            item.dirty = false;
            if item.refs > 0 {
                item.refs -= 1; // drop the dirty pin
            }
        }
        Ok(())
    }

    fn seq(&mut self, id: SeqId) -> Result<&SeqRecord> {
        let key = CacheKey::new(RecordType::Seq, id.block());
        let block = self.acquire(key)?.as_seq_block()?;
        block
            .get(id.slot())
            .ok_or_else(|| ConsistencyViolation::DanglingSeq(id.0).into())
    }

    fn seq_mut(&mut self, id: SeqId) -> Result<&mut SeqRecord> {
        let key = CacheKey::new(RecordType::Seq, id.block());
        let block = self.make_writable(key)?.as_seq_block_mut()?;
        block
            .get_mut(id.slot())
            .ok_or_else(|| ConsistencyViolation::DanglingSeq(id.0).into())
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::backend::MemBackend;
    use anyhow::Result;

    fn array_key(cache: &mut ObjectCache<MemBackend>, bytes: &[u8]) -> Result<CacheKey> {
        let id = cache.create(RecordType::Array, Payload::Array(bytes.to_vec()))?;
        Ok(CacheKey::new(RecordType::Array, id))
    }

    #[test]
    fn acquire_does_not_pin() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let key = array_key(&mut cache, b"abc")?;
        cache.flush()?;
        assert_eq!(cache.refs(key), 0);
        cache.acquire(key)?;
        assert_eq!(cache.refs(key), 0);
        Ok(())
    }

    #[test]
    fn retain_release_balance() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let key = array_key(&mut cache, b"abc")?;
        cache.flush()?;
        let before = cache.refs(key);
        cache.retain(key)?;
        cache.release(key)?;
        assert_eq!(cache.refs(key), before);
        Ok(())
    }

    #[test]
    fn unbalanced_release_is_contract_violation() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let key = array_key(&mut cache, b"abc")?;
        cache.flush()?;
        assert!(cache.release(key).is_err());
        Ok(())
    }

    #[test]
    fn eviction_spares_pinned_and_dirty() -> Result<()> {
        let mut cache = ObjectCache::with_capacity(MemBackend::new(), 2);
        let pinned = array_key(&mut cache, b"pinned")?;
        let dirty = array_key(&mut cache, b"dirty")?;
        cache.flush()?;
        cache.retain(pinned)?;
        cache.make_writable(dirty)?;

        // Fill past the cap; only clean unpinned items may go.
        let mut clean = Vec::new();
        for i in 0..4 {
            let key = array_key(&mut cache, &[i])?;
            clean.push(key);
        }
        cache.flush()?;
        for key in &clean {
            cache.acquire(*key)?;
        }
        assert!(cache.is_resident(pinned));
        assert!(cache.is_resident(dirty));
        cache.release(pinned)?;
        cache.flush()?;
        Ok(())
    }

    #[test]
    fn evicted_item_reloads_last_flushed_value() -> Result<()> {
        let mut cache = ObjectCache::with_capacity(MemBackend::new(), 1);
        let key = array_key(&mut cache, b"v1")?;
        cache.flush()?;
        // Push it out with other traffic.
        for i in 0..3 {
            array_key(&mut cache, &[i])?;
        }
        cache.flush()?;
        for i in 0..3u64 {
            cache.acquire(CacheKey::new(RecordType::Array, RecordId(i + 2)))?;
        }
        let payload = cache.acquire(key)?;
        assert_eq!(payload.as_array()?.as_slice(), b"v1");
        Ok(())
    }

    #[test]
    fn flush_follows_order_hint() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        // Create out of id order, then dirty them all.
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| array_key(&mut cache, &[i]))
            .collect::<Result<_>>()?;
        cache.flush()?;
        for key in keys.iter().rev() {
            cache.make_writable(*key)?;
        }
        let already = cache.backend().write_log().len();
        cache.flush()?;
        let order: Vec<u64> = cache.backend().write_log()[already..]
            .iter()
            .map(|k| k.id.0)
            .collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);
        Ok(())
    }

    #[test]
    fn close_with_dirty_items_fails() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let key = array_key(&mut cache, b"abc")?;
        cache.flush()?;
        cache.make_writable(key)?;
        assert!(cache.close().is_err());
        Ok(())
    }

    #[test]
    fn denied_upgrade_leaves_item_clean() -> Result<()> {
        // Simulated contention from another process.
        let mut backend = MemBackend::new();
        let id = backend.create(RecordType::Array, b"abc")?;
        let key = CacheKey::new(RecordType::Array, id);
        backend.deny_upgrade(key);
        let mut cache = ObjectCache::new(backend);
        cache.acquire(key)?;
        assert!(cache.make_writable(key).is_err());
        assert!(!cache.is_dirty(key));
        assert_eq!(cache.refs(key), 0);
        Ok(())
    }

    #[test]
    fn resize_applies_to_arrays_only() -> Result<()> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let key = array_key(&mut cache, b"abc")?;
        cache.resize(key, 8)?;
        assert_eq!(cache.acquire(key)?.as_array()?.len(), 8);

        let bin_id = cache.create(
            RecordType::Bin,
            Payload::Bin(crate::bintree::node::Bin::new(
                RecordId(0),
                crate::bintree::node::BinParent::Contig(RecordId(1)),
                0,
                4096,
            )),
        )?;
        let bin_key = CacheKey::new(RecordType::Bin, bin_id);
        assert!(cache.resize(bin_key, 8).is_err());
        Ok(())
    }
}
