//! Copy-on-write overlay caches.
//!
//! An [`OverlayCache`] stacks on any [`Cache`] and captures every write
//! locally, leaving the underlying cache untouched. Reads fall through to
//! the base until a record is first written, at which point the record is
//! duplicated into the overlay and the base copy is pinned so the
//! duplicate's origin cannot be evicted out from under the merge.
//!
//! Sequence blocks duplicate as shadows: only the slots actually edited
//! materialize in the overlay, and `flush` merges them back slot-wise, so
//! concurrent overlay edits to different reads in the same block compose.
//! Dropping the overlay without flushing discards every captured write.

use std::collections::{HashMap, HashSet};

use crate::backend::{BackendHandle, CacheKey, LockMode, RecordId, RecordType};
use crate::cache::item::CachedItem;
use crate::cache::{Cache, Payload};
use crate::error::{BackendError, ConsistencyViolation, ContractViolation, Result};
use crate::seq::block::SeqId;
use crate::seq::record::SeqRecord;

/// A copy-on-write view over another cache.
#[derive(Debug)]
pub struct OverlayCache<'a, C: Cache> {
    base: &'a mut C,
    items: HashMap<CacheKey, CachedItem>,
    /// Records allocated through this overlay; they hold no base pin and
    /// replace (rather than merge into) the reserved base record on flush.
    created: HashSet<CacheKey>,
    tick: u64,
}

impl<'a, C: Cache> OverlayCache<'a, C> {
    /// Opens an overlay over `base`.
    pub fn new(base: &'a mut C) -> Self {
        Self {
            base,
            items: HashMap::new(),
            created: HashSet::new(),
            tick: 0,
        }
    }

    /// Whether `key` has been captured by this overlay.
    #[must_use]
    pub fn is_overlaid(&self, key: CacheKey) -> bool {
        self.items.contains_key(&key)
    }

    /// Duplicates `key` into the overlay on first write and pins the base
    /// copy for the lifetime of the duplicate.
    fn ensure_overlaid(&mut self, key: CacheKey) -> Result<()> {
        if self.items.contains_key(&key) {
            return Ok(());
        }
        let payload = self.base.acquire(key)?.duplicate();
        self.base.retain(key)?;
        self.tick += 1;
        self.items.insert(
            key,
            CachedItem {
                handle: BackendHandle(0),
                lock: LockMode::Write,
                dirty: true,
                refs: 1,
                tick: self.tick,
                payload,
            },
        );
        Ok(())
    }

    fn overlaid(&self, key: CacheKey) -> Result<&CachedItem> {
        self.items
            .get(&key)
            .ok_or_else(|| BackendError::NotFound(key).into())
    }

    fn overlaid_mut(&mut self, key: CacheKey) -> Result<&mut CachedItem> {
        self.items
            .get_mut(&key)
            .ok_or_else(|| BackendError::NotFound(key).into())
    }

    fn merge_down(&mut self, key: CacheKey, payload: Payload) -> Result<()> {
        match payload {
            // Slot-wise merge keeps base edits in slots this overlay
            // never touched.
            Payload::SeqBlock(block) if !self.created.contains(&key) => {
                self.base
                    .make_writable(key)?
                    .as_seq_block_mut()?
                    .merge_from(block);
            }
            payload => {
                *self.base.make_writable(key)? = payload;
            }
        }
        Ok(())
    }

    /// Whether the overlay holds a materialized copy of this block slot.
    fn slot_overlaid(&self, id: SeqId) -> Result<bool> {
        let key = CacheKey::new(RecordType::Seq, id.block());
        self.items
            .get(&key)
            .map(|item| {
                Ok::<_, crate::Error>(item.payload.as_seq_block()?.is_materialized(id.slot()))
            })
            .transpose()
            .map(|hit| hit.unwrap_or(false))
    }
}

impl<C: Cache> Cache for OverlayCache<'_, C> {
    fn acquire(&mut self, key: CacheKey) -> Result<&Payload> {
        if self.items.contains_key(&key) {
            self.tick += 1;
            let tick = self.tick;
            let item = self.overlaid_mut(key)?;
            item.tick = tick;
            Ok(&item.payload)
        } else {
            self.base.acquire(key)
        }
    }

    fn retain(&mut self, key: CacheKey) -> Result<()> {
        if self.items.contains_key(&key) {
            self.overlaid_mut(key)?.refs += 1;
            Ok(())
        } else {
            self.base.retain(key)
        }
    }

    fn release(&mut self, key: CacheKey) -> Result<()> {
        if self.items.contains_key(&key) {
            // Reference count one is the overlay's own pin on its capture,
            // not an external retain.
            let item = self.overlaid_mut(key)?;
            if item.refs <= 1 {
                return Err(ContractViolation::UnbalancedRelease(key).into());
            }
            item.refs -= 1;
            Ok(())
        } else {
            self.base.release(key)
        }
    }

    fn upgrade(&mut self, key: CacheKey, mode: LockMode) -> Result<()> {
        // Locks live in the backend; the merge will need them there.
        self.base.upgrade(key, mode)
    }

    fn make_writable(&mut self, key: CacheKey) -> Result<&mut Payload> {
        self.ensure_overlaid(key)?;
        Ok(&mut self.overlaid_mut(key)?.payload)
    }

    fn create(&mut self, rtype: RecordType, mut payload: Payload) -> Result<RecordId> {
        // Reserve a real id underneath so references recorded by other
        // overlay edits stay valid after the merge.
        let initial = payload.encode()?;
        let id = self.base.reserve(rtype, &initial)?;
        payload.set_id(id);
        let key = CacheKey::new(rtype, id);
        self.tick += 1;
        self.items.insert(
            key,
            CachedItem {
                handle: BackendHandle(0),
                lock: LockMode::Write,
                dirty: true,
                refs: 1,
                tick: self.tick,
                payload,
            },
        );
        self.created.insert(key);
        Ok(id)
    }

    fn reserve(&mut self, rtype: RecordType, initial: &[u8]) -> Result<RecordId> {
        self.base.reserve(rtype, initial)
    }

    fn flush(&mut self) -> Result<()> {
        let captured: Vec<(CacheKey, Payload)> = self
            .items
            .drain()
            .map(|(key, item)| (key, item.payload))
            .collect();
        log::debug!("merging {} overlaid item(s) down", captured.len());
        let mut failed = None;
        for (key, payload) in captured {
            if failed.is_none() {
                if let Err(e) = self.merge_down(key, payload) {
                    failed = Some(e);
                }
            }
            // Base pins are dropped for merged and unmerged captures
            // alike: a failed merge discards the remaining edits but
            // never leaks a retain.
            if !self.created.remove(&key) {
                if let Err(e) = self.base.release(key) {
                    failed.get_or_insert(e);
                }
            }
        }
        match failed {
            Some(e) => Err(e),
            None => self.base.flush(),
        }
    }

    fn seq(&mut self, id: SeqId) -> Result<&SeqRecord> {
        if self.slot_overlaid(id)? {
            let key = CacheKey::new(RecordType::Seq, id.block());
            let block = self.overlaid(key)?.payload.as_seq_block()?;
            block
                .get(id.slot())
                .ok_or_else(|| ConsistencyViolation::DanglingSeq(id.0).into())
        } else {
            self.base.seq(id)
        }
    }

    fn seq_mut(&mut self, id: SeqId) -> Result<&mut SeqRecord> {
        let key = CacheKey::new(RecordType::Seq, id.block());
        self.ensure_overlaid(key)?;
        if !self.slot_overlaid(id)? {
            let record = self.base.seq(id)?.clone();
            self.overlaid_mut(key)?
                .payload
                .as_seq_block_mut()?
                .put(id.slot(), record);
        }
        let block = self.overlaid_mut(key)?.payload.as_seq_block_mut()?;
        block
            .get_mut(id.slot())
            .ok_or_else(|| ConsistencyViolation::DanglingSeq(id.0).into())
    }
}

impl<C: Cache> Drop for OverlayCache<'_, C> {
    fn drop(&mut self) {
        // Unpin surviving captures; created records held no base pin.
        for key in self.items.keys() {
            if !self.created.contains(key) {
                let _ = self.base.release(*key);
            }
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::backend::{Backend, MemBackend};
    use crate::cache::ObjectCache;
    use anyhow::Result;

    fn base_with_array(bytes: &[u8]) -> Result<(ObjectCache<MemBackend>, CacheKey)> {
        let mut cache = ObjectCache::new(MemBackend::new());
        let id = cache.create(RecordType::Array, Payload::Array(bytes.to_vec()))?;
        cache.flush()?;
        Ok((cache, CacheKey::new(RecordType::Array, id)))
    }

    #[test]
    fn writes_stay_in_the_overlay_until_flush() -> Result<()> {
        let (mut base, key) = base_with_array(b"aaaa")?;
        let mut overlay = OverlayCache::new(&mut base);
        overlay.make_writable(key)?.as_array_mut()?[0] = b'z';
        assert_eq!(overlay.acquire(key)?.as_array()?[0], b'z');
        overlay.flush()?;
        drop(overlay);
        assert_eq!(base.acquire(key)?.as_array()?[0], b'z');
        Ok(())
    }

    #[test]
    fn dropped_overlay_discards_edits_and_pins() -> Result<()> {
        let (mut base, key) = base_with_array(b"aaaa")?;
        {
            let mut overlay = OverlayCache::new(&mut base);
            overlay.make_writable(key)?.as_array_mut()?[0] = b'z';
        }
        assert_eq!(base.acquire(key)?.as_array()?[0], b'a');
        assert_eq!(base.refs(key), 0);
        assert!(!base.is_dirty(key));
        Ok(())
    }

    #[test]
    fn capture_pins_the_base_copy() -> Result<()> {
        let (mut base, key) = base_with_array(b"aaaa")?;
        let mut overlay = OverlayCache::new(&mut base);
        overlay.make_writable(key)?;
        overlay.flush()?;
        drop(overlay);
        // Flush released the capture pin.
        assert_eq!(base.refs(key), 0);
        Ok(())
    }

    #[test]
    fn overlay_created_records_survive_flush() -> Result<()> {
        let mut base = ObjectCache::new(MemBackend::new());
        let id = {
            let mut overlay = OverlayCache::new(&mut base);
            let id = overlay.create(RecordType::Array, Payload::Array(b"new".to_vec()))?;
            overlay.flush()?;
            id
        };
        let key = CacheKey::new(RecordType::Array, id);
        assert_eq!(base.acquire(key)?.as_array()?.as_slice(), b"new");
        base.flush()?;
        Ok(())
    }

    #[test]
    fn failed_merge_releases_every_base_pin() -> Result<()> {
        let mut backend = MemBackend::new();
        let good = backend.create(RecordType::Array, &Payload::Array(b"g".to_vec()).encode()?)?;
        let bad = backend.create(RecordType::Array, &Payload::Array(b"b".to_vec()).encode()?)?;
        let good_key = CacheKey::new(RecordType::Array, good);
        let bad_key = CacheKey::new(RecordType::Array, bad);
        backend.deny_upgrade(bad_key);
        let mut base = ObjectCache::new(backend);

        {
            let mut overlay = OverlayCache::new(&mut base);
            overlay.make_writable(good_key)?.as_array_mut()?[0] = b'G';
            overlay.make_writable(bad_key)?.as_array_mut()?[0] = b'B';
            assert!(overlay.flush().is_err());
        }
        // The denied record never merged and holds nothing.
        assert_eq!(base.refs(bad_key), 0);
        assert!(!base.is_dirty(bad_key));
        // The other capture may have merged before the failure; either
        // way only the dirty pin remains.
        assert_eq!(base.refs(good_key), u32::from(base.is_dirty(good_key)));
        Ok(())
    }

    #[test]
    fn release_of_capture_pin_is_unbalanced() -> Result<()> {
        let (mut base, key) = base_with_array(b"aaaa")?;
        let mut overlay = OverlayCache::new(&mut base);
        overlay.make_writable(key)?;
        assert!(overlay.release(key).is_err());
        overlay.retain(key)?;
        overlay.release(key)?;
        overlay.flush()?;
        Ok(())
    }
}
