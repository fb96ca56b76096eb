//! Reference in-memory backend.
//!
//! Backs the crate's own tests and serves as the template for embedding: a
//! byte map plus a lock table, with a per-key switch to simulate lock
//! contention from another process.

use std::collections::{HashMap, HashSet};

use crate::backend::{Backend, BackendHandle, CacheKey, LockMode, RecordId, RecordType};
use crate::error::{BackendError, ContractViolation, Result};

/// In-memory implementation of the [`Backend`] contract.
#[derive(Debug, Default)]
pub struct MemBackend {
    records: HashMap<CacheKey, Vec<u8>>,
    locks: HashMap<CacheKey, (BackendHandle, LockMode)>,
    next_id: HashMap<RecordType, u64>,
    next_handle: u64,
    deny_upgrades: HashSet<CacheKey>,
    write_log: Vec<CacheKey>,
}

impl MemBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates cross-process contention: further upgrade requests for
    /// `key` will be denied until [`Self::allow_upgrade`] is called.
    pub fn deny_upgrade(&mut self, key: CacheKey) {
        self.deny_upgrades.insert(key);
    }

    /// Lifts a previous [`Self::deny_upgrade`].
    pub fn allow_upgrade(&mut self, key: CacheKey) {
        self.deny_upgrades.remove(&key);
    }

    /// Keys written back so far, in write order.
    #[must_use]
    pub fn write_log(&self) -> &[CacheKey] {
        &self.write_log
    }

    /// Whether a record exists under `key`.
    #[must_use]
    pub fn contains(&self, key: CacheKey) -> bool {
        self.records.contains_key(&key)
    }

    /// Raw stored bytes for `key`, if any.
    #[must_use]
    pub fn raw(&self, key: CacheKey) -> Option<&[u8]> {
        self.records.get(&key).map(Vec::as_slice)
    }

    fn mint_handle(&mut self) -> BackendHandle {
        self.next_handle += 1;
        BackendHandle(self.next_handle)
    }

    fn check_handle(&self, key: CacheKey, handle: BackendHandle) -> Result<LockMode> {
        match self.locks.get(&key) {
            Some((held, mode)) if *held == handle => Ok(*mode),
            _ => Err(BackendError::WriteRejected(key, "stale or unknown handle".into()).into()),
        }
    }
}

impl Backend for MemBackend {
    fn read(&mut self, key: CacheKey) -> Result<(BackendHandle, Vec<u8>)> {
        let payload = self
            .records
            .get(&key)
            .cloned()
            .ok_or(BackendError::NotFound(key))?;
        let handle = self.mint_handle();
        self.locks.insert(key, (handle, LockMode::Read));
        Ok((handle, payload))
    }

    fn write(&mut self, key: CacheKey, handle: BackendHandle, payload: &[u8]) -> Result<()> {
        let mode = self.check_handle(key, handle)?;
        if mode < LockMode::Write {
            return Err(ContractViolation::ReadOnlyWrite(key).into());
        }
        self.records.insert(key, payload.to_vec());
        self.write_log.push(key);
        Ok(())
    }

    fn create(&mut self, rtype: RecordType, initial: &[u8]) -> Result<RecordId> {
        let next = self.next_id.entry(rtype).or_insert(1);
        let id = RecordId(*next);
        *next += 1;
        self.records
            .insert(CacheKey::new(rtype, id), initial.to_vec());
        Ok(id)
    }

    fn upgrade(&mut self, key: CacheKey, handle: BackendHandle, mode: LockMode) -> Result<()> {
        let held = self.check_handle(key, handle)?;
        if mode <= held {
            return Ok(());
        }
        if self.deny_upgrades.contains(&key) {
            return Err(BackendError::LockDenied {
                key,
                requested: mode,
            }
            .into());
        }
        self.locks.insert(key, (handle, mode));
        Ok(())
    }

    fn unlock(&mut self, key: CacheKey, handle: BackendHandle) {
        if let Some((held, _)) = self.locks.get(&key) {
            if *held == handle {
                self.locks.remove(&key);
            }
        }
    }
}
