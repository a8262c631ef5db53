// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory [`ConfigStore`] for hosts that should not touch the filesystem.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{ConfigError, ConfigStore};

/// Map-backed config store. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    save_count: usize,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_raw` calls so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).save_count
    }

    /// Raw bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .get(key)
            .cloned()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.raw(key).ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.save_count += 1;
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove_raw(&self, key: &str) -> Result<(), ConfigError> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .remove(key);
        Ok(())
    }
}
