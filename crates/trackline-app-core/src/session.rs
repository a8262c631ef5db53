// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The one small record Trackline persists about a login.
//!
//! Only the server URL and the account identity are stored. The secret is used
//! once for the login call and then dropped; the server's session cookie lives in
//! the HTTP client for the lifetime of the process.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key under which the session record is stored.
pub const SESSION_KEY: &str = "session";

/// Server URL and identity remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Base URL of the tracking server (e.g. `https://demo.traccar.org`).
    pub server_url: String,
    /// Account identifier used to log in (usually an e-mail address).
    pub identity: String,
}

/// Typed access to the persisted session record.
pub struct SessionStore<S> {
    config: ConfigService<S>,
}

impl<S: ConfigStore> SessionStore<S> {
    /// Wrap a raw config store.
    pub fn new(store: S) -> Self {
        Self {
            config: ConfigService::new(store),
        }
    }

    /// Load the stored record, if any.
    pub fn load(&self) -> Result<Option<PersistedSession>, ConfigError> {
        self.config.load(SESSION_KEY)
    }

    /// Replace the stored record.
    pub fn save(&self, session: &PersistedSession) -> Result<(), ConfigError> {
        self.config.save(SESSION_KEY, session)
    }

    /// Forget the stored record.
    pub fn clear(&self) -> Result<(), ConfigError> {
        self.config.remove(SESSION_KEY)
    }

    /// Previously stored server URL, or `None` when unset or unreadable.
    pub fn server_url(&self) -> Option<String> {
        self.load_logged().map(|s| s.server_url)
    }

    /// Previously stored identity, or `None` when unset or unreadable.
    pub fn identity(&self) -> Option<String> {
        self.load_logged().map(|s| s.identity)
    }

    fn load_logged(&self) -> Option<PersistedSession> {
        match self.load() {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(?err, "persisted session unreadable");
                None
            }
        }
    }
}
