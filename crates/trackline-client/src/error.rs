// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the tracking client.

use trackline_app_core::config::ConfigError;
use trackline_model::wire::WireError;
use trackline_model::{DeviceId, PositionId};

/// Errors raised by the transport, snapshot fetcher and reconciler.
///
/// Nothing in this crate retries; every error goes to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The server rejected the credentials.
    #[error("[AUTH] server rejected credentials (HTTP {status})")]
    Auth {
        /// HTTP status returned by the login call.
        status: u16,
    },
    /// A single HTTP or socket call failed (non-2xx or network failure).
    #[error("[TRANSPORT] {url}: {reason}")]
    Transport {
        /// URL that was called.
        url: String,
        /// Status line or network error.
        reason: String,
    },
    /// No server URL has been configured or persisted yet.
    #[error("[NOT_CONFIGURED] no server URL; authenticate first")]
    NotConfigured,
    /// A server URL could not be parsed or turned into a socket URL.
    #[error("[INVALID_URL] {0}")]
    InvalidUrl(String),
    /// A position fact referenced a device never announced.
    #[error("[PROTOCOL] position for unknown device {device_id}")]
    Protocol {
        /// Device the position claimed to belong to.
        device_id: DeviceId,
    },
    /// A device's position lookup returned no record for it.
    #[error("[MISSING_POSITION] device {device_id} has no position {position_id}")]
    MissingPosition {
        /// Device whose lookup failed.
        device_id: DeviceId,
        /// Position id that was requested.
        position_id: PositionId,
    },
    /// A payload could not be decoded.
    #[error("[MALFORMED] {0}")]
    Malformed(#[from] WireError),
    /// The persisted session record could not be read or written.
    #[error("[CONFIG] {0}")]
    Config(#[from] ConfigError),
    /// `subscribe` was called while a connection is active.
    #[error("[ALREADY_SUBSCRIBED] a connection is already active")]
    AlreadySubscribed,
}

impl SyncError {
    pub(crate) fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
