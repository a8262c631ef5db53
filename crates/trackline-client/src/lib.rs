// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client for a fleet tracking server.
//!
//! * [`Transport`] logs in, keeps the session cookie, and performs REST calls.
//! * [`SnapshotFetcher`] produces the full point set once, all-or-nothing.
//! * [`Reconciler`] follows the WebSocket and emits one coherent [`SyncEvent`]
//!   per logical change, holding device-only changes back for a short fallback
//!   delay in case the matching position is on its way.
//!
//! Typical flow: authenticate, fetch the snapshot, then subscribe.

mod error;
mod events;
mod facts;
mod reconciler;
mod snapshot;
mod transport;

pub use error::SyncError;
pub use events::{ChannelEvents, EventPort, SyncEvent};
pub use reconciler::{ConnectionState, Reconciler, SyncOptions, DEFAULT_FALLBACK_DELAY};
pub use snapshot::{SnapshotFetcher, DEFAULT_SNAPSHOT_CONCURRENCY};
pub use transport::{SharedConfigStore, Socket, Transport};
