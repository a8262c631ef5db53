// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for Trackline hosts (config, session record, fleet view).
//! Keeps host adapters thin and storage-agnostic.

pub mod config;
pub mod memory;
pub mod session;
pub mod view;

pub use memory::MemoryConfigStore;
pub use session::{PersistedSession, SessionStore};
pub use view::FleetView;
