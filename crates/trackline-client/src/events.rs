// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Events delivered to the single consumer of a [`Reconciler`](crate::Reconciler).
//!
//! The reconciler pushes into an unbounded channel; hosts either `recv().await` on
//! the receiver directly or wrap it in [`ChannelEvents`] and drain it from a UI
//! tick without knowing about the socket underneath.

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use trackline_model::Point;

use crate::error::SyncError;

/// Something the presentation layer should react to.
#[derive(Debug)]
pub enum SyncEvent {
    /// A freshly merged point for one device.
    Point(Point),
    /// The socket opened (`true`) or the connection ended (`false`).
    Connection(bool),
    /// A frame was skipped (malformed, or positions for unknown devices).
    FrameRejected(SyncError),
}

/// Pull-style port over the event stream.
pub trait EventPort {
    /// Drain up to `max` events that are ready now.
    fn drain(&mut self, max: usize) -> Vec<SyncEvent>;
    /// True once the producer is gone and nothing is buffered.
    fn is_closed(&self) -> bool;
}

/// Channel-backed [`EventPort`].
pub struct ChannelEvents {
    rx: UnboundedReceiver<SyncEvent>,
    closed: bool,
}

impl ChannelEvents {
    /// Wrap the receiver returned by [`Reconciler::new`](crate::Reconciler::new).
    pub fn new(rx: UnboundedReceiver<SyncEvent>) -> Self {
        Self { rx, closed: false }
    }
}

impl EventPort for ChannelEvents {
    fn drain(&mut self, max: usize) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        out
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
