// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Device/position fact caches and the per-device fallback timers.
//!
//! Owned by the connection task and touched from nowhere else, so nothing here
//! locks. Timers are plain spawned sleeps; when one elapses it reports back over
//! an internal channel and the connection task calls [`FactEngine::on_fallback`].
//! Every arm bumps a generation counter so a report from a timer that was
//! cancelled or replaced in the meantime is recognised and dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, trace, warn};
use trackline_avatar::AvatarCache;
use trackline_model::wire::{decode_frame, SocketFrame};
use trackline_model::{Device, DeviceId, Point, PositionFact, RenderState};

use crate::error::SyncError;
use crate::events::SyncEvent;

/// Expiry report from a fallback timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fired {
    pub(crate) device_id: DeviceId,
    pub(crate) generation: u64,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub(crate) struct FactEngine {
    devices: HashMap<DeviceId, Device>,
    positions: HashMap<DeviceId, PositionFact>,
    timers: HashMap<DeviceId, ArmedTimer>,
    next_generation: u64,
    fallback_delay: Duration,
    fired_tx: UnboundedSender<Fired>,
    events: UnboundedSender<SyncEvent>,
    avatars: AvatarCache,
    in_flight: HashMap<String, AbortHandle>,
    warming: JoinSet<()>,
}

impl FactEngine {
    pub(crate) fn new(
        avatars: AvatarCache,
        events: UnboundedSender<SyncEvent>,
        fired_tx: UnboundedSender<Fired>,
        fallback_delay: Duration,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            positions: HashMap::new(),
            timers: HashMap::new(),
            next_generation: 0,
            fallback_delay,
            fired_tx,
            events,
            avatars,
            in_flight: HashMap::new(),
            warming: JoinSet::new(),
        }
    }

    /// Decode and apply one text frame. Bad frames are logged and reported, never fatal.
    pub(crate) fn handle_text(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "skipping malformed frame");
                self.publish(SyncEvent::FrameRejected(err.into()));
                return;
            }
        };
        if frame.is_empty() {
            trace!("frame without devices or positions");
            return;
        }
        if let Err(err) = self.apply(frame) {
            warn!(%err, "rejecting frame");
            self.publish(SyncEvent::FrameRejected(err));
        }
    }

    /// Apply a decoded frame, device facts first. Returns the number of points emitted.
    ///
    /// A frame whose positions reference a device that is neither cached nor in
    /// the frame is rejected before anything is applied.
    pub(crate) fn apply(&mut self, frame: SocketFrame) -> Result<usize, SyncError> {
        if let Some(orphan) = frame.positions.iter().find(|p| {
            !self.devices.contains_key(&p.device_id)
                && !frame.devices.iter().any(|d| d.id == p.device_id)
        }) {
            return Err(SyncError::Protocol {
                device_id: orphan.device_id,
            });
        }

        for record in frame.devices {
            self.on_device(record.into_device());
        }
        let mut emitted = 0;
        for record in frame.positions {
            if self.on_position(record.into()) {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    fn on_device(&mut self, device: Device) {
        let id = device.id;
        trace!(device = id, status = %device.status, "device fact");
        if let Some(url) = device.image_url.clone() {
            self.warm(url);
        }
        self.devices.insert(id, device);
        self.arm(id);
    }

    fn on_position(&mut self, position: PositionFact) -> bool {
        let id = position.device_id;
        self.cancel(id);
        self.positions.insert(id, position);
        match self.point_for(id) {
            Some(point) => {
                self.publish(SyncEvent::Point(point));
                true
            }
            None => false,
        }
    }

    /// Handle a timer report. Returns true if a point was emitted.
    pub(crate) fn on_fallback(&mut self, fired: Fired) -> bool {
        match self.timers.get(&fired.device_id) {
            Some(armed) if armed.generation == fired.generation => {}
            _ => {
                trace!(device = fired.device_id, "ignoring superseded fallback");
                return false;
            }
        }
        self.timers.remove(&fired.device_id);
        match self.point_for(fired.device_id) {
            Some(point) => {
                debug!(device = fired.device_id, "fallback emit");
                self.publish(SyncEvent::Point(point));
                true
            }
            None => {
                debug!(device = fired.device_id, "fallback with no position yet; nothing to emit");
                false
            }
        }
    }

    /// Abort every armed timer and background avatar fetch.
    pub(crate) fn cancel_all(&mut self) {
        for (_, armed) in self.timers.drain() {
            armed.handle.abort();
        }
        self.warming.abort_all();
        self.in_flight.clear();
    }

    /// Number of devices with an armed fallback.
    pub(crate) fn armed(&self) -> usize {
        self.timers.len()
    }

    fn arm(&mut self, device_id: DeviceId) {
        self.cancel(device_id);
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.fallback_delay;
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Fired {
                device_id,
                generation,
            });
        });
        self.timers
            .insert(device_id, ArmedTimer { generation, handle });
    }

    fn cancel(&mut self, device_id: DeviceId) {
        if let Some(armed) = self.timers.remove(&device_id) {
            armed.handle.abort();
        }
    }

    fn point_for(&self, device_id: DeviceId) -> Option<Point> {
        let device = self.devices.get(&device_id)?;
        let position = self.positions.get(&device_id)?;
        let marker =
            self.avatars
                .marker_for(device.image_url.as_deref(), &device.category, device.status);
        Some(Point::merge(device, position, marker))
    }

    /// Fetch an avatar in the background so later emissions find it on disk.
    ///
    /// Skipped while a fetch for `url` is still running or once it is cached; a
    /// failed fetch is retried on the next device fact carrying the URL.
    fn warm(&mut self, url: String) {
        while self.warming.try_join_next().is_some() {}
        self.in_flight.retain(|_, task| !task.is_finished());
        if self.in_flight.contains_key(&url)
            || self.avatars.lookup(&url, RenderState::Original).is_some()
        {
            return;
        }
        let avatars = self.avatars.clone();
        let fetching = url.clone();
        let task = self.warming.spawn(async move {
            if let Err(err) = avatars.ensure(&fetching).await {
                warn!(url = %fetching, %err, "avatar warm-up failed");
            }
        });
        self.in_flight.insert(url, task);
    }

    #[cfg(test)]
    async fn settle_warming(&mut self) {
        while self.warming.join_next().await.is_some() {}
    }

    fn publish(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event consumer gone; dropping event");
        }
    }
}

impl Drop for FactEngine {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
