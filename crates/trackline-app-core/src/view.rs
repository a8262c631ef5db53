// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Consumer-side "current known state per device".
//!
//! Presentation layers feed the snapshot and every streamed point into a
//! [`FleetView`] and draw from it. The view never merges fields: a newer point
//! for a device replaces the older one whole.

use std::collections::BTreeMap;

use trackline_model::{DeviceId, Point};

/// Latest point per device plus the most recently timestamped point overall.
#[derive(Debug, Default)]
pub struct FleetView {
    points: BTreeMap<DeviceId, Point>,
    latest: Option<DeviceId>,
}

impl FleetView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh snapshot.
    pub fn replace_all(&mut self, points: impl IntoIterator<Item = Point>) {
        self.clear();
        for point in points {
            self.apply(point);
        }
    }

    /// Apply one streamed point.
    pub fn apply(&mut self, point: Point) {
        let id = point.device_id;
        let newer = match self.latest.and_then(|l| self.points.get(&l)) {
            Some(current) => point.time > current.time,
            None => true,
        };
        self.points.insert(id, point);
        if newer {
            self.latest = Some(id);
        } else if self.latest == Some(id) {
            // the leader moved back in time; someone else may lead now
            self.latest = self
                .points
                .values()
                .max_by_key(|p| p.time)
                .map(|p| p.device_id);
        }
    }

    /// Drop every point (e.g. after the connection went away).
    pub fn clear(&mut self) {
        self.points.clear();
        self.latest = None;
    }

    /// Point for one device.
    pub fn get(&self, id: DeviceId) -> Option<&Point> {
        self.points.get(&id)
    }

    /// The point with the most recent position time seen so far.
    pub fn latest(&self) -> Option<&Point> {
        self.latest.and_then(|id| self.points.get(&id))
    }

    /// Points ordered by device id.
    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.values()
    }

    /// Number of devices in view.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
