// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Initial full point set from the REST listing.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};
use trackline_avatar::AvatarCache;
use trackline_model::wire::{decode_devices, decode_positions};
use trackline_model::{Device, Point, PositionId};

use crate::error::SyncError;
use crate::transport::Transport;

/// Default number of position lookups kept in flight.
pub const DEFAULT_SNAPSHOT_CONCURRENCY: usize = 8;

/// Fetches every device plus its current position and merges them into [`Point`]s.
///
/// All-or-nothing: one failed lookup fails the whole call.
pub struct SnapshotFetcher {
    transport: Arc<Transport>,
    avatars: AvatarCache,
    max_in_flight: usize,
}

impl SnapshotFetcher {
    /// Fetcher with the default fan-out.
    pub fn new(transport: Arc<Transport>, avatars: AvatarCache) -> Self {
        Self {
            transport,
            avatars,
            max_in_flight: DEFAULT_SNAPSHOT_CONCURRENCY,
        }
    }

    /// Bound the number of concurrent position lookups (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Device listing, then one position lookup per device, paired by id.
    ///
    /// Devices that never reported a position are left out. The result follows
    /// the order of the device listing.
    pub async fn fetch_all_points(&self) -> Result<Vec<Point>, SyncError> {
        let body = self.transport.call("api/devices", &[]).await?;
        let devices = decode_devices(&body)?;
        let listed = devices.len();

        let located: Vec<(Device, PositionId)> = devices
            .into_iter()
            .filter_map(|device| match device.position_id {
                Some(position_id) => Some((device, position_id)),
                None => {
                    debug!(device = device.id, "no position reported yet; skipped");
                    None
                }
            })
            .collect();

        let points: Vec<Point> = stream::iter(
            located
                .into_iter()
                .map(|(device, position_id)| self.point_for(device, position_id)),
        )
        .buffered(self.max_in_flight)
        .try_collect()
        .await?;

        info!(devices = listed, points = points.len(), "snapshot fetched");
        Ok(points)
    }

    async fn point_for(&self, device: Device, position_id: PositionId) -> Result<Point, SyncError> {
        let body = self
            .transport
            .call("api/positions", &[("id", position_id.to_string())])
            .await?;
        let position = decode_positions(&body)?
            .into_iter()
            .find(|p| p.device_id == device.id)
            .ok_or(SyncError::MissingPosition {
                device_id: device.id,
                position_id,
            })?;
        let marker = self
            .avatars
            .resolve_marker(device.image_url.as_deref(), &device.category, device.status)
            .await;
        Ok(Point::merge(&device, &position, marker))
    }
}
