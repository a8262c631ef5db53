// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core data model for Trackline.
//!
//! Two kinds of facts arrive from the tracking server: slowly changing
//! [`Device`] records and timestamped [`PositionFact`]s. Neither is shown on its
//! own. Consumers only ever see a [`Point`], which is always derived by merging
//! the latest device fact with the latest position fact for one identifier.
//!
//! The JSON shapes used by the REST listing and the WebSocket stream live in
//! [`wire`].

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod wire;

/// Server-assigned device identifier. Never reused within a cache lifetime.
pub type DeviceId = i64;

/// Server-assigned position record identifier.
pub type PositionId = i64;

/// Connectivity status reported for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device is currently reporting.
    Online,
    /// Device has disconnected.
    Offline,
    /// Status not known (or a value this client does not recognise).
    #[default]
    Unknown,
}

impl DeviceStatus {
    /// Parse a status string; anything unrecognised maps to [`DeviceStatus::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }

    /// A device is stale whenever it is not online.
    pub fn is_stale(self) -> bool {
        self != Self::Online
    }

    /// Wire spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which visual variant of a marker image is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderState {
    /// The image exactly as fetched.
    Original,
    /// Rendering used while the device is online.
    Active,
    /// Desaturated rendering used while the device is not online.
    Stale,
}

impl RenderState {
    /// Every state, in the order cache entries are written.
    pub const ALL: [Self; 3] = [Self::Original, Self::Active, Self::Stale];

    /// Render state implied by a device status. `Original` is never implied.
    pub fn for_status(status: DeviceStatus) -> Self {
        if status.is_stale() {
            Self::Stale
        } else {
            Self::Active
        }
    }

    /// Short name used in cache file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "orig",
            Self::Active => "active",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slowly changing identity/status record for a tracked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable identifier.
    pub id: DeviceId,
    /// Display name.
    pub name: String,
    /// Category (e.g. `car`, `person`); `default` when the server sends none.
    pub category: String,
    /// Connectivity status.
    pub status: DeviceStatus,
    /// Optional remote marker image.
    pub image_url: Option<String>,
    /// Latest position record the server knows about, if the device ever reported one.
    pub position_id: Option<PositionId>,
}

/// A timestamped coordinate for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFact {
    /// Identifier of this position record.
    pub id: PositionId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Device-reported fix time.
    pub time: DateTime<Utc>,
}

/// Reference to the image a presentation layer should draw for a point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerRef {
    /// A rendered variant on local durable storage.
    Cached(PathBuf),
    /// A bundled static asset, addressed by name.
    Placeholder(String),
}

impl MarkerRef {
    /// Whether this marker lives in the avatar cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

impl fmt::Display for MarkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached(path) => write!(f, "file://{}", path.display()),
            Self::Placeholder(asset) => write!(f, "asset:{asset}"),
        }
    }
}

/// The externally visible merged view of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Display name.
    pub name: String,
    /// Device category.
    pub category: String,
    /// Connectivity status.
    pub status: DeviceStatus,
    /// Latitude of the latest known position.
    pub latitude: f64,
    /// Longitude of the latest known position.
    pub longitude: f64,
    /// Time of the latest known position.
    pub time: DateTime<Utc>,
    /// Marker image matching the point's staleness.
    pub marker: MarkerRef,
}

impl Point {
    /// Merge a device fact with its position fact.
    ///
    /// The caller picks `marker` for the device's current render state; the
    /// position is expected to belong to `device` (callers pair by id).
    pub fn merge(device: &Device, position: &PositionFact, marker: MarkerRef) -> Self {
        debug_assert_eq!(device.id, position.device_id);
        Self {
            device_id: device.id,
            name: device.name.clone(),
            category: device.category.clone(),
            status: device.status,
            latitude: position.latitude,
            longitude: position.longitude,
            time: position.time,
            marker,
        }
    }

    /// A point is stale iff its device is not online.
    pub fn is_stale(&self) -> bool {
        self.status.is_stale()
    }

    /// Render state the marker must match.
    pub fn render_state(&self) -> RenderState {
        RenderState::for_status(self.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device(status: DeviceStatus) -> Device {
        Device {
            id: 3,
            name: "van 3".into(),
            category: "van".into(),
            status,
            image_url: None,
            position_id: Some(11),
        }
    }

    #[test]
    fn unknown_status_strings_parse_as_unknown() {
        assert_eq!(DeviceStatus::parse("online"), DeviceStatus::Online);
        assert_eq!(DeviceStatus::parse("offline"), DeviceStatus::Offline);
        assert_eq!(DeviceStatus::parse("sleeping"), DeviceStatus::Unknown);
        assert_eq!(DeviceStatus::parse(""), DeviceStatus::Unknown);
    }

    #[test]
    fn staleness_drives_render_state() {
        assert_eq!(RenderState::for_status(DeviceStatus::Online), RenderState::Active);
        assert_eq!(RenderState::for_status(DeviceStatus::Offline), RenderState::Stale);
        assert_eq!(RenderState::for_status(DeviceStatus::Unknown), RenderState::Stale);
    }

    #[test]
    fn merge_takes_identity_from_device_and_coordinates_from_position() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let pos = PositionFact {
            id: 11,
            device_id: 3,
            latitude: 42.6744,
            longitude: 23.33044,
            time,
        };
        let point = Point::merge(
            &device(DeviceStatus::Offline),
            &pos,
            MarkerRef::Placeholder("van_stale".into()),
        );
        assert_eq!(point.device_id, 3);
        assert_eq!(point.name, "van 3");
        assert_eq!(point.latitude, 42.6744);
        assert_eq!(point.time, time);
        assert!(point.is_stale());
        assert_eq!(point.render_state(), RenderState::Stale);
    }

    #[test]
    fn marker_display_distinguishes_files_from_assets() {
        let file = MarkerRef::Cached(PathBuf::from("/tmp/a/active.png"));
        let asset = MarkerRef::Placeholder("markers/car_active".into());
        assert_eq!(file.to_string(), "file:///tmp/a/active.png");
        assert_eq!(asset.to_string(), "asset:markers/car_active");
        assert!(file.is_cached());
        assert!(!asset.is_cached());
    }
}
