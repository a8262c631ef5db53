// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON wire schema of the tracking server.
//!
//! The same record shapes appear in three places:
//!
//! * `GET /api/devices` returns a JSON array of [`DeviceRecord`]s;
//! * `GET /api/positions?id=N` returns a JSON array of [`PositionRecord`]s;
//! * every WebSocket text frame is a [`SocketFrame`]: an object that may carry a
//!   `devices` array, a `positions` array, both, or neither. Other keys (the
//!   server also pushes `events`) are ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Device, DeviceId, DeviceStatus, PositionFact, PositionId};

/// Category used when the server leaves `category` empty or null.
pub const DEFAULT_CATEGORY: &str = "default";

/// Attribute key carrying a device's custom marker image.
pub const IMAGE_URL_ATTRIBUTE: &str = "image_url";

/// Decoding failure for a server payload.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The payload is not valid JSON or misses a required field.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Device record as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Device identifier.
    pub id: DeviceId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Category; may be absent or null.
    #[serde(default)]
    pub category: Option<String>,
    /// Status string (`online`, `offline`, `unknown`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Latest position record; `0` or absent when the device never reported.
    #[serde(default)]
    pub position_id: Option<PositionId>,
    /// Free-form attributes; `image_url` is the one this client reads.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl DeviceRecord {
    /// Convert into the domain [`Device`].
    pub fn into_device(self) -> Device {
        let image_url = self
            .attributes
            .get(IMAGE_URL_ATTRIBUTE)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let category = self
            .category
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_owned());
        Device {
            id: self.id,
            name: self.name,
            category,
            status: self
                .status
                .as_deref()
                .map_or(DeviceStatus::Unknown, DeviceStatus::parse),
            image_url,
            position_id: self.position_id.filter(|&id| id > 0),
        }
    }
}

/// Position record as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    /// Position record identifier.
    #[serde(default)]
    pub id: PositionId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Device-reported fix time (ISO-8601).
    pub device_time: DateTime<Utc>,
}

impl From<PositionRecord> for PositionFact {
    fn from(r: PositionRecord) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            latitude: r.latitude,
            longitude: r.longitude,
            time: r.device_time,
        }
    }
}

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SocketFrame {
    /// Device facts carried by the frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceRecord>,
    /// Position facts carried by the frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<PositionRecord>,
}

impl SocketFrame {
    /// True when the frame carries neither devices nor positions.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.positions.is_empty()
    }
}

/// Decode a WebSocket text frame.
pub fn decode_frame(text: &str) -> Result<SocketFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode the `GET /api/devices` body.
pub fn decode_devices(bytes: &[u8]) -> Result<Vec<Device>, WireError> {
    let records: Vec<DeviceRecord> = serde_json::from_slice(bytes)?;
    Ok(records.into_iter().map(DeviceRecord::into_device).collect())
}

/// Decode the `GET /api/positions` body.
pub fn decode_positions(bytes: &[u8]) -> Result<Vec<PositionFact>, WireError> {
    let records: Vec<PositionRecord> = serde_json::from_slice(bytes)?;
    Ok(records.into_iter().map(PositionFact::from).collect())
}
