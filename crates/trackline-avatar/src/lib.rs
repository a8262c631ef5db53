// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content-addressed marker image cache for Trackline.
//!
//! Every device may carry a remote image URL. The first time a URL is needed the
//! image is fetched once and rendered into three sibling files (one per
//! [`RenderState`]), so that flipping a device between online and offline never
//! needs the network again.
//!
//! # Layout
//!
//! ```text
//! <root>/<AvatarKey>/orig.png
//! <root>/<AvatarKey>/active.png
//! <root>/<AvatarKey>/stale.png
//! ```
//!
//! [`AvatarKey`] is `BLAKE3(canonical_url || KEY_SALT)`, where the canonical URL
//! comes from [`ImageSource::canonical_url`]. It is a file naming scheme, not a
//! security boundary.
//!
//! # Publication Invariant
//!
//! An entry directory either holds all three variants or does not exist. Variants
//! are written to a staging directory that is renamed into place in one step.
//! Two callers racing on the same URL may both fetch; the second rename loses and
//! its staging copy is discarded. Duplicate work, never a partial entry.
//!
//! Devices without an image URL use bundled placeholder assets picked by category
//! and status; those never touch the cache.
#![forbid(unsafe_code)]

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use trackline_model::{DeviceStatus, MarkerRef, RenderState};

/// Salt mixed into every cache key.
pub const KEY_SALT: &[u8] = b"trackline/avatar/v1";

/// Categories that ship a dedicated placeholder asset.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "animal",
    "arrow",
    "bicycle",
    "boat",
    "bus",
    "car",
    "crane",
    "default",
    "helicopter",
    "motorcycle",
    "offroad",
    "person",
    "pickup",
    "plane",
    "scooter",
    "ship",
    "tractor",
    "train",
    "tram",
    "trolleybus",
    "truck",
    "van",
];

/// A 32-byte BLAKE3 cache key.
///
/// The `Display` impl renders lowercase hex; that string is the entry's
/// directory name.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AvatarKey(pub [u8; 32]);

impl AvatarKey {
    /// Key for a source URL.
    pub fn for_url(source_url: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_url.as_bytes());
        hasher.update(KEY_SALT);
        Self(*hasher.finalize().as_bytes())
    }
}

impl std::fmt::Display for AvatarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors that can occur while populating the cache.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    /// The source image could not be fetched.
    #[error("[AVATAR_FETCH] {url}: {reason}")]
    Fetch {
        /// URL that was requested.
        url: String,
        /// Transport-level reason.
        reason: String,
    },
    /// The fetched bytes are not a decodable image, or encoding failed.
    #[error("[AVATAR_IMAGE] {0}")]
    Image(String),
    /// Filesystem failure while writing the entry.
    #[error("[AVATAR_IO] {0}")]
    Io(std::io::Error),
    /// The blocking render task died.
    #[error("[AVATAR_TASK] {0}")]
    Task(String),
}

/// Port through which the cache fetches source images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the raw bytes behind `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AvatarError>;

    /// Absolute form of `url`, used for keying.
    ///
    /// Sources that accept server-relative URLs must resolve them here so the
    /// same path on two servers maps to two entries.
    fn canonical_url(&self, url: &str) -> String {
        url.to_string()
    }
}

/// File name of one variant inside an entry directory.
pub fn variant_file_name(state: RenderState) -> String {
    format!("{}.png", state.as_str())
}

/// Bundled placeholder for a category/status pair. Never touches the cache.
pub fn placeholder(category: &str, status: DeviceStatus) -> MarkerRef {
    let state = RenderState::for_status(status);
    let base = if KNOWN_CATEGORIES.contains(&category) {
        category
    } else {
        "placeholder"
    };
    MarkerRef::Placeholder(format!("markers/{base}_{state}"))
}

/// On-disk avatar cache. Cheap to clone; clones share the root and source.
#[derive(Clone)]
pub struct AvatarCache {
    root: PathBuf,
    source: Arc<dyn ImageSource>,
}

impl AvatarCache {
    /// Cache rooted at `root`, fetching misses through `source`.
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ImageSource>) -> Self {
        Self {
            root: root.into(),
            source,
        }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for a source URL (may not exist yet).
    ///
    /// Keyed on the source's canonical form of the URL.
    pub fn entry_dir(&self, source_url: &str) -> PathBuf {
        let canonical = self.source.canonical_url(source_url);
        self.root.join(AvatarKey::for_url(&canonical).to_string())
    }

    /// Path of a cached variant, if the entry has been published. No network access.
    pub fn lookup(&self, source_url: &str, state: RenderState) -> Option<PathBuf> {
        let path = self.entry_dir(source_url).join(variant_file_name(state));
        path.is_file().then_some(path)
    }

    /// Populate the entry for `source_url` unless it already exists.
    pub async fn ensure(&self, source_url: &str) -> Result<(), AvatarError> {
        let entry_dir = self.entry_dir(source_url);
        if render::entry_complete(&entry_dir) {
            return Ok(());
        }

        tracing::debug!(url = source_url, "fetching avatar source");
        let bytes = self.source.fetch(source_url).await?;

        let root = self.root.clone();
        tokio::task::spawn_blocking(move || render::publish_entry(&root, &entry_dir, &bytes))
            .await
            .map_err(|e| AvatarError::Task(e.to_string()))??;
        tracing::info!(url = source_url, "avatar cached");
        Ok(())
    }

    /// Cached variant for `status`, fetching and rendering on a miss.
    pub async fn resolve(
        &self,
        source_url: &str,
        status: DeviceStatus,
    ) -> Result<PathBuf, AvatarError> {
        let state = RenderState::for_status(status);
        if let Some(path) = self.lookup(source_url, state) {
            return Ok(path);
        }
        self.ensure(source_url).await?;
        self.lookup(source_url, state).ok_or_else(|| {
            AvatarError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "entry vanished after publication",
            ))
        })
    }

    /// Marker for a device without waiting on the network.
    ///
    /// Uses the cached variant when present, otherwise the category placeholder.
    pub fn marker_for(
        &self,
        image_url: Option<&str>,
        category: &str,
        status: DeviceStatus,
    ) -> MarkerRef {
        image_url
            .and_then(|url| self.lookup(url, RenderState::for_status(status)))
            .map_or_else(|| placeholder(category, status), MarkerRef::Cached)
    }

    /// Marker for a device, fetching its image if needed.
    ///
    /// A failed fetch degrades to the placeholder; markers are cosmetic.
    pub async fn resolve_marker(
        &self,
        image_url: Option<&str>,
        category: &str,
        status: DeviceStatus,
    ) -> MarkerRef {
        let Some(url) = image_url else {
            return placeholder(category, status);
        };
        match self.resolve(url, status).await {
            Ok(path) => MarkerRef::Cached(path),
            Err(err) => {
                tracing::warn!(url, %err, "avatar unavailable; using placeholder");
                placeholder(category, status)
            }
        }
    }
}
