// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Variant rendering and all-or-nothing publication of cache entries.

use std::fs;
use std::io;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use trackline_model::RenderState;

use crate::{variant_file_name, AvatarError};

/// Derive the image for one render state.
///
/// `Original` and `Active` are the source unchanged; `Stale` drops all
/// saturation but keeps transparency.
pub(crate) fn render_variant(source: &DynamicImage, state: RenderState) -> DynamicImage {
    match state {
        RenderState::Original | RenderState::Active => source.clone(),
        RenderState::Stale => DynamicImage::ImageRgba8(source.grayscale().to_rgba8()),
    }
}

/// Decode `bytes`, write every variant into a staging directory under `root`,
/// then rename the staging directory to `entry_dir` in one step.
///
/// If another writer published `entry_dir` first, its entry is kept and this
/// one is discarded.
pub(crate) fn publish_entry(root: &Path, entry_dir: &Path, bytes: &[u8]) -> Result<(), AvatarError> {
    let source = image::load_from_memory(bytes)?;

    fs::create_dir_all(root)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(root)?;
    for state in RenderState::ALL {
        let path = staging.path().join(variant_file_name(state));
        render_variant(&source, state).save_with_format(&path, ImageFormat::Png)?;
    }

    match fs::rename(staging.path(), entry_dir) {
        Ok(()) => Ok(()),
        Err(err) if entry_complete(entry_dir) => {
            tracing::debug!(?err, entry = %entry_dir.display(), "entry published concurrently; keeping existing");
            Ok(())
        }
        Err(err) => Err(AvatarError::Io(err)),
    }
    // `staging` is removed on drop when the rename did not consume it
}

pub(crate) fn entry_complete(entry_dir: &Path) -> bool {
    RenderState::ALL
        .iter()
        .all(|&s| entry_dir.join(variant_file_name(s)).is_file())
}

impl From<image::ImageError> for AvatarError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => Self::Io(e),
            other => Self::Image(other.to_string()),
        }
    }
}

impl From<io::Error> for AvatarError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn stale_variant_is_grey_and_keeps_alpha() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 255, 40]));
        let source = DynamicImage::ImageRgba8(img);

        let stale = render_variant(&source, RenderState::Stale).to_rgba8();
        for px in stale.pixels() {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
        assert_eq!(stale.get_pixel(1, 0)[3], 40);

        let active = render_variant(&source, RenderState::Active).to_rgba8();
        assert_eq!(active.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn undecodable_bytes_publish_nothing() {
        let root = tempfile::tempdir().unwrap();
        let entry = root.path().join("abc");
        let err = publish_entry(root.path(), &entry, b"not an image").unwrap_err();
        assert!(matches!(err, AvatarError::Image(_)));
        assert!(!entry.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
