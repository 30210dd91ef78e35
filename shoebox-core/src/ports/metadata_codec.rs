use std::path::Path;

use shoebox_model::{MetadataSnapshot, Orientation, TransformAction};

use crate::error::Result;

/// Reads and writes the metadata embedded in image files and applies
/// lossless pixel transforms.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataCodec: Send + Sync {
    fn read_embedded(&self, path: &Path) -> Result<MetadataSnapshot>;

    /// Returns whether the file was actually modified.
    fn write_embedded(&self, path: &Path, snapshot: &MetadataSnapshot) -> Result<bool>;

    /// `Ok(false)` means the codec could not write the tag.
    fn write_orientation(&self, path: &Path, orientation: Orientation) -> Result<bool>;

    /// `Ok(false)` means the transform was not possible for this file.
    fn apply_pixel_transform(&self, path: &Path, action: TransformAction) -> Result<bool>;
}
