use std::path::{Path, PathBuf};

use crate::ids::{AlbumId, ImageId};

/// Transient handle to one library item as passed through pipeline jobs.
///
/// The record store owns the authoritative row; this copy only carries what
/// the pipeline needs to route work and to name the item in failure lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageRecord {
    pub id: ImageId,
    pub path: PathBuf,
    pub album_id: AlbumId,
}

impl ImageRecord {
    pub fn new(id: ImageId, path: impl Into<PathBuf>, album_id: AlbumId) -> Self {
        Self {
            id,
            path: path.into(),
            album_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name shown to users when this item fails: the file name, or the whole
    /// path when it has none.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_file_name() {
        let record = ImageRecord::new(ImageId(3), "/photos/2024/beach.jpg", AlbumId(1));
        assert_eq!(record.display_name(), "beach.jpg");
    }

    #[test]
    fn display_name_falls_back_to_path() {
        let record = ImageRecord::new(ImageId(3), "/", AlbumId(1));
        assert_eq!(record.display_name(), "/");
    }
}
