use std::path::Path;

use crate::error::Result;

/// Told once per successfully rewritten file so thumbnails and decoded
/// previews can be dropped.
pub trait CacheInvalidation: Send + Sync {
    fn notify_file_changed(&self, path: &Path);
}

/// Re-reads a file into the record store after its content changed so the
/// cached size and hash stay consistent.
pub trait RescanTrigger: Send + Sync {
    fn rescan_file(&self, path: &Path) -> Result<()>;
}
