//! Collaborator interfaces consumed by the pipeline.
//!
//! All calls are synchronous; the pipeline invokes them from blocking worker
//! threads, never from the async executor.

mod cache;
mod metadata_codec;
mod record_store;

pub use cache::{CacheInvalidation, RescanTrigger};
pub use metadata_codec::MetadataCodec;
pub use record_store::RecordStore;

#[cfg(test)]
pub use metadata_codec::MockMetadataCodec;
#[cfg(test)]
pub use record_store::MockRecordStore;
