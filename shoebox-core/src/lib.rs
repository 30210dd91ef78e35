//! # shoebox-core
//!
//! File action pipeline for a shared photo library. High-level intents
//! ("tag these 5,000 photos", "rotate these images") become record-store
//! mutations on a single database actor and, where the change touches
//! file-relevant fields, embedded-metadata rewrites on a small pool of file
//! workers. Callers never block except while draining on shutdown.
//!
//! ## Architecture
//!
//! - [`pipeline::FileActionPipeline`]: public entry point, one method per intent
//! - [`pipeline::database_stage`]: single-concurrency record mutation actor
//! - [`pipeline::file_stage`]: worker pool performing on-disk rewrites
//! - [`pipeline::progress`]: weighted progress and drain detection
//! - [`ports`]: collaborator traits (record store, metadata codec, cache
//!   invalidation, rescan)
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shoebox_core::pipeline::{FileActionPipelineBuilder, PipelineConfig};
//! use shoebox_core::ports::{CacheInvalidation, MetadataCodec, RecordStore, RescanTrigger};
//! use shoebox_model::{ImageRecord, TagId};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn tag_and_drain(
//!     store: Arc<dyn RecordStore>,
//!     codec: Arc<dyn MetadataCodec>,
//!     cache: Arc<dyn CacheInvalidation>,
//!     rescan: Arc<dyn RescanTrigger>,
//!     photos: Vec<ImageRecord>,
//! ) -> shoebox_core::error::Result<()> {
//!     let pipeline = FileActionPipelineBuilder::new(PipelineConfig::default())
//!         .with_store(store)
//!         .with_codec(codec)
//!         .with_cache_invalidation(cache)
//!         .with_rescan(rescan)
//!         .start()?;
//!
//!     pipeline.assign_tags(photos, vec![TagId(7)])?;
//!     pipeline.request_shutdown(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Error type shared by the pipeline and its collaborator ports
pub mod error;
/// The file action pipeline: stages, shared primitives and the orchestrator
pub mod pipeline;
/// Interfaces of the external collaborators the pipeline drives
pub mod ports;

pub use error::{PipelineError, Result};
