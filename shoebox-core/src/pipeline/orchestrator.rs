//! Public entry point of the pipeline.
//!
//! [`FileActionPipeline`] owns both stages. Every intent method is
//! synchronous and returns as soon as the work is queued; completion is
//! observed through [`FileActionPipeline::subscribe`] or the lifecycle watch.

use std::{fmt, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use shoebox_model::{
    ColorLabel, ImageRecord, MetadataSnapshot, Orientation, PickLabel, Rating, TagId,
    TransformAction,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::ports::{CacheInvalidation, MetadataCodec, RecordStore, RescanTrigger};

use super::{
    config::PipelineConfig,
    database_stage::{DatabaseStage, DatabaseStageContext},
    events::{PipelineEvent, PipelineEventBus, ProgressUpdate},
    file_stage::{FileStageContext, FileStageHandle, spawn_file_stage},
    job::{DatabaseOperation, FileOperation, Job, JobId, WriteCandidate},
    pending::PendingWriteSet,
    progress::{PipelineState, ProgressAggregator, ProgressSnapshot},
};

/// How a shutdown request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All outstanding work finished before the pipeline stopped.
    Drained,
    /// The caller gave up waiting; unstarted work was dropped.
    Cancelled,
}

/// Builder for [`FileActionPipeline`].
pub struct FileActionPipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn RecordStore>>,
    codec: Option<Arc<dyn MetadataCodec>>,
    cache: Option<Arc<dyn CacheInvalidation>>,
    rescan: Option<Arc<dyn RescanTrigger>>,
}

impl fmt::Debug for FileActionPipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileActionPipelineBuilder")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("has_codec", &self.codec.is_some())
            .field("has_cache", &self.cache.is_some())
            .field("has_rescan", &self.rescan.is_some())
            .finish()
    }
}

impl FileActionPipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            store: None,
            codec: None,
            cache: None,
            rescan: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MetadataCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_cache_invalidation(mut self, cache: Arc<dyn CacheInvalidation>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rescan(mut self, rescan: Arc<dyn RescanTrigger>) -> Self {
        self.rescan = Some(rescan);
        self
    }

    /// Validates the configuration and spawns both stages on the current
    /// Tokio runtime.
    pub fn start(self) -> Result<FileActionPipeline> {
        let FileActionPipelineBuilder {
            config,
            store,
            codec,
            cache,
            rescan,
        } = self;

        config.validate()?;
        let store =
            store.ok_or_else(|| PipelineError::Internal("record store dependency missing".into()))?;
        let codec = codec
            .ok_or_else(|| PipelineError::Internal("metadata codec dependency missing".into()))?;
        let cache = cache.ok_or_else(|| {
            PipelineError::Internal("cache invalidation dependency missing".into())
        })?;
        let rescan = rescan
            .ok_or_else(|| PipelineError::Internal("rescan trigger dependency missing".into()))?;
        let runtime = Handle::try_current().map_err(|err| {
            PipelineError::Internal(format!("pipeline must start inside a Tokio runtime: {err}"))
        })?;

        let events = Arc::new(PipelineEventBus::new(config.event_channel_capacity));
        let progress = Arc::new(ProgressAggregator::new(
            Arc::clone(&events),
            config.db_progress_stride,
        ));
        let pending = PendingWriteSet::new();
        let shutdown = CancellationToken::new();
        let parallelism = config.optimal_file_workers();

        let file_context = Arc::new(FileStageContext::new(
            Arc::clone(&store),
            codec,
            cache,
            rescan,
            pending.clone(),
            Arc::clone(&progress),
            Arc::clone(&events),
        ));
        let (files, mut handles) = spawn_file_stage(
            &runtime,
            file_context,
            parallelism,
            config.worker_queue_capacity,
            shutdown.clone(),
        );

        let (db_tx, db_rx) = mpsc::unbounded_channel();
        let db_context = Arc::new(DatabaseStageContext::new(
            store,
            pending.clone(),
            Arc::clone(&progress),
            Arc::clone(&events),
            config.metadata_write_policy,
            config.transaction_lift_interval(),
        ));
        let database = DatabaseStage::new(db_context, db_rx, files.clone(), shutdown.clone());
        handles.push(runtime.spawn(database.run()));
        handles.push(runtime.spawn(
            Arc::clone(&progress).run_idle_monitor(config.idle_grace(), shutdown.clone()),
        ));

        info!(
            target: "shoebox::pipeline",
            file_workers = parallelism,
            write_policy = ?config.metadata_write_policy,
            "file action pipeline started"
        );

        Ok(FileActionPipeline {
            inner: Arc::new(PipelineInner {
                config,
                runtime,
                events,
                progress,
                pending,
                db_inbox: Mutex::new(Some(db_tx)),
                files,
                shutdown,
                handles: Mutex::new(handles),
            }),
        })
    }
}

struct PipelineInner {
    config: PipelineConfig,
    runtime: Handle,
    events: Arc<PipelineEventBus>,
    progress: Arc<ProgressAggregator>,
    pending: PendingWriteSet,
    /// `None` once shutdown has begun.
    db_inbox: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    files: FileStageHandle,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Batch metadata-mutation pipeline. Cheap to clone; all clones drive the
/// same stages.
#[derive(Clone)]
pub struct FileActionPipeline {
    inner: Arc<PipelineInner>,
}

impl fmt::Debug for FileActionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileActionPipeline")
            .field("config", &self.inner.config)
            .field("lifecycle", &self.inner.progress.lifecycle())
            .field("progress", &self.inner.progress.snapshot())
            .field("pending_writes", &self.inner.pending.len())
            .field("file_stage", &self.inner.files)
            .finish_non_exhaustive()
    }
}

impl FileActionPipeline {
    pub fn assign_tags(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        tags: impl IntoIterator<Item = TagId>,
    ) -> Result<()> {
        let tags = tags.into_iter().collect();
        self.schedule_database(DatabaseOperation::AssignTags(tags), records)
    }

    pub fn remove_tags(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        tags: impl IntoIterator<Item = TagId>,
    ) -> Result<()> {
        let tags = tags.into_iter().collect();
        self.schedule_database(DatabaseOperation::RemoveTags(tags), records)
    }

    pub fn assign_pick_label(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        label: PickLabel,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::AssignPickLabel(label), records)
    }

    pub fn assign_color_label(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        label: ColorLabel,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::AssignColorLabel(label), records)
    }

    pub fn assign_rating(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        rating: Rating,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::AssignRating(rating), records)
    }

    /// Makes `leader` the group leader of every record. The leader itself
    /// may be part of `records` and is left alone.
    pub fn add_to_group(
        &self,
        leader: ImageRecord,
        records: impl IntoIterator<Item = ImageRecord>,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::AddToGroup { leader }, records)
    }

    pub fn remove_from_group(&self, records: impl IntoIterator<Item = ImageRecord>) -> Result<()> {
        self.schedule_database(DatabaseOperation::RemoveFromGroup, records)
    }

    pub fn ungroup(&self, records: impl IntoIterator<Item = ImageRecord>) -> Result<()> {
        self.schedule_database(DatabaseOperation::Ungroup, records)
    }

    pub fn set_exif_orientation(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        orientation: Orientation,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::SetExifOrientation(orientation), records)
    }

    /// Replaces the stored metadata of every record with `snapshot` and
    /// writes that snapshot into the files.
    pub fn apply_metadata(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        snapshot: MetadataSnapshot,
    ) -> Result<()> {
        self.schedule_database(DatabaseOperation::ApplyMetadata(Arc::new(snapshot)), records)
    }

    /// Rotates or flips the pixel data. Goes straight to the file stage.
    pub fn transform(
        &self,
        records: impl IntoIterator<Item = ImageRecord>,
        action: TransformAction,
    ) -> Result<()> {
        self.schedule_files(FileOperation::Transform(action), records.into_iter().collect())
    }

    /// Copies the record's attributes onto files derived from it, rescanning
    /// each derived file first.
    pub fn copy_attributes(
        &self,
        record: ImageRecord,
        derived_paths: impl IntoIterator<Item = PathBuf>,
    ) -> Result<()> {
        let derived_paths: Vec<PathBuf> = derived_paths.into_iter().collect();
        if derived_paths.is_empty() {
            return Ok(());
        }
        self.schedule_files(FileOperation::CopyAttributes { derived_paths }, vec![record])
    }

    /// Whether any stage still has outstanding work.
    pub fn is_active(&self) -> bool {
        self.inner.progress.has_outstanding()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.progress.snapshot()
    }

    pub fn lifecycle(&self) -> PipelineState {
        self.inner.progress.lifecycle()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<PipelineState> {
        self.inner.progress.subscribe_lifecycle()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Number of records whose file rewrite is queued but not yet started.
    pub fn pending_writes(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Waits until both stages drain or `cancel` fires, then stops the
    /// pipeline. Further intents fail with [`PipelineError::ShutDown`].
    pub async fn request_shutdown(&self, cancel: CancellationToken) -> ShutdownOutcome {
        self.request_shutdown_with_progress(cancel, |_| {}).await
    }

    /// Like [`Self::request_shutdown`], reporting progress while waiting.
    pub async fn request_shutdown_with_progress<F>(
        &self,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> ShutdownOutcome
    where
        F: FnMut(&ProgressUpdate),
    {
        info!(target: "shoebox::pipeline", "shutdown requested");
        let mut lifecycle = self.inner.progress.subscribe_lifecycle();
        let mut events = self.inner.events.subscribe();

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break ShutdownOutcome::Cancelled,
                _ = lifecycle.wait_for(|state| *state != PipelineState::Active) => {
                    break ShutdownOutcome::Drained;
                }
                event = events.recv() => match event {
                    Ok(PipelineEvent::Progress(update)) => on_progress(&update),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break ShutdownOutcome::Drained,
                },
            }
        };

        self.deactivate().await;
        info!(target: "shoebox::pipeline", outcome = ?outcome, "file action pipeline shut down");
        outcome
    }

    async fn deactivate(&self) {
        self.inner.shutdown.cancel();
        self.inner.db_inbox.lock().take();
        self.inner.progress.mark_shut_down();

        let handles = std::mem::take(&mut *self.inner.handles.lock());
        let timeout = self.inner.config.shutdown_join_timeout();
        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: "shoebox::pipeline", error = %err, "pipeline task ended abnormally");
                }
                Err(_) => {
                    warn!(
                        target: "shoebox::pipeline",
                        timeout = ?timeout,
                        "pipeline task did not stop in time"
                    );
                }
            }
        }
    }

    fn schedule_database(
        &self,
        operation: DatabaseOperation,
        records: impl IntoIterator<Item = ImageRecord>,
    ) -> Result<()> {
        let records: Vec<ImageRecord> = records.into_iter().collect();
        if records.is_empty() {
            return Ok(());
        }

        // Sending under the lock keeps submission order identical to the
        // order in which callers were admitted.
        let inbox = self.inner.db_inbox.lock();
        let Some(sender) = inbox.as_ref() else {
            return Err(PipelineError::ShutDown);
        };

        let job = Job::new(operation, records);
        let (job_id, operation, count) = (job.id, job.operation.name(), job.len());
        self.inner.progress.scheduled_for_db(count);
        if sender.send(job).is_err() {
            self.inner.progress.db_unscheduled(count);
            return Err(PipelineError::ShutDown);
        }

        debug!(
            target: "shoebox::pipeline",
            job_id = %job_id,
            operation,
            records = count,
            "queued database job"
        );
        Ok(())
    }

    fn schedule_files(&self, operation: FileOperation, records: Vec<ImageRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(PipelineError::ShutDown);
        }

        let candidate = WriteCandidate::new(JobId::new(), operation, records);
        debug!(
            target: "shoebox::pipeline",
            job_id = %candidate.job_id,
            operation = candidate.operation.name(),
            records = candidate.len(),
            "queued file job"
        );

        self.inner.progress.scheduled_for_write(candidate.len());
        let files = self.inner.files.clone();
        self.inner
            .runtime
            .spawn(async move { files.dispatch(candidate).await });
        Ok(())
    }
}
