//! Fixed pool of workers that carry out on-disk actions.
//!
//! A write candidate is split into at most `parallelism` chunks and each chunk
//! is queued on a different worker. Records inside a chunk are handled in
//! order; a failing record never stops its chunk.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use shoebox_model::{FieldUpdate, ImageRecord, Orientation, TransformAction};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{PipelineError, Result};
use crate::ports::{CacheInvalidation, MetadataCodec, RecordStore, RescanTrigger};

use super::{
    events::{FailureNotice, PipelineEvent, PipelineEventBus},
    job::{FileOperation, JobId, WriteCandidate},
    pending::{InFlightWrites, PendingWriteSet},
    progress::ProgressAggregator,
    splitter::TaskSplitter,
};

/// Tracks the chunks of one write candidate so the batch is retired exactly
/// once, by whichever chunk finishes last.
#[derive(Debug)]
struct BatchTracker {
    job_id: JobId,
    total: usize,
    remaining_chunks: AtomicUsize,
}

impl BatchTracker {
    fn new(job_id: JobId, total: usize, chunks: usize) -> Self {
        Self {
            job_id,
            total,
            remaining_chunks: AtomicUsize::new(chunks),
        }
    }

    /// Returns true for the last chunk.
    fn chunk_done(&self) -> bool {
        self.remaining_chunks.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// One contiguous slice of a write candidate.
#[derive(Debug)]
pub struct FileTask {
    batch: Arc<BatchTracker>,
    operation: Arc<FileOperation>,
    records: Vec<ImageRecord>,
}

/// Collaborators and shared state used by every worker.
pub struct FileStageContext {
    store: Arc<dyn RecordStore>,
    codec: Arc<dyn MetadataCodec>,
    cache: Arc<dyn CacheInvalidation>,
    rescan: Arc<dyn RescanTrigger>,
    pending: PendingWriteSet,
    in_flight: InFlightWrites,
    progress: Arc<ProgressAggregator>,
    events: Arc<PipelineEventBus>,
}

impl fmt::Debug for FileStageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStageContext")
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl FileStageContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: Arc<dyn MetadataCodec>,
        cache: Arc<dyn CacheInvalidation>,
        rescan: Arc<dyn RescanTrigger>,
        pending: PendingWriteSet,
        progress: Arc<ProgressAggregator>,
        events: Arc<PipelineEventBus>,
    ) -> Self {
        Self {
            store,
            codec,
            cache,
            rescan,
            pending,
            in_flight: InFlightWrites::new(),
            progress,
            events,
        }
    }

    /// Runs one chunk to completion and returns the display names of the
    /// records that failed.
    fn process_chunk(&self, task: &FileTask) -> Vec<String> {
        let operation = task.operation.as_ref();
        let mut failed = Vec::new();

        for record in &task.records {
            let writing = self.in_flight.acquire(record.id);
            if operation.clears_pending_guard() {
                self.pending.begin_write(record.id);
            }

            let outcome = self.perform(operation, record);
            drop(writing);
            match outcome {
                Ok(touched) => {
                    for path in &touched {
                        self.cache.notify_file_changed(path);
                    }
                    trace!(
                        target: "shoebox::files",
                        image_id = %record.id,
                        operation = operation.name(),
                        touched = touched.len(),
                        "file action finished"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "shoebox::files",
                        job_id = %task.batch.job_id,
                        image_id = %record.id,
                        path = %record.path().display(),
                        operation = operation.name(),
                        error = %err,
                        "file action failed"
                    );
                    failed.push(record.display_name());
                }
            }

            self.progress.written_to_one();
        }

        failed
    }

    /// Performs the action for one record and returns the paths whose
    /// contents changed.
    fn perform(&self, operation: &FileOperation, record: &ImageRecord) -> Result<Vec<PathBuf>> {
        match operation {
            FileOperation::WriteMetadata => self.write_metadata(record),
            FileOperation::WriteOrientation(orientation) => {
                self.write_orientation(record, *orientation)
            }
            FileOperation::Transform(action) => self.transform(record, *action),
            FileOperation::CopyAttributes { derived_paths } => {
                self.copy_attributes(record, derived_paths)
            }
        }
    }

    fn write_metadata(&self, record: &ImageRecord) -> Result<Vec<PathBuf>> {
        let snapshot = self.store.load(record.id)?;
        if !self.codec.write_embedded(record.path(), &snapshot)? {
            return Ok(Vec::new());
        }
        self.rescan_after_write(record);
        Ok(vec![record.path.clone()])
    }

    fn write_orientation(
        &self,
        record: &ImageRecord,
        orientation: Orientation,
    ) -> Result<Vec<PathBuf>> {
        if !self.codec.write_orientation(record.path(), orientation)? {
            return Err(PipelineError::Codec(format!(
                "orientation {orientation:?} was not written"
            )));
        }
        self.rescan_after_write(record);
        Ok(vec![record.path.clone()])
    }

    fn transform(&self, record: &ImageRecord, action: TransformAction) -> Result<Vec<PathBuf>> {
        let action = if action.is_auto() {
            let embedded = self.codec.read_embedded(record.path())?;
            match TransformAction::for_orientation(embedded.orientation) {
                Some(action) => action,
                None => return Ok(Vec::new()),
            }
        } else {
            action
        };

        if !self.codec.apply_pixel_transform(record.path(), action)? {
            return Err(PipelineError::Codec(format!(
                "{action:?} could not be applied"
            )));
        }
        self.store
            .write_partial(record.id, &FieldUpdate::Orientation(Orientation::Normal))?;
        self.rescan_after_write(record);
        Ok(vec![record.path.clone()])
    }

    fn copy_attributes(
        &self,
        record: &ImageRecord,
        derived_paths: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        for derived in derived_paths {
            self.rescan.rescan_file(derived)?;
            self.store.copy_attributes(record.id, derived)?;
        }
        Ok(derived_paths.to_vec())
    }

    /// The write itself succeeded, so a failed rescan only leaves the record
    /// stale until the next scan.
    fn rescan_after_write(&self, record: &ImageRecord) {
        if let Err(err) = self.rescan.rescan_file(record.path()) {
            warn!(
                target: "shoebox::files",
                image_id = %record.id,
                error = %err,
                "rescan after write failed"
            );
        }
    }

    fn report_failures(&self, task: &FileTask, failed: Vec<String>) {
        if failed.is_empty() {
            return;
        }
        self.events
            .publish(PipelineEvent::Failure(FailureNotice::new(
                task.batch.job_id,
                task.operation.failure_message(),
                failed,
            )));
    }

    fn complete_chunk(&self, batch: &BatchTracker) {
        if batch.chunk_done() {
            self.progress.writer_finished(batch.total);
        }
    }

    /// Accounts for a chunk that will never run. Guards taken for it are
    /// released so the ids can be scheduled again.
    fn abandon(&self, task: FileTask) {
        debug!(
            target: "shoebox::files",
            job_id = %task.batch.job_id,
            records = task.records.len(),
            "dropping unstarted file chunk"
        );
        if task.operation.clears_pending_guard() {
            self.pending
                .release_all(task.records.iter().map(|record| &record.id));
        }
        for _ in &task.records {
            self.progress.written_to_one();
        }
        self.complete_chunk(&task.batch);
    }
}

/// Cloneable entry point used to queue work on the pool.
#[derive(Clone)]
pub struct FileStageHandle {
    workers: Arc<[mpsc::Sender<FileTask>]>,
    next: Arc<AtomicUsize>,
    context: Arc<FileStageContext>,
    shutdown: CancellationToken,
}

impl fmt::Debug for FileStageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStageHandle")
            .field("parallelism", &self.workers.len())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl FileStageHandle {
    pub fn parallelism(&self) -> usize {
        self.workers.len()
    }

    /// Splits the candidate and queues its chunks. The caller has already
    /// counted the candidate's records as scheduled for writing.
    pub async fn dispatch(&self, candidate: WriteCandidate) {
        let WriteCandidate {
            job_id,
            operation,
            records,
        } = candidate;
        if records.is_empty() {
            return;
        }

        let total = records.len();
        let chunks: Vec<Vec<ImageRecord>> =
            TaskSplitter::new(records, self.parallelism()).collect();
        let batch = Arc::new(BatchTracker::new(job_id, total, chunks.len()));
        let start = self.next.fetch_add(chunks.len(), Ordering::Relaxed);

        debug!(
            target: "shoebox::files",
            job_id = %job_id,
            operation = operation.name(),
            records = total,
            chunks = chunks.len(),
            "dispatching file batch"
        );

        for (offset, records) in chunks.into_iter().enumerate() {
            let task = FileTask {
                batch: Arc::clone(&batch),
                operation: Arc::clone(&operation),
                records,
            };
            if self.shutdown.is_cancelled() {
                self.context.abandon(task);
                continue;
            }
            let worker = &self.workers[(start + offset) % self.workers.len()];
            if let Err(mpsc::error::SendError(task)) = worker.send(task).await {
                self.context.abandon(task);
            }
        }
    }
}

struct FileWorker {
    index: usize,
    inbox: mpsc::Receiver<FileTask>,
    context: Arc<FileStageContext>,
    shutdown: CancellationToken,
}

impl FileWorker {
    async fn run(mut self) {
        debug!(target: "shoebox::files", worker = self.index, "file worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = self.inbox.recv() => match task {
                    Some(task) => self.handle(task).await,
                    None => break,
                },
            }
        }

        self.inbox.close();
        while let Ok(task) = self.inbox.try_recv() {
            self.context.abandon(task);
        }
        debug!(target: "shoebox::files", worker = self.index, "file worker stopped");
    }

    async fn handle(&self, task: FileTask) {
        let batch = Arc::clone(&task.batch);
        let context = Arc::clone(&self.context);
        let outcome = tokio::task::spawn_blocking(move || {
            let failed = context.process_chunk(&task);
            context.report_failures(&task, failed);
        })
        .await;

        if let Err(err) = outcome {
            error!(
                target: "shoebox::files",
                worker = self.index,
                job_id = %batch.job_id,
                error = %err,
                "file chunk panicked"
            );
        }
        self.context.complete_chunk(&batch);
    }
}

/// Spawns the worker pool and returns the dispatch handle with the worker
/// join handles.
pub fn spawn_file_stage(
    runtime: &Handle,
    context: Arc<FileStageContext>,
    parallelism: usize,
    queue_capacity: usize,
    shutdown: CancellationToken,
) -> (FileStageHandle, Vec<JoinHandle<()>>) {
    let parallelism = parallelism.max(1);
    let mut senders = Vec::with_capacity(parallelism);
    let mut handles = Vec::with_capacity(parallelism);

    for index in 0..parallelism {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        senders.push(tx);
        let worker = FileWorker {
            index,
            inbox: rx,
            context: Arc::clone(&context),
            shutdown: shutdown.clone(),
        };
        handles.push(runtime.spawn(worker.run()));
    }

    info!(target: "shoebox::files", workers = parallelism, "file stage started");

    let handle = FileStageHandle {
        workers: senders.into(),
        next: Arc::new(AtomicUsize::new(0)),
        context,
        shutdown,
    };
    (handle, handles)
}
