//! Single-concurrency actor that applies record mutations.
//!
//! Jobs are taken from the inbox one at a time, in submission order. Every
//! record of a job is mutated inside one grouped transaction on a blocking
//! thread; records whose change warrants a file rewrite are forwarded to the
//! file stage as one write candidate once the transaction has committed.

use std::{fmt, slice, sync::Arc, time::Duration};

use shoebox_model::{FieldUpdate, ImageRecord, MetadataSnapshot, RelationChange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::ports::RecordStore;

use super::{
    config::MetadataWritePolicy,
    events::{FailureNotice, PipelineEvent, PipelineEventBus},
    file_stage::FileStageHandle,
    job::{DatabaseOperation, FileOperation, Job, JobId, WriteCandidate},
    pending::PendingWriteSet,
    progress::ProgressAggregator,
    transaction::TransactionGrouper,
};

pub const DATABASE_FAILURE_MESSAGE: &str = "Failed to update these items in the library database";

/// What kind of file rewrite, if any, a record mutation may call for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RewriteKind {
    None,
    Metadata,
    Orientation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MutationOutcome {
    rewrite: RewriteKind,
    changed: bool,
}

impl MutationOutcome {
    fn relational() -> Self {
        Self {
            rewrite: RewriteKind::None,
            changed: true,
        }
    }

    fn metadata(changed: bool) -> Self {
        Self {
            rewrite: RewriteKind::Metadata,
            changed,
        }
    }

    fn orientation() -> Self {
        Self {
            rewrite: RewriteKind::Orientation,
            changed: true,
        }
    }

    fn wants_rewrite(&self, policy: MetadataWritePolicy) -> bool {
        match self.rewrite {
            RewriteKind::None => false,
            RewriteKind::Orientation => true,
            RewriteKind::Metadata => match policy {
                MetadataWritePolicy::Never => false,
                MetadataWritePolicy::IfChanged => self.changed,
                MetadataWritePolicy::Always => true,
            },
        }
    }
}

/// Result of mutating one job's records.
#[derive(Debug, Default)]
struct JobReport {
    candidate: Option<WriteCandidate>,
    collapsed: usize,
    failed: Vec<String>,
}

/// State shared between the actor loop and its blocking mutation passes.
pub struct DatabaseStageContext {
    store: Arc<dyn RecordStore>,
    pending: PendingWriteSet,
    progress: Arc<ProgressAggregator>,
    events: Arc<PipelineEventBus>,
    policy: MetadataWritePolicy,
    lift_interval: Duration,
}

impl fmt::Debug for DatabaseStageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseStageContext")
            .field("pending", &self.pending.len())
            .field("policy", &self.policy)
            .field("lift_interval", &self.lift_interval)
            .finish_non_exhaustive()
    }
}

impl DatabaseStageContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        pending: PendingWriteSet,
        progress: Arc<ProgressAggregator>,
        events: Arc<PipelineEventBus>,
        policy: MetadataWritePolicy,
        lift_interval: Duration,
    ) -> Self {
        Self {
            store,
            pending,
            progress,
            events,
            policy,
            lift_interval,
        }
    }

    fn process(&self, job: Job) -> JobReport {
        let Job {
            id: job_id,
            operation,
            records,
        } = job;

        let mut grouper = match TransactionGrouper::new(self.store.as_ref(), self.lift_interval) {
            Ok(grouper) => Some(grouper),
            Err(err) => {
                warn!(target: "shoebox::db", job_id = %job_id, error = %err, "could not open grouped transaction; mutating without one");
                None
            }
        };

        let mut warranted: Vec<&ImageRecord> = Vec::new();
        let mut report = JobReport::default();

        for record in &records {
            match self.apply(&operation, record) {
                Ok(outcome) => {
                    if outcome.wants_rewrite(self.policy) {
                        warranted.push(record);
                    }
                }
                Err(err) => {
                    warn!(
                        target: "shoebox::db",
                        job_id = %job_id,
                        image_id = %record.id,
                        operation = operation.name(),
                        error = %err,
                        "record mutation failed"
                    );
                    report.failed.push(record.display_name());
                }
            }

            self.progress.db_processed_one();

            if let Some(active) = grouper.as_mut()
                && let Err(err) = active.allow_lift()
            {
                warn!(target: "shoebox::db", job_id = %job_id, error = %err, "transaction lift failed");
                grouper = None;
            }
        }

        if let Some(active) = grouper
            && let Err(err) = active.finish()
        {
            warn!(target: "shoebox::db", job_id = %job_id, error = %err, "failed to commit grouped transaction");
        }

        // Guards are taken only after commit, so a write that is already
        // pending is guaranteed to read this job's changes when it starts.
        let mut forward = Vec::with_capacity(warranted.len());
        for record in warranted {
            if self.pending.try_schedule(record.id) {
                forward.push(record.clone());
            } else {
                trace!(target: "shoebox::db", image_id = %record.id, "file rewrite already pending");
                report.collapsed += 1;
            }
        }

        if !forward.is_empty()
            && let Some(file_operation) = file_operation_for(&operation)
        {
            report.candidate = Some(WriteCandidate::new(job_id, file_operation, forward));
        }

        report
    }

    fn apply(
        &self,
        operation: &DatabaseOperation,
        record: &ImageRecord,
    ) -> Result<MutationOutcome> {
        match operation {
            DatabaseOperation::AssignTags(tags) => {
                let current = self.store.load(record.id)?;
                let mut next = current.tags.clone();
                next.extend(tags.iter().copied());
                self.write_field(record, &current, FieldUpdate::Tags(next))
            }
            DatabaseOperation::RemoveTags(tags) => {
                let current = self.store.load(record.id)?;
                let mut next = current.tags.clone();
                next.retain(|tag| !tags.contains(tag));
                self.write_field(record, &current, FieldUpdate::Tags(next))
            }
            DatabaseOperation::AssignPickLabel(label) => {
                let current = self.store.load(record.id)?;
                self.write_field(record, &current, FieldUpdate::PickLabel(*label))
            }
            DatabaseOperation::AssignColorLabel(label) => {
                let current = self.store.load(record.id)?;
                self.write_field(record, &current, FieldUpdate::ColorLabel(*label))
            }
            DatabaseOperation::AssignRating(rating) => {
                let current = self.store.load(record.id)?;
                self.write_field(record, &current, FieldUpdate::Rating(*rating))
            }
            DatabaseOperation::AddToGroup { leader } => {
                if leader.id != record.id {
                    self.store.mutate_relation(
                        RelationChange::AddToGroup,
                        Some(leader.id),
                        slice::from_ref(&record.id),
                    )?;
                }
                Ok(MutationOutcome::relational())
            }
            DatabaseOperation::RemoveFromGroup | DatabaseOperation::Ungroup => {
                if let Some(change) = operation.relation() {
                    self.store
                        .mutate_relation(change, None, slice::from_ref(&record.id))?;
                }
                Ok(MutationOutcome::relational())
            }
            DatabaseOperation::SetExifOrientation(orientation) => {
                self.store
                    .write_partial(record.id, &FieldUpdate::Orientation(*orientation))?;
                Ok(MutationOutcome::orientation())
            }
            DatabaseOperation::ApplyMetadata(snapshot) => {
                let current = self.store.load(record.id)?;
                self.store.write_full(record.id, snapshot)?;
                Ok(MutationOutcome::metadata(current != **snapshot))
            }
        }
    }

    /// Partial write of a single field; unchanged rows are left untouched.
    fn write_field(
        &self,
        record: &ImageRecord,
        current: &MetadataSnapshot,
        update: FieldUpdate,
    ) -> Result<MutationOutcome> {
        let changed = current.with_update(&update) != *current;
        if changed {
            self.store.write_partial(record.id, &update)?;
        }
        Ok(MutationOutcome::metadata(changed))
    }
}

fn file_operation_for(operation: &DatabaseOperation) -> Option<FileOperation> {
    match operation {
        DatabaseOperation::AssignTags(_)
        | DatabaseOperation::RemoveTags(_)
        | DatabaseOperation::AssignPickLabel(_)
        | DatabaseOperation::AssignColorLabel(_)
        | DatabaseOperation::AssignRating(_)
        | DatabaseOperation::ApplyMetadata(_) => Some(FileOperation::WriteMetadata),
        DatabaseOperation::SetExifOrientation(orientation) => {
            Some(FileOperation::WriteOrientation(*orientation))
        }
        DatabaseOperation::AddToGroup { .. }
        | DatabaseOperation::RemoveFromGroup
        | DatabaseOperation::Ungroup => None,
    }
}

/// The database stage actor.
pub struct DatabaseStage {
    context: Arc<DatabaseStageContext>,
    inbox: mpsc::UnboundedReceiver<Job>,
    files: FileStageHandle,
    shutdown: CancellationToken,
}

impl fmt::Debug for DatabaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseStage")
            .field("context", &self.context)
            .field("queued_jobs", &self.inbox.len())
            .field("files", &self.files)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl DatabaseStage {
    pub fn new(
        context: Arc<DatabaseStageContext>,
        inbox: mpsc::UnboundedReceiver<Job>,
        files: FileStageHandle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            inbox,
            files,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(target: "shoebox::db", "database stage started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = self.inbox.recv() => match job {
                    Some(job) => self.handle(job).await,
                    None => break,
                },
            }
        }

        self.inbox.close();
        let mut dropped = 0;
        while let Ok(job) = self.inbox.try_recv() {
            self.context.progress.db_unscheduled(job.len());
            dropped += 1;
        }
        info!(target: "shoebox::db", dropped_jobs = dropped, "database stage stopped");
    }

    async fn handle(&self, job: Job) {
        let job_id = job.id;
        let operation = job.operation.name();
        let count = job.len();

        let context = Arc::clone(&self.context);
        let report = match tokio::task::spawn_blocking(move || context.process(job)).await {
            Ok(report) => report,
            Err(err) => {
                error!(target: "shoebox::db", job_id = %job_id, error = %err, "database job panicked");
                self.context.progress.db_finished(count);
                return;
            }
        };

        self.report_failures(job_id, &report);

        let forwarded = report.candidate.as_ref().map_or(0, WriteCandidate::len);
        debug!(
            target: "shoebox::db",
            job_id = %job_id,
            operation,
            records = count,
            forwarded,
            collapsed = report.collapsed,
            failed = report.failed.len(),
            "database job finished"
        );

        // Count the writes before retiring the job so the pipeline never
        // looks drained in between.
        if let Some(candidate) = report.candidate {
            self.context.progress.scheduled_for_write(candidate.len());
            self.files.dispatch(candidate).await;
        }
        self.context.progress.db_finished(count);
    }

    fn report_failures(&self, job_id: JobId, report: &JobReport) {
        if report.failed.is_empty() {
            return;
        }
        self.context
            .events
            .publish(PipelineEvent::Failure(FailureNotice::new(
                job_id,
                DATABASE_FAILURE_MESSAGE,
                report.failed.clone(),
            )));
    }
}
