pub mod config;
pub mod database_stage;
pub mod events;
pub mod file_stage;
pub mod job;
pub mod orchestrator;
pub mod pending;
pub mod progress;
pub mod splitter;
pub mod transaction;

pub use config::{MetadataWritePolicy, PipelineConfig};
pub use database_stage::DATABASE_FAILURE_MESSAGE;
pub use events::{FailureNotice, PipelineEvent, PipelineEventBus, ProgressUpdate};
pub use job::{DatabaseOperation, FileOperation, Job, JobId, WriteCandidate};
pub use orchestrator::{FileActionPipeline, FileActionPipelineBuilder, ShutdownOutcome};
pub use pending::{InFlightWrites, PendingWriteSet};
pub use progress::{PipelineState, ProgressAggregator, ProgressSnapshot, StageCounters};
pub use splitter::TaskSplitter;
pub use transaction::TransactionGrouper;
