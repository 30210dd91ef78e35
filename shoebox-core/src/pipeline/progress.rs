//! Weighted progress over both stages and the drain / idle lifecycle.
//!
//! Counters for the database stage and the file stage are kept together
//! under one mutex, and lifecycle transitions are decided while holding it,
//! so a drain can never be reported while freshly scheduled work is
//! outstanding.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::events::{PipelineEvent, PipelineEventBus, ProgressUpdate};

/// Share of the overall percentage given to the database stage when both
/// stages have work; file writing is an order of magnitude slower per item.
pub const DATABASE_STAGE_WEIGHT: f32 = 0.1;
pub const FILE_STAGE_WEIGHT: f32 = 0.9;

pub const DATABASE_STAGE_MESSAGE: &str = "Updating library records";
pub const FILE_STAGE_MESSAGE: &str = "Writing changes to files";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// At least one stage has outstanding work.
    Active,
    /// Both stages just ran out of work; the grace delay is running.
    Drained,
    Idle,
    ShutDown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounters {
    pub todo: usize,
    pub done: usize,
}

impl StageCounters {
    fn is_active(&self) -> bool {
        self.todo > 0
    }

    fn ratio(&self) -> f32 {
        if self.todo == 0 {
            return 1.0;
        }
        (self.done as f32 / self.todo as f32).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub database: StageCounters,
    pub writer: StageCounters,
}

impl ProgressSnapshot {
    /// Overall completion in percent, always within 0..=100.
    pub fn percent(&self) -> f32 {
        let ratio = match (self.database.is_active(), self.writer.is_active()) {
            (true, true) => {
                DATABASE_STAGE_WEIGHT * self.database.ratio()
                    + FILE_STAGE_WEIGHT * self.writer.ratio()
            }
            (true, false) => self.database.ratio(),
            (false, true) => self.writer.ratio(),
            (false, false) => 1.0,
        };
        (ratio * 100.0).clamp(0.0, 100.0)
    }

    pub fn message(&self) -> &'static str {
        if self.writer.is_active() {
            FILE_STAGE_MESSAGE
        } else {
            DATABASE_STAGE_MESSAGE
        }
    }

    pub fn is_drained(&self) -> bool {
        !self.database.is_active() && !self.writer.is_active()
    }

    fn update(&self) -> ProgressUpdate {
        ProgressUpdate {
            message: self.message().to_string(),
            percent: self.percent(),
        }
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    counters: ProgressSnapshot,
    db_ticks: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Database,
    Writer,
}

pub struct ProgressAggregator {
    state: Mutex<ProgressState>,
    events: Arc<PipelineEventBus>,
    lifecycle: watch::Sender<PipelineState>,
    db_stride: usize,
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = self.state.try_lock().map(|state| state.counters);
        f.debug_struct("ProgressAggregator")
            .field("counters", &counters)
            .field("lifecycle", &*self.lifecycle.borrow())
            .field("db_stride", &self.db_stride)
            .finish()
    }
}

impl ProgressAggregator {
    pub fn new(events: Arc<PipelineEventBus>, db_stride: usize) -> Self {
        let (lifecycle, _) = watch::channel(PipelineState::Idle);
        Self {
            state: Mutex::new(ProgressState::default()),
            events,
            lifecycle,
            db_stride: db_stride.max(1),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().counters
    }

    pub fn has_outstanding(&self) -> bool {
        !self.state.lock().counters.is_drained()
    }

    pub fn lifecycle(&self) -> PipelineState {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<PipelineState> {
        self.lifecycle.subscribe()
    }

    pub fn scheduled_for_db(&self, count: usize) {
        self.schedule(Stage::Database, count);
    }

    pub fn scheduled_for_write(&self, count: usize) {
        self.schedule(Stage::Writer, count);
    }

    /// Only every `db_stride`-th record triggers a progress notification.
    pub fn db_processed_one(&self) {
        let mut state = self.state.lock();
        state.counters.database.done += 1;
        state.db_ticks += 1;
        if state.db_ticks % self.db_stride == 0 {
            self.events
                .publish(PipelineEvent::Progress(state.counters.update()));
        }
    }

    pub fn written_to_one(&self) {
        let mut state = self.state.lock();
        state.counters.writer.done += 1;
        self.events
            .publish(PipelineEvent::Progress(state.counters.update()));
    }

    pub fn db_finished(&self, count: usize) {
        self.finish(Stage::Database, count, count);
    }

    pub fn writer_finished(&self, count: usize) {
        self.finish(Stage::Writer, count, count);
    }

    /// Withdraws work that was counted but never handed to the database
    /// stage.
    pub fn db_unscheduled(&self, count: usize) {
        self.finish(Stage::Database, count, 0);
    }

    pub fn writer_unscheduled(&self, count: usize) {
        self.finish(Stage::Writer, count, 0);
    }

    pub fn mark_shut_down(&self) {
        let _state = self.state.lock();
        self.lifecycle.send_replace(PipelineState::ShutDown);
    }

    /// Moves a drained pipeline to idle. Returns `false` when new work arrived
    /// in the meantime.
    ///
    /// The `Idle` event is published before the lifecycle flips, so a
    /// watcher woken by the flip always finds the event in its feed.
    pub fn enter_idle(&self) -> bool {
        let _state = self.state.lock();
        if *self.lifecycle.borrow() != PipelineState::Drained {
            return false;
        }

        debug!(target: "shoebox::pipeline", "pipeline idle");
        self.events.publish(PipelineEvent::Idle);
        self.lifecycle.send_replace(PipelineState::Idle);
        true
    }

    fn schedule(&self, stage: Stage, count: usize) {
        if count == 0 {
            return;
        }

        let mut state = self.state.lock();
        match stage {
            Stage::Database => state.counters.database.todo += count,
            Stage::Writer => state.counters.writer.todo += count,
        }
        self.lifecycle.send_if_modified(|current| match *current {
            PipelineState::Drained | PipelineState::Idle => {
                *current = PipelineState::Active;
                true
            }
            PipelineState::Active | PipelineState::ShutDown => false,
        });
        self.events
            .publish(PipelineEvent::Progress(state.counters.update()));
    }

    fn finish(&self, stage: Stage, todo: usize, done: usize) {
        if todo == 0 && done == 0 {
            return;
        }

        let mut state = self.state.lock();
        let counters = match stage {
            Stage::Database => &mut state.counters.database,
            Stage::Writer => &mut state.counters.writer,
        };
        counters.todo = counters.todo.saturating_sub(todo);
        counters.done = counters.done.saturating_sub(done);

        if state.counters.is_drained() {
            *state = ProgressState::default();
            self.events
                .publish(PipelineEvent::Progress(state.counters.update()));
            if *self.lifecycle.borrow() == PipelineState::Active {
                debug!(target: "shoebox::pipeline", "pipeline drained");
                self.events.publish(PipelineEvent::Drained);
                self.lifecycle.send_replace(PipelineState::Drained);
            }
        } else {
            self.events
                .publish(PipelineEvent::Progress(state.counters.update()));
        }
    }

    /// Turns a drained pipeline idle once `grace` passes without new work.
    /// Any scheduling during the grace window restarts it.
    pub async fn run_idle_monitor(self: Arc<Self>, grace: Duration, shutdown: CancellationToken) {
        let mut lifecycle = self.subscribe_lifecycle();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                drained = lifecycle.wait_for(|state| *state == PipelineState::Drained) => {
                    if drained.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(grace) => {
                    self.enter_idle();
                }
                changed = lifecycle.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
