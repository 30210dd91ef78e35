#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use shoebox_core::{
    error::{PipelineError, Result},
    pipeline::{FileActionPipeline, FileActionPipelineBuilder, PipelineConfig, PipelineState},
    ports::{CacheInvalidation, MetadataCodec, RecordStore, RescanTrigger},
};
use shoebox_model::{
    AlbumId, FieldUpdate, ImageId, ImageRecord, MetadataSnapshot, Orientation, RelationChange,
    TransformAction,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything the record store was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreCall {
    Begin,
    Commit,
    WritePartial(ImageId, FieldUpdate),
    WriteFull(ImageId),
    Relation(RelationChange, Option<ImageId>, Vec<ImageId>),
    CopyAttributes(ImageId, PathBuf),
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<ImageId, MetadataSnapshot>>,
    calls: Mutex<Vec<StoreCall>>,
    missing: Mutex<HashSet<ImageId>>,
}

impl InMemoryStore {
    pub fn with_rows(rows: impl IntoIterator<Item = (ImageId, MetadataSnapshot)>) -> Self {
        let store = Self::default();
        store.rows.lock().extend(rows);
        store
    }

    pub fn row(&self, id: ImageId) -> MetadataSnapshot {
        self.rows.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn set_row(&self, id: ImageId, snapshot: MetadataSnapshot) {
        self.rows.lock().insert(id, snapshot);
    }

    /// Loads of `id` fail from now on.
    pub fn forget(&self, id: ImageId) {
        self.missing.lock().insert(id);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn mutations(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, StoreCall::Begin | StoreCall::Commit))
            .collect()
    }
}

impl RecordStore for InMemoryStore {
    fn load(&self, id: ImageId) -> Result<MetadataSnapshot> {
        if self.missing.lock().contains(&id) {
            return Err(PipelineError::NotFound(format!("image {id}")));
        }
        Ok(self.row(id))
    }

    fn begin_transaction(&self) -> Result<()> {
        self.calls.lock().push(StoreCall::Begin);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.calls.lock().push(StoreCall::Commit);
        Ok(())
    }

    fn write_partial(&self, id: ImageId, update: &FieldUpdate) -> Result<()> {
        let mut rows = self.rows.lock();
        let next = rows.get(&id).cloned().unwrap_or_default().with_update(update);
        rows.insert(id, next);
        self.calls
            .lock()
            .push(StoreCall::WritePartial(id, update.clone()));
        Ok(())
    }

    fn write_full(&self, id: ImageId, snapshot: &MetadataSnapshot) -> Result<()> {
        self.rows.lock().insert(id, snapshot.clone());
        self.calls.lock().push(StoreCall::WriteFull(id));
        Ok(())
    }

    fn mutate_relation(
        &self,
        change: RelationChange,
        leader: Option<ImageId>,
        records: &[ImageId],
    ) -> Result<()> {
        self.calls
            .lock()
            .push(StoreCall::Relation(change, leader, records.to_vec()));
        Ok(())
    }

    fn copy_attributes(&self, source: ImageId, derived: &Path) -> Result<()> {
        self.calls
            .lock()
            .push(StoreCall::CopyAttributes(source, derived.to_path_buf()));
        Ok(())
    }
}

/// Codec over an in-memory "disk" that tracks how many writes run per file.
#[derive(Debug, Default)]
pub struct FakeCodec {
    embedded: Mutex<HashMap<PathBuf, MetadataSnapshot>>,
    writes: Mutex<Vec<(PathBuf, MetadataSnapshot)>>,
    orientation_writes: Mutex<Vec<(PathBuf, Orientation)>>,
    transforms: Mutex<Vec<(PathBuf, TransformAction)>>,
    failing: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<PathBuf, usize>>,
    peak_per_file: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeCodec {
    pub fn fail_on(&self, file_name: &str) {
        self.failing.lock().insert(file_name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_embedded(&self, path: impl Into<PathBuf>, snapshot: MetadataSnapshot) {
        self.embedded.lock().insert(path.into(), snapshot);
    }

    pub fn writes(&self) -> Vec<(PathBuf, MetadataSnapshot)> {
        self.writes.lock().clone()
    }

    pub fn orientation_writes(&self) -> Vec<(PathBuf, Orientation)> {
        self.orientation_writes.lock().clone()
    }

    pub fn transforms(&self) -> Vec<(PathBuf, TransformAction)> {
        self.transforms.lock().clone()
    }

    /// Highest number of simultaneous writes seen for any single file.
    pub fn peak_writes_per_file(&self) -> usize {
        self.peak_per_file.load(Ordering::SeqCst)
    }

    fn is_failing(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.failing.lock().contains(&*name.to_string_lossy()))
            .unwrap_or(false)
    }

    fn simulate_write<T>(&self, path: &Path, write: impl FnOnce() -> T) -> Result<T> {
        if self.is_failing(path) {
            return Err(PipelineError::Codec(format!(
                "cannot write {}",
                path.display()
            )));
        }

        {
            let mut in_flight = self.in_flight.lock();
            let running = in_flight.entry(path.to_path_buf()).or_insert(0);
            *running += 1;
            self.peak_per_file.fetch_max(*running, Ordering::SeqCst);
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let value = write();

        if let Some(running) = self.in_flight.lock().get_mut(path) {
            *running -= 1;
        }
        Ok(value)
    }
}

impl MetadataCodec for FakeCodec {
    fn read_embedded(&self, path: &Path) -> Result<MetadataSnapshot> {
        Ok(self.embedded.lock().get(path).cloned().unwrap_or_default())
    }

    fn write_embedded(&self, path: &Path, snapshot: &MetadataSnapshot) -> Result<bool> {
        self.simulate_write(path, || {
            self.embedded
                .lock()
                .insert(path.to_path_buf(), snapshot.clone());
            self.writes
                .lock()
                .push((path.to_path_buf(), snapshot.clone()));
            true
        })
    }

    fn write_orientation(&self, path: &Path, orientation: Orientation) -> Result<bool> {
        self.simulate_write(path, || {
            self.orientation_writes
                .lock()
                .push((path.to_path_buf(), orientation));
            true
        })
    }

    fn apply_pixel_transform(&self, path: &Path, action: TransformAction) -> Result<bool> {
        self.simulate_write(path, || {
            self.transforms.lock().push((path.to_path_buf(), action));
            true
        })
    }
}

#[derive(Debug, Default)]
pub struct RecordingCache {
    notified: Mutex<Vec<PathBuf>>,
}

impl RecordingCache {
    pub fn notified(&self) -> Vec<PathBuf> {
        self.notified.lock().clone()
    }
}

impl CacheInvalidation for RecordingCache {
    fn notify_file_changed(&self, path: &Path) {
        self.notified.lock().push(path.to_path_buf());
    }
}

#[derive(Debug, Default)]
pub struct RecordingRescan {
    rescanned: Mutex<Vec<PathBuf>>,
}

impl RecordingRescan {
    pub fn rescanned(&self) -> Vec<PathBuf> {
        self.rescanned.lock().clone()
    }
}

impl RescanTrigger for RecordingRescan {
    fn rescan_file(&self, path: &Path) -> Result<()> {
        self.rescanned.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// A started pipeline together with the fakes behind it.
#[derive(Debug)]
pub struct Harness {
    pub pipeline: FileActionPipeline,
    pub store: Arc<InMemoryStore>,
    pub codec: Arc<FakeCodec>,
    pub cache: Arc<RecordingCache>,
    pub rescan: Arc<RecordingRescan>,
}

impl Harness {
    pub fn start(config: PipelineConfig) -> Self {
        Self::start_with_store(config, InMemoryStore::default())
    }

    pub fn start_with_store(config: PipelineConfig, store: InMemoryStore) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let codec = Arc::new(FakeCodec::default());
        let cache = Arc::new(RecordingCache::default());
        let rescan = Arc::new(RecordingRescan::default());

        let pipeline = FileActionPipelineBuilder::new(config)
            .with_store(store.clone())
            .with_codec(codec.clone())
            .with_cache_invalidation(cache.clone())
            .with_rescan(rescan.clone())
            .start()
            .expect("pipeline should start");

        Self {
            pipeline,
            store,
            codec,
            cache,
            rescan,
        }
    }

    /// Waits until no stage has outstanding work.
    pub async fn settle(&self) {
        let mut lifecycle = self.pipeline.watch_lifecycle();
        tokio::time::timeout(
            Duration::from_secs(10),
            lifecycle.wait_for(|state| *state != PipelineState::Active),
        )
        .await
        .expect("pipeline should drain")
        .expect("lifecycle channel open");
    }
}

pub fn config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        file_workers: Some(workers),
        idle_grace_ms: 50,
        db_progress_stride: 1,
        event_channel_capacity: 4096,
        ..PipelineConfig::default()
    }
}

pub fn photo(id: i64) -> ImageRecord {
    ImageRecord::new(ImageId(id), format!("/library/2024/p{id}.jpg"), AlbumId(1))
}

pub fn photos(ids: std::ops::RangeInclusive<i64>) -> Vec<ImageRecord> {
    ids.map(photo).collect()
}
