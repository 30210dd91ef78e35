use std::{collections::HashSet, sync::Arc};

use parking_lot::{Condvar, Mutex};
use shoebox_model::ImageId;

/// Record ids that are scheduled for a file rewrite which has not started yet.
///
/// The database stage inserts before forwarding a write candidate and the
/// file stage removes when the write for that id begins, so at most one
/// rewrite request per id is ever outstanding.
#[derive(Clone, Default, Debug)]
pub struct PendingWriteSet {
    inner: Arc<Mutex<HashSet<ImageId>>>,
}

impl PendingWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a rewrite for `id` is already pending.
    pub fn try_schedule(&self, id: ImageId) -> bool {
        self.inner.lock().insert(id)
    }

    /// Clears the guard for `id`; called when its write attempt starts.
    pub fn begin_write(&self, id: ImageId) -> bool {
        self.inner.lock().remove(&id)
    }

    pub fn release_all<'a>(&self, ids: impl IntoIterator<Item = &'a ImageId>) {
        let mut guard = self.inner.lock();
        for id in ids {
            guard.remove(id);
        }
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.inner.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Record ids whose file write is running right now.
///
/// Two chunks can carry the same id when a fresh rewrite was scheduled after
/// the first one started; the second writer waits here until the first one
/// finishes.
#[derive(Debug, Default)]
pub struct InFlightWrites {
    ids: Mutex<HashSet<ImageId>>,
    released: Condvar,
}

impl InFlightWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until no other write for `id` is running.
    pub fn acquire(&self, id: ImageId) -> InFlightGuard<'_> {
        let mut ids = self.ids.lock();
        while ids.contains(&id) {
            self.released.wait(&mut ids);
        }
        ids.insert(id);
        InFlightGuard { owner: self, id }
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

/// Releases its id when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlightWrites,
    id: ImageId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.ids.lock().remove(&self.id);
        self.owner.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_schedule_is_collapsed_until_write_starts() {
        let pending = PendingWriteSet::new();
        let id = ImageId(42);

        assert!(pending.try_schedule(id));
        assert!(!pending.try_schedule(id));
        assert!(pending.begin_write(id));
        assert!(pending.try_schedule(id), "a fresh request is accepted once writing began");
    }

    #[test]
    fn clones_share_state() {
        let pending = PendingWriteSet::new();
        let other = pending.clone();
        assert!(pending.try_schedule(ImageId(1)));
        assert!(other.contains(ImageId(1)));
        other.release_all(&[ImageId(1)]);
        assert!(pending.is_empty());
    }

    #[test]
    fn concurrent_schedulers_admit_one_request_per_id() {
        let pending = PendingWriteSet::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = pending.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|raw| pending.try_schedule(ImageId(*raw)))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(pending.len(), 100);
    }

    #[test]
    fn second_writer_waits_for_the_first() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };
        use std::time::Duration;

        let writes = Arc::new(InFlightWrites::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (writes, running, peak) =
                    (Arc::clone(&writes), Arc::clone(&running), Arc::clone(&peak));
                std::thread::spawn(move || {
                    let _guard = writes.acquire(ImageId(7));
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(writes.is_empty());
    }
}
