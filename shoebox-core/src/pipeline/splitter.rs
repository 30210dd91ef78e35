/// Fans an ordered batch out into contiguous chunks, one per worker.
///
/// A batch of `len >= parallelism` items is cut into exactly `parallelism`
/// chunks whose sizes differ by at most one, the longer chunks first. A batch
/// shorter than the parallelism stays in one chunk. Chunks come out in the
/// original order and the splitter hands each one out exactly once.
#[derive(Debug)]
pub struct TaskSplitter<T> {
    remaining: Vec<T>,
    base: usize,
    extra: usize,
    chunks_left: usize,
}

impl<T> TaskSplitter<T> {
    pub fn new(items: Vec<T>, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        let len = items.len();
        let (base, extra, chunks_left) = if len == 0 {
            (0, 0, 0)
        } else if len < parallelism {
            (len, 0, 1)
        } else {
            (len / parallelism, len % parallelism, parallelism)
        };

        Self {
            remaining: items,
            base,
            extra,
            chunks_left,
        }
    }

    /// Items not yet handed out.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl<T> Iterator for TaskSplitter<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        if self.chunks_left == 0 {
            return None;
        }
        self.chunks_left -= 1;

        let mut take = self.base;
        if self.extra > 0 {
            self.extra -= 1;
            take += 1;
        }
        let take = if self.chunks_left == 0 {
            self.remaining.len()
        } else {
            take.min(self.remaining.len())
        };

        let tail = self.remaining.split_off(take);
        Some(std::mem::replace(&mut self.remaining, tail))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.chunks_left, Some(self.chunks_left))
    }
}

impl<T> ExactSizeIterator for TaskSplitter<T> {}
