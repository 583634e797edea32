use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

use crate::error::GraphError;

/// Bounded concurrency limiter for heavy computations (forward and backward
/// kernels).
///
/// At most `size` closures passed to [`run`](ProcessingQueue::run) execute at
/// the same time, across every thread sharing the queue. A size of 1 makes
/// execution fully sequential.
#[derive(Debug)]
pub struct ProcessingQueue {
    size: usize,
    running: Mutex<usize>,
    slot_freed: Condvar,
}

impl ProcessingQueue {
    /// # Errors
    /// Returns `GraphError::InvalidConcurrency` if `size` is zero.
    pub fn new(size: usize) -> Result<Self, GraphError> {
        NonZeroUsize::new(size)
            .map(ProcessingQueue::with_size)
            .ok_or(GraphError::InvalidConcurrency(size))
    }

    /// Infallible constructor for sizes known to be non-zero.
    pub fn with_size(size: NonZeroUsize) -> Self {
        ProcessingQueue {
            size: size.get(),
            running: Mutex::new(0),
            slot_freed: Condvar::new(),
        }
    }

    /// Maximum number of concurrent computations.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` on the calling thread once a slot is available, blocking
    /// until then.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _slot = self.acquire();
        f()
    }

    /// Runs `f` over every item, with at most `size` items in flight, and
    /// returns once all of them are done.
    ///
    /// Items are claimed in order by scoped workers. With `size == 1` (or a
    /// single item) everything runs on the calling thread, in order.
    pub fn for_each<I, F>(&self, items: &[I], f: F)
    where
        I: Sync,
        F: Fn(&I) + Sync,
    {
        let workers = self.size.min(items.len());
        if workers <= 1 {
            for item in items {
                self.run(|| f(item));
            }
            return;
        }
        let next = AtomicUsize::new(0);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    match items.get(index) {
                        Some(item) => self.run(|| f(item)),
                        None => break,
                    }
                });
            }
        });
    }

    fn acquire(&self) -> SlotGuard<'_> {
        let mut running = self.running.lock().expect("ProcessingQueue mutex poisoned");
        while *running >= self.size {
            running = self
                .slot_freed
                .wait(running)
                .expect("ProcessingQueue mutex poisoned");
        }
        *running += 1;
        SlotGuard { queue: self }
    }
}

/// Frees its slot on drop, including when the computation panics.
struct SlotGuard<'a> {
    queue: &'a ProcessingQueue,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut running = match self.queue.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *running -= 1;
        self.queue.slot_freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_size_is_rejected() {
        assert_eq!(
            ProcessingQueue::new(0).unwrap_err(),
            GraphError::InvalidConcurrency(0)
        );
    }

    #[test]
    fn test_run_returns_closure_result() {
        let queue = ProcessingQueue::new(2).unwrap();
        assert_eq!(queue.run(|| 40 + 2), 42);
    }

    #[test]
    fn test_for_each_never_exceeds_size() {
        let queue = ProcessingQueue::new(3).unwrap();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let items: Vec<usize> = (0..24).collect();

        queue.for_each(&items, |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(done.load(Ordering::SeqCst), 24);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_size_one_runs_in_order() {
        let queue = ProcessingQueue::new(1).unwrap();
        let seen = Mutex::new(Vec::new());
        let items = vec![3, 1, 4, 1, 5];
        queue.for_each(&items, |&i| seen.lock().unwrap().push(i));
        assert_eq!(*seen.lock().unwrap(), items);
    }

    #[test]
    fn test_slot_is_freed_after_panic() {
        let queue = ProcessingQueue::new(1).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            queue.run(|| panic!("kernel failure"))
        }));
        assert!(result.is_err());
        assert_eq!(queue.run(|| 7), 7);
    }
}
