use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::error;

use super::LiveDataHandle;

/// Monotonic LiveData handle allocator.
///
/// Handles start at 1. When the counter reaches `u32::MAX` it wraps back to 1 and the
/// wrap is logged and counted, since handles issued long ago may now be reused.
#[derive(Debug, Default)]
pub struct HandleGenerator {
    current: AtomicU32,
    wraps: AtomicU64,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from `last` (the next handle issued is `last + 1`).
    pub fn starting_after(last: LiveDataHandle) -> Self {
        Self { current: AtomicU32::new(last), wraps: AtomicU64::new(0) }
    }

    pub fn next_handle(&self) -> LiveDataHandle {
        let mut wrapped = false;
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.wrapping_add(1);
                wrapped = next == u32::MAX || next == 0;
                Some(if wrapped { 1 } else { next })
            })
            .unwrap_or_default();

        if wrapped {
            self.wraps.fetch_add(1, Ordering::Relaxed);
            error!("LiveData handle space exhausted after {}, wrapping to 1", previous);
            return 1;
        }
        previous.wrapping_add(1)
    }

    /// Number of times the handle space wrapped.
    pub fn wraps(&self) -> u64 {
        self.wraps.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn starts_at_one_and_increments() {
        let handles = HandleGenerator::new();
        assert_eq!(handles.next_handle(), 1);
        assert_eq!(handles.next_handle(), 2);
        assert_eq!(handles.wraps(), 0);
    }

    #[test]
    fn wraps_to_one_at_max() {
        let handles = HandleGenerator::starting_after(u32::MAX - 2);
        assert_eq!(handles.next_handle(), u32::MAX - 1);
        assert_eq!(handles.next_handle(), 1);
        assert_eq!(handles.next_handle(), 2);
        assert_eq!(handles.wraps(), 1);
    }

    #[test]
    fn unique_across_threads() {
        let handles = Arc::new(HandleGenerator::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handles = handles.clone();
                std::thread::spawn(move || {
                    (0..1000).map(|_| handles.next_handle()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for handle in thread.join().unwrap() {
                assert!(seen.insert(handle), "duplicate handle {}", handle);
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
