//! Delay and repeat based scheduling of owning-thread callbacks.
//!
//! Timers never run on a worker. On each tick the scheduler moves due
//! callbacks into the [`CallbackChannel`], which the same tick then drains.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::callback::CallbackChannel;
use crate::util::serde::{Priority, TimedHandle};

type SharedCallback = Arc<Mutex<Box<dyn FnMut() + Send + 'static>>>;

struct TimedEntry {
    /// `None` when the due time is past what `Instant` can represent.
    due: Option<Instant>,
    delay: Duration,
    repeat: bool,
    callback: SharedCallback,
}

/// Owning-thread timer table keyed by [`TimedHandle`].
#[derive(Default)]
pub struct TimedCallbackScheduler {
    entries: BTreeMap<TimedHandle, TimedEntry>,
    next_id: u64,
}

impl TimedCallbackScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to fire `delay` after `now`, and every `delay`
    /// after that if `repeat` is set.
    pub fn schedule<F>(&mut self, callback: F, delay: Duration, repeat: bool, now: Instant) -> TimedHandle
    where
        F: FnMut() + Send + 'static,
    {
        self.next_id += 1;
        let handle = TimedHandle(self.next_id);
        self.entries.insert(
            handle,
            TimedEntry {
                due: now.checked_add(delay),
                delay,
                repeat,
                callback: Arc::new(Mutex::new(Box::new(callback))),
            },
        );
        debug!(timer_id = handle.id(), delay = ?delay, repeat = repeat, "Timed callback scheduled");
        handle
    }

    /// Remove a timer. Returns `false` if it already fired (one-shot) or was
    /// never registered.
    pub fn cancel(&mut self, handle: TimedHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Push every callback due at `now` into `channel`.
    ///
    /// A timer fires at most once per call. Repeating timers move their due
    /// time forward by `delay`; if that is still not in the future they skip
    /// the missed periods and restart from `now`.
    pub fn fire_due(&mut self, now: Instant, channel: &CallbackChannel) -> usize {
        let mut fired = 0;
        let mut finished = Vec::new();
        for (handle, entry) in &mut self.entries {
            let Some(due) = entry.due else {
                continue;
            };
            if due > now {
                continue;
            }
            let callback = Arc::clone(&entry.callback);
            channel.push(
                Box::new(move || {
                    let mut callback = callback.lock();
                    (*callback)();
                }),
                Priority::Normal,
            );
            fired += 1;
            if entry.repeat {
                entry.due = match due.checked_add(entry.delay) {
                    Some(next) if next > now => Some(next),
                    _ => now.checked_add(entry.delay),
                };
            } else {
                finished.push(*handle);
            }
        }
        for handle in finished {
            self.entries.remove(&handle);
        }
        fired
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all timers.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for TimedCallbackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedCallbackScheduler")
            .field("timers", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        (hits, move || {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_one_shot_fires_once() {
        let channel = CallbackChannel::new();
        let mut timers = TimedCallbackScheduler::new();
        let start = Instant::now();
        let (hits, cb) = counter();
        let handle = timers.schedule(cb, Duration::from_millis(50), false, start);

        assert_eq!(timers.fire_due(start + Duration::from_millis(10), &channel), 0);
        assert_eq!(timers.fire_due(start + Duration::from_millis(60), &channel), 1);
        channel.drain_once();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(timers.fire_due(start + Duration::from_millis(120), &channel), 0);
        assert!(!timers.cancel(handle));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_repeat_advances_by_delay() {
        let channel = CallbackChannel::new();
        let mut timers = TimedCallbackScheduler::new();
        let start = Instant::now();
        let (hits, cb) = counter();
        timers.schedule(cb, Duration::from_millis(50), true, start);

        for step in 1..=3 {
            timers.fire_due(start + Duration::from_millis(50 * step), &channel);
            channel.drain_once();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_repeat_skips_missed_periods() {
        let channel = CallbackChannel::new();
        let mut timers = TimedCallbackScheduler::new();
        let start = Instant::now();
        let (hits, cb) = counter();
        timers.schedule(cb, Duration::from_millis(10), true, start);

        let late = start + Duration::from_millis(100);
        assert_eq!(timers.fire_due(late, &channel), 1);
        assert_eq!(timers.fire_due(late + Duration::from_millis(5), &channel), 0);
        assert_eq!(timers.fire_due(late + Duration::from_millis(10), &channel), 1);
        channel.drain_once();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_before_due() {
        let channel = CallbackChannel::new();
        let mut timers = TimedCallbackScheduler::new();
        let start = Instant::now();
        let (hits, cb) = counter();
        let handle = timers.schedule(cb, Duration::from_millis(5), true, start);

        assert!(timers.cancel(handle));
        timers.fire_due(start + Duration::from_secs(1), &channel);
        channel.drain_once();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrepresentable_delay_never_fires() {
        let channel = CallbackChannel::new();
        let mut timers = TimedCallbackScheduler::new();
        let start = Instant::now();
        let (hits, cb) = counter();
        let (_, repeating) = counter();
        let handle = timers.schedule(cb, Duration::MAX, false, start);
        timers.schedule(repeating, Duration::MAX, true, start);

        assert_eq!(timers.fire_due(start + Duration::from_secs(3600), &channel), 0);
        channel.drain_once();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(timers.len(), 2);
        assert!(timers.cancel(handle));
    }
}
