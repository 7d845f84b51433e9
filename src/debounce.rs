//! Trailing-edge debounce with a single cancelable pending task.
//!
//! Time is whatever monotonic clock the host drives the slots with, passed
//! in as a [`Duration`] since an arbitrary origin. The debouncer never reads
//! a clock itself, so tests step time explicitly.

use std::time::Duration;

/// Identifies one scheduled run, so logs can tell superseded runs apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    id: TaskId,
    due: Duration,
}

/// At most one pending run; scheduling again replaces it.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<Pending>,
    next_id: u64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next_id: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule a run at `now + delay`, cancelling any pending one.
    pub fn schedule(&mut self, now: Duration) -> TaskId {
        if let Some(previous) = self.cancel() {
            tracing::trace!(task = previous.0, "debounced run superseded");
        }
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.pending = Some(Pending {
            id,
            due: now + self.delay,
        });
        id
    }

    /// Drop the pending run, if any.
    pub fn cancel(&mut self) -> Option<TaskId> {
        self.pending.take().map(|p| p.id)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn due_at(&self) -> Option<Duration> {
        self.pending.map(|p| p.due)
    }

    /// Take the pending run if it is due at `now`.
    pub fn poll(&mut self, now: Duration) -> Option<TaskId> {
        match self.pending {
            Some(p) if now >= p.due => {
                self.pending = None;
                Some(p.id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn fires_once_after_delay() {
        let mut d = Debouncer::new(ms(250));
        let id = d.schedule(ms(0));
        assert_eq!(d.poll(ms(249)), None);
        assert_eq!(d.poll(ms(250)), Some(id));
        assert_eq!(d.poll(ms(500)), None);
    }

    #[test]
    fn reschedule_pushes_deadline_and_replaces_task() {
        let mut d = Debouncer::new(ms(250));
        let first = d.schedule(ms(0));
        let second = d.schedule(ms(100));
        assert_ne!(first, second);
        assert_eq!(d.due_at(), Some(ms(350)));
        assert_eq!(d.poll(ms(300)), None);
        assert_eq!(d.poll(ms(350)), Some(second));
    }

    #[test]
    fn cancel_clears_pending() {
        let mut d = Debouncer::new(ms(10));
        d.schedule(ms(0));
        assert!(d.cancel().is_some());
        assert!(!d.is_pending());
        assert_eq!(d.poll(ms(100)), None);
    }
}
