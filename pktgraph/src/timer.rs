//! Expiry-ordered timers.
//!
//! Timers piggyback on the driver loop: once per iteration the driver pops
//! due entries from its thread's timer heap and runs their hooks synchronously
//! on that thread. There is no preemption; a common hook simply reschedules a
//! task. Cancellation is lazy: unscheduling clears the expiry, and the stale
//! heap entry is discarded when it surfaces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::sched::Scheduler;
use crate::task::Task;

type TimerHook = Box<dyn FnMut(&Timer) + Send>;

struct TimerInner {
    sched: OnceLock<Arc<Scheduler>>,
    home_thread: AtomicUsize,
    expiry: Mutex<Option<Instant>>,
    hook: Mutex<TimerHook>,
}

/// A one-shot timer. Re-arm it from its own hook for periodic behavior.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Create a timer around a hook, run on the checking thread at expiry.
    pub fn new(hook: impl FnMut(&Timer) + Send + 'static) -> Timer {
        Timer {
            inner: Arc::new(TimerInner {
                sched: OnceLock::new(),
                home_thread: AtomicUsize::new(0),
                expiry: Mutex::new(None),
                hook: Mutex::new(Box::new(hook)),
            }),
        }
    }

    /// A timer whose hook reschedules `task` — the usual way an element turns
    /// a timeout into work.
    pub fn for_task(task: Task) -> Timer {
        Timer::new(move |_| task.reschedule())
    }

    /// Bind the timer to a scheduler and checking thread.
    pub fn initialize(&self, sched: &Arc<Scheduler>, thread: usize) {
        self.inner.home_thread.store(thread, Ordering::Release);
        let _ = self.inner.sched.set(Arc::clone(sched));
    }

    /// Arm the timer to fire at `when`. Re-arming replaces the previous
    /// expiry; the superseded heap entry is discarded lazily.
    pub fn schedule_at(&self, when: Instant) {
        *self.inner.expiry.lock() = Some(when);
        if let Some(sched) = self.inner.sched.get() {
            sched.queue_timer(self.inner.home_thread.load(Ordering::Acquire), when, self.clone());
        }
    }

    /// Arm the timer to fire `after` from now.
    pub fn schedule_after(&self, after: Duration) {
        self.schedule_at(Instant::now() + after);
    }

    /// Disarm the timer.
    pub fn unschedule(&self) {
        *self.inner.expiry.lock() = None;
    }

    /// True if the timer is armed.
    pub fn scheduled(&self) -> bool {
        self.inner.expiry.lock().is_some()
    }

    /// The armed expiry, if any.
    pub fn expiry(&self) -> Option<Instant> {
        *self.inner.expiry.lock()
    }

    /// Driver side: run the hook if this heap entry is still the live one.
    pub(crate) fn fire_if_due(&self, entry_expiry: Instant) -> bool {
        {
            let mut expiry = self.inner.expiry.lock();
            match *expiry {
                Some(live) if live == entry_expiry => *expiry = None,
                _ => return false, // stale entry: re-armed or cancelled
            }
        }
        let mut hook = self.inner.hook.lock();
        (hook.as_mut())(self);
        true
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("scheduled", &self.scheduled())
            .finish()
    }
}
