//! Cooperative, run-to-completion tasks.
//!
//! A task wraps a work hook (`FnMut(&Task) -> bool`) and a home thread. The
//! per-thread driver pops scheduled tasks in FIFO order and runs each to
//! completion; a task that wants to run again calls [`Task::reschedule`]
//! itself, typically after checking a notifier signal. This keeps the choice
//! between busy-polling and on-demand wakeup with the element, not the core.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::sched::Scheduler;

type TaskHook = Box<dyn FnMut(&Task) -> bool + Send>;

struct TaskInner {
    /// The task wants to run.
    scheduled: AtomicBool,
    /// The task sits in some thread's run queue. Kept separate from
    /// `scheduled` so lazy queue removal never double-enqueues.
    queued: AtomicBool,
    /// The hook is currently executing.
    running: AtomicBool,
    home_thread: AtomicUsize,
    sched: OnceLock<Arc<Scheduler>>,
    hook: Mutex<TaskHook>,
}

/// A schedulable unit of cooperative work. Cloning yields another handle to
/// the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task around a work hook. The hook returns whether it did
    /// useful work; it is not rescheduled automatically.
    pub fn new(hook: impl FnMut(&Task) -> bool + Send + 'static) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                scheduled: AtomicBool::new(false),
                queued: AtomicBool::new(false),
                running: AtomicBool::new(false),
                home_thread: AtomicUsize::new(0),
                sched: OnceLock::new(),
                hook: Mutex::new(Box::new(hook)),
            }),
        }
    }

    /// Bind the task to a scheduler and home thread. A reschedule that
    /// happened before initialization takes effect now.
    pub fn initialize(&self, sched: &Arc<Scheduler>, thread: usize) {
        self.inner.home_thread.store(thread, Ordering::Release);
        let _ = self.inner.sched.set(Arc::clone(sched));
        if self.inner.scheduled.load(Ordering::Acquire) {
            self.try_enqueue();
        }
    }

    /// The thread whose run queue this task joins when rescheduled.
    #[inline]
    pub fn home_thread(&self) -> usize {
        self.inner.home_thread.load(Ordering::Acquire)
    }

    /// Move the task to another thread's run queue.
    ///
    /// Takes effect at the next reschedule; an entry already queued on the
    /// old thread still runs there once. Must not race with the task's own
    /// execution. Returns `false` for an out-of-range thread id.
    pub fn move_thread(&self, thread: usize) -> bool {
        match self.inner.sched.get() {
            Some(sched) if thread >= sched.nthreads() => false,
            _ => {
                self.inner.home_thread.store(thread, Ordering::Release);
                true
            }
        }
    }

    /// True if the task is marked to run.
    #[inline]
    pub fn scheduled(&self) -> bool {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// Mark the task runnable and queue it on its home thread.
    ///
    /// No-op if already scheduled. Called from inside the task's own hook it
    /// re-queues the task at the tail after the hook returns, which is what
    /// gives round-robin fairness between busy tasks.
    pub fn reschedule(&self) {
        self.inner.scheduled.store(true, Ordering::Release);
        if self.inner.running.load(Ordering::Acquire) {
            // The driver re-queues after the hook returns.
            return;
        }
        self.try_enqueue();
    }

    /// Withdraw the task from scheduling. A queued entry is skipped lazily;
    /// a currently running hook still runs to completion.
    pub fn unschedule(&self) {
        self.inner.scheduled.store(false, Ordering::Release);
    }

    fn try_enqueue(&self) {
        let Some(sched) = self.inner.sched.get() else {
            return;
        };
        if !self.inner.queued.swap(true, Ordering::AcqRel) {
            sched.enqueue(self.home_thread(), self.clone());
        }
    }

    /// Driver side: claim a popped queue entry. Returns `false` when the
    /// entry is stale (the task was unscheduled while queued).
    pub(crate) fn begin_run(&self) -> bool {
        self.inner.queued.store(false, Ordering::Release);
        self.inner.scheduled.swap(false, Ordering::AcqRel)
    }

    /// Driver side: execute the hook to completion, then honor a reschedule
    /// requested during the run.
    pub(crate) fn run(&self) -> bool {
        self.inner.running.store(true, Ordering::Release);
        let work = {
            let mut hook = self.inner.hook.lock();
            (hook.as_mut())(self)
        };
        self.inner.running.store(false, Ordering::Release);
        if self.inner.scheduled.load(Ordering::Acquire) {
            self.try_enqueue();
        }
        work
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("scheduled", &self.scheduled())
            .field("home_thread", &self.home_thread())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reschedule_before_initialize_is_deferred() {
        let sched = Scheduler::new(1, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let task = Task::new({
            let hits = Arc::clone(&hits);
            move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
                true
            }
        });
        task.reschedule();
        assert!(task.scheduled());
        assert!(!sched.step(0), "nothing queued before initialize");

        task.initialize(&sched, 0);
        assert!(sched.step(0));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_double_reschedule_runs_once() {
        let sched = Scheduler::new(1, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let task = Task::new({
            let hits = Arc::clone(&hits);
            move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
                true
            }
        });
        task.initialize(&sched, 0);
        task.reschedule();
        task.reschedule();
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unschedule_skips_queued_entry() {
        let sched = Scheduler::new(1, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let task = Task::new({
            let hits = Arc::clone(&hits);
            move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
                true
            }
        });
        task.initialize(&sched, 0);
        task.reschedule();
        task.unschedule();
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert!(!task.scheduled());
    }

    #[test]
    fn test_self_reschedule_requeues_at_tail() {
        let sched = Scheduler::new(1, Vec::new());
        let remaining = Arc::new(AtomicUsize::new(3));
        let task = Task::new({
            let remaining = Arc::clone(&remaining);
            move |t| {
                if remaining.fetch_sub(1, Ordering::Relaxed) > 1 {
                    t.reschedule();
                }
                true
            }
        });
        task.initialize(&sched, 0);
        task.reschedule();
        sched.run_until_idle();
        assert_eq!(remaining.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_move_thread_bounds() {
        let sched = Scheduler::new(2, Vec::new());
        let task = Task::new(|_| false);
        task.initialize(&sched, 0);
        assert!(task.move_thread(1));
        assert_eq!(task.home_thread(), 1);
        assert!(!task.move_thread(2));
        assert_eq!(task.home_thread(), 1);
    }
}
