//! Activity signals between producers and consumers.
//!
//! A [`NotifierSignal`] is a cheap derived boolean — "data may be available"
//! or "space may be available". A false reading is trustworthy enough to skip
//! scheduling; a true reading only means "check again". That weak contract is
//! what lets the whole mechanism stay lock-free: the provider flips an atomic
//! flag and wakes listener tasks on the edge, and consumers re-check the
//! signal after doing work so a wakeup racing with their last empty poll is
//! never lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::task::Task;

/// Which signal a consumer is searching for through the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    /// Upstream may have packets to pull ("not empty").
    Empty,
    /// Downstream may have space to push into ("not full").
    Full,
}

#[derive(Clone)]
enum Signal {
    /// Always false: nothing will ever arrive.
    Idle,
    /// Always true: no provider, callers must poll.
    Busy,
    /// True if any flag is set.
    Flags(Vec<Arc<AtomicBool>>),
}

/// A possibly-composed activity signal. Composition is logical OR via `|`:
/// `busy() | s == busy()`, `idle() | s` reads as `s`.
#[derive(Clone)]
pub struct NotifierSignal(Signal);

impl NotifierSignal {
    /// The always-false signal.
    pub fn idle() -> NotifierSignal {
        NotifierSignal(Signal::Idle)
    }

    /// The always-true signal: "never skip, always try".
    pub fn busy() -> NotifierSignal {
        NotifierSignal(Signal::Busy)
    }

    fn from_flag(flag: Arc<AtomicBool>) -> NotifierSignal {
        NotifierSignal(Signal::Flags(vec![flag]))
    }

    /// Current reading. Lock-free; one atomic load per underlying flag.
    #[inline]
    pub fn active(&self) -> bool {
        match &self.0 {
            Signal::Idle => false,
            Signal::Busy => true,
            Signal::Flags(flags) => flags.iter().any(|f| f.load(Ordering::Acquire)),
        }
    }

    /// True if this is the constant-true signal.
    pub fn is_busy(&self) -> bool {
        matches!(self.0, Signal::Busy)
    }

    /// True if this is the constant-false signal.
    pub fn is_idle(&self) -> bool {
        matches!(self.0, Signal::Idle)
    }
}

impl std::ops::BitOr for NotifierSignal {
    type Output = NotifierSignal;

    fn bitor(self, rhs: NotifierSignal) -> NotifierSignal {
        match (self.0, rhs.0) {
            (Signal::Busy, _) | (_, Signal::Busy) => NotifierSignal::busy(),
            (Signal::Idle, other) | (other, Signal::Idle) => NotifierSignal(other),
            (Signal::Flags(mut a), Signal::Flags(b)) => {
                for flag in b {
                    if !a.iter().any(|f| Arc::ptr_eq(f, &flag)) {
                        a.push(flag);
                    }
                }
                NotifierSignal(Signal::Flags(a))
            }
        }
    }
}

impl PartialEq for NotifierSignal {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Signal::Idle, Signal::Idle) | (Signal::Busy, Signal::Busy) => true,
            (Signal::Flags(a), Signal::Flags(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for NotifierSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Signal::Idle => write!(f, "NotifierSignal::idle"),
            Signal::Busy => write!(f, "NotifierSignal::busy"),
            Signal::Flags(flags) => write!(
                f,
                "NotifierSignal({} flags, active={})",
                flags.len(),
                self.active()
            ),
        }
    }
}

/// The provider half of a signal, owned by the element that knows when state
/// changes (a queue going non-empty, a buffer gaining space).
///
/// Listener tasks registered via [`add_listener`](ActiveNotifier::add_listener)
/// are rescheduled on the false-to-true edge.
pub struct ActiveNotifier {
    flag: Arc<AtomicBool>,
    listeners: Mutex<Vec<Task>>,
}

impl ActiveNotifier {
    /// Create a notifier, initially in the given state.
    pub fn new(active: bool) -> ActiveNotifier {
        ActiveNotifier {
            flag: Arc::new(AtomicBool::new(active)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A signal reading this notifier's flag.
    pub fn signal(&self) -> NotifierSignal {
        NotifierSignal::from_flag(Arc::clone(&self.flag))
    }

    /// Register a task to reschedule whenever the notifier wakes.
    pub fn add_listener(&self, task: Task) {
        self.listeners.lock().push(task);
    }

    /// Set the signal true and, on the edge, reschedule all listeners.
    pub fn wake(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            for task in self.listeners.lock().iter() {
                task.reschedule();
            }
        }
    }

    /// Set the signal false. Consumers observing this must re-check after
    /// their final poll (the provider may wake concurrently).
    pub fn sleep(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Current state of the flag.
    #[inline]
    pub fn active(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ActiveNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveNotifier")
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Scheduler;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_busy_absorbs_composition() {
        let n = ActiveNotifier::new(false);
        assert_eq!(NotifierSignal::busy() | n.signal(), NotifierSignal::busy());
        assert_eq!(n.signal() | NotifierSignal::busy(), NotifierSignal::busy());
        assert_eq!(
            NotifierSignal::busy() | NotifierSignal::idle(),
            NotifierSignal::busy()
        );
    }

    #[test]
    fn test_idle_is_identity() {
        let n = ActiveNotifier::new(false);
        let combined = NotifierSignal::idle() | n.signal();
        assert_eq!(combined, n.signal());
        assert!(!combined.active());
        n.wake();
        assert!(combined.active());
    }

    #[test]
    fn test_or_of_flags_reads_any() {
        let a = ActiveNotifier::new(false);
        let b = ActiveNotifier::new(false);
        let both = a.signal() | b.signal();
        assert!(!both.active());
        b.wake();
        assert!(both.active());
        b.sleep();
        a.wake();
        assert!(both.active());
        a.sleep();
        assert!(!both.active());
    }

    #[test]
    fn test_duplicate_flags_collapse() {
        let a = ActiveNotifier::new(false);
        let combined = a.signal() | a.signal();
        assert_eq!(combined, a.signal());
    }

    #[test]
    fn test_wake_reschedules_listener_on_edge_only() {
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

        let n = ActiveNotifier::new(false);
        n.add_listener(task);
        n.wake();
        n.wake(); // already awake: no second wakeup
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        n.sleep();
        n.wake();
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
