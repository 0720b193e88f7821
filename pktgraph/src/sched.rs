//! Per-thread run queues and the driver loop.
//!
//! The scheduler owns one [`ThreadState`] per worker thread: a FIFO run queue
//! of [`Task`]s and an expiry-ordered timer heap. A driver iteration fires due
//! timers, then pops and runs exactly one task to completion. Fairness is
//! plain round-robin; there is no preemption and no priority, so within a
//! thread at most one task (or one push/pull call chain) executes at a time
//! and elements never need locking against their own data path.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use arrayvec::ArrayVec;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::task::Task;
use crate::timer::Timer;

/// Due timers handled per driver iteration before tasks run again.
const TIMER_BATCH: usize = 16;

static TIMER_SEQ: AtomicU64 = AtomicU64::new(0);

struct TimerEntry {
    when: Instant,
    seq: u64,
    timer: Timer,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want earliest-first.
        (other.when, other.seq).cmp(&(self.when, self.seq))
    }
}

struct ThreadState {
    queue: Mutex<VecDeque<Task>>,
    timers: Mutex<BinaryHeap<TimerEntry>>,
}

impl ThreadState {
    fn new() -> Self {
        ThreadState {
            queue: Mutex::new(VecDeque::new()),
            timers: Mutex::new(BinaryHeap::new()),
        }
    }
}

/// The task/timer core: per-thread run queues plus the driver loops.
pub struct Scheduler {
    threads: Vec<ThreadState>,
    pins: Vec<Option<usize>>,
    stop: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler with `nthreads` worker threads. `pins` optionally
    /// maps thread ids to CPU ids for affinity (applied on Linux only).
    pub fn new(nthreads: usize, pins: Vec<(usize, usize)>) -> Arc<Scheduler> {
        let nthreads = nthreads.max(1);
        let mut pin_map = vec![None; nthreads];
        for (thread, cpu) in pins {
            if thread < nthreads {
                pin_map[thread] = Some(cpu);
            }
        }
        Arc::new(Scheduler {
            threads: (0..nthreads).map(|_| ThreadState::new()).collect(),
            pins: pin_map,
            stop: AtomicBool::new(false),
        })
    }

    /// Number of worker threads.
    #[inline]
    pub fn nthreads(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn enqueue(&self, thread: usize, task: Task) {
        self.threads[thread].queue.lock().push_back(task);
    }

    pub(crate) fn queue_timer(&self, thread: usize, when: Instant, timer: Timer) {
        let seq = TIMER_SEQ.fetch_add(1, Ordering::Relaxed);
        self.threads[thread].timers.lock().push(TimerEntry { when, seq, timer });
    }

    /// One driver iteration on `thread`: fire due timers, then run the first
    /// live task from the queue. Returns whether a task hook was executed.
    ///
    /// This is the embedding/test entry point; [`run`](Scheduler::run) and
    /// [`run_until_idle`](Scheduler::run_until_idle) are loops over it.
    pub fn step(&self, thread: usize) -> bool {
        self.fire_timers(thread);
        loop {
            let task = self.threads[thread].queue.lock().pop_front();
            let Some(task) = task else {
                return false;
            };
            if task.begin_run() {
                task.run();
                return true;
            }
            // Stale entry (unscheduled while queued); keep looking.
        }
    }

    fn fire_timers(&self, thread: usize) {
        let now = Instant::now();
        loop {
            let mut due: ArrayVec<TimerEntry, TIMER_BATCH> = ArrayVec::new();
            {
                let mut heap = self.threads[thread].timers.lock();
                while let Some(top) = heap.peek() {
                    if top.when > now || due.is_full() {
                        break;
                    }
                    due.push(heap.pop().expect("peeked entry exists"));
                }
            }
            if due.is_empty() {
                return;
            }
            // Hooks run outside the heap lock; they may re-arm timers.
            for entry in due {
                entry.timer.fire_if_due(entry.when);
            }
        }
    }

    /// Earliest armed expiry across all threads, stale entries included.
    fn next_timer_expiry(&self) -> Option<Instant> {
        self.threads
            .iter()
            .filter_map(|ts| ts.timers.lock().peek().map(|e| e.when))
            .min()
    }

    /// Drive every thread's queue on the calling thread until no task is
    /// scheduled and no timer is armed, sleeping through gaps before pending
    /// timers. The quiescence mode used by tests and one-shot runs.
    pub fn run_until_idle(&self) {
        loop {
            let mut progress = false;
            for thread in 0..self.threads.len() {
                while self.step(thread) {
                    progress = true;
                    if self.stop.load(Ordering::Acquire) {
                        return;
                    }
                }
            }
            if progress {
                continue;
            }
            match self.next_timer_expiry() {
                Some(when) => {
                    let now = Instant::now();
                    if when > now {
                        std::thread::sleep(when - now);
                    }
                }
                None => return,
            }
        }
    }

    /// Run one driver loop per thread until [`stop`](Scheduler::stop).
    ///
    /// Thread 0 runs on the calling thread; the rest are spawned. Idle
    /// threads yield rather than block, matching the polling design of the
    /// data path.
    pub fn run(&self) {
        debug!(threads = self.threads.len(), "driver starting");
        if self.threads.len() == 1 {
            self.driver_loop(0);
            return;
        }
        std::thread::scope(|scope| {
            for thread in 1..self.threads.len() {
                scope.spawn(move || self.driver_loop(thread));
            }
            self.driver_loop(0);
        });
        debug!("driver stopped");
    }

    fn driver_loop(&self, thread: usize) {
        self.apply_affinity(thread);
        while !self.stop.load(Ordering::Acquire) {
            if !self.step(thread) {
                std::thread::yield_now();
            }
        }
    }

    /// Ask every driver loop to exit after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[cfg(target_os = "linux")]
    fn apply_affinity(&self, thread: usize) {
        let Some(cpu) = self.pins[thread] else {
            return;
        };
        let mut cpuset = nix::sched::CpuSet::new();
        let pinned = cpuset
            .set(cpu)
            .and_then(|_| nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &cpuset));
        match pinned {
            Ok(()) => debug!(thread, cpu, "pinned driver thread"),
            Err(e) => warn!(thread, cpu, error = %e, "failed to pin driver thread"),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_affinity(&self, thread: usize) {
        if self.pins[thread].is_some() {
            warn!(thread, "cpu pinning unsupported on this platform");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(hits: &Arc<AtomicUsize>, keep_running: bool) -> Task {
        let hits = Arc::clone(hits);
        Task::new(move |t| {
            hits.fetch_add(1, Ordering::Relaxed);
            if keep_running {
                t.reschedule();
            }
            true
        })
    }

    #[test]
    fn test_round_robin_fairness() {
        let sched = Scheduler::new(1, Vec::new());
        let n = 4;
        let counters: Vec<_> = (0..n).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for hits in &counters {
            let task = counting_task(hits, true);
            task.initialize(&sched, 0);
            task.reschedule();
        }
        let rounds = 25;
        for _ in 0..n * rounds {
            assert!(sched.step(0));
        }
        // Strict round-robin: every self-rescheduling task runs exactly once
        // per N iterations.
        for hits in &counters {
            assert_eq!(hits.load(Ordering::Relaxed), rounds);
        }
        sched.stop();
    }

    #[test]
    fn test_step_on_empty_queue_is_false() {
        let sched = Scheduler::new(2, Vec::new());
        assert!(!sched.step(0));
        assert!(!sched.step(1));
    }

    #[test]
    fn test_tasks_land_on_home_thread() {
        let sched = Scheduler::new(2, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let task = counting_task(&hits, false);
        task.initialize(&sched, 1);
        task.reschedule();
        assert!(!sched.step(0), "queued on thread 1, not 0");
        assert!(sched.step(1));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_run_until_idle_terminates_when_tasks_retire() {
        let sched = Scheduler::new(2, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        for thread in 0..2 {
            let task = counting_task(&hits, false);
            task.initialize(&sched, thread);
            task.reschedule();
        }
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_run_stops_on_request() {
        let sched = Scheduler::new(2, Vec::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let task = counting_task(&hits, true);
        task.initialize(&sched, 0);
        task.reschedule();

        // run() blocks until stop(); both driver threads must exit.
        std::thread::scope(|scope| {
            scope.spawn(|| sched.run());
            std::thread::sleep(std::time::Duration::from_millis(20));
            sched.stop();
        });
        assert!(sched.stop_requested());
        assert!(hits.load(Ordering::Relaxed) > 0);
    }
}
