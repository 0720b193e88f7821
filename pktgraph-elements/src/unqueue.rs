//! Unqueue: the pull-to-push adapter.

use std::any::Any;

use pktgraph::element::{CleanupStage, Element, PULL_TO_PUSH};
use pktgraph::notifier::NotifierSignal;
use pktgraph::port::Ports;
use pktgraph::router::InitContext;
use pktgraph::task::Task;
use pktgraph::{Config, ErrorSink, HandlerBuilder};

/// Actively pulls packets upstream and pushes them downstream.
///
/// A task pulls up to `BURST` packets per run (default 8). When upstream
/// comes up empty the task sleeps on the upstream empty signal; the signal
/// is re-checked after the failed pull so a wake racing with it is never
/// lost. `THREAD` picks the home thread.
pub struct Unqueue {
    burst: usize,
    thread: usize,
    count: u64,
    task: Option<Task>,
    upstream: NotifierSignal,
}

impl Default for Unqueue {
    fn default() -> Self {
        Unqueue {
            burst: 8,
            thread: 0,
            count: 0,
            task: None,
            upstream: NotifierSignal::busy(),
        }
    }
}

impl Element for Unqueue {
    fn class_name(&self) -> &'static str {
        "Unqueue"
    }

    fn processing(&self) -> &'static str {
        PULL_TO_PUSH
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn configure(&mut self, cfg: &Config, errh: &mut ErrorSink) -> Result<(), ()> {
        let before = errh.nerrors();
        self.burst = cfg.keyword_or("BURST", 8usize, errh).max(1);
        self.thread = cfg.keyword_or("THREAD", 0usize, errh);
        if errh.nerrors() > before {
            return Err(());
        }
        if let Some(task) = &self.task {
            task.reschedule();
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), ()> {
        let task = ctx.register_task(self.thread);
        self.upstream = ctx.upstream_empty_signal(0, Some(&task));
        task.reschedule();
        self.task = Some(task);
        Ok(())
    }

    fn cleanup(&mut self, _stage: CleanupStage) {
        self.task = None;
    }

    fn run_task(&mut self, task: &Task, ports: &Ports) -> bool {
        let mut moved = 0;
        while moved < self.burst {
            let Some(packet) = ports.input(0).pull() else {
                break;
            };
            moved += 1;
            self.count += 1;
            ports.output(0).push(packet);
        }
        if moved == self.burst || self.upstream.active() {
            // Either more work is likely waiting, or the signal went active
            // again between our last pull and this check.
            task.reschedule();
        }
        moved > 0
    }

    fn add_handlers(&self, reg: &mut HandlerBuilder) {
        reg.add_read_handler("count", |el| {
            el.as_any()
                .downcast_ref::<Unqueue>()
                .map(|u| u.count.to_string())
                .unwrap_or_default()
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_clamps_burst() {
        let mut unqueue = Unqueue::default();
        let mut errh = ErrorSink::new();
        unqueue.configure(&Config::parse("BURST 0"), &mut errh).unwrap();
        assert_eq!(unqueue.burst, 1);
        unqueue.configure(&Config::parse("BURST 32"), &mut errh).unwrap();
        assert_eq!(unqueue.burst, 32);
    }
}
