//! InfiniteSource: a task-driven packet generator.

use std::any::Any;
use std::time::SystemTime;

use pktgraph::element::{CleanupStage, Element, PORTS_0_1, PUSH};
use pktgraph::notifier::NotifierSignal;
use pktgraph::packet::Packet;
use pktgraph::port::Ports;
use pktgraph::router::InitContext;
use pktgraph::task::Task;
use pktgraph::{Config, ErrorSink, HandlerBuilder};
use tracing::debug;

/// Emits synthetic packets from a task until an optional limit is reached.
///
/// Configuration: `LENGTH` (bytes per packet, default 64), `LIMIT` (stop
/// after this many packets; unset means unlimited), `DATA` (fill byte,
/// default 0), `ACTIVE` (start emitting, default true), `BURST` (packets per
/// task run, default 8), `THREAD` (home thread, default 0).
///
/// The task listens on the downstream full signal: when the path ahead
/// reports no space, the source sleeps until the signal wakes it instead of
/// generating packets that would be dropped.
pub struct InfiniteSource {
    template: Vec<u8>,
    limit: Option<u64>,
    active: bool,
    burst: usize,
    thread: usize,
    count: u64,
    task: Option<Task>,
    full_signal: NotifierSignal,
}

impl Default for InfiniteSource {
    fn default() -> Self {
        InfiniteSource {
            template: vec![0; 64],
            limit: None,
            active: true,
            burst: 8,
            thread: 0,
            count: 0,
            task: None,
            full_signal: NotifierSignal::busy(),
        }
    }
}

impl InfiniteSource {
    fn exhausted(&self) -> bool {
        self.limit.is_some_and(|l| self.count >= l)
    }
}

impl Element for InfiniteSource {
    fn class_name(&self) -> &'static str {
        "InfiniteSource"
    }

    fn port_count(&self) -> &'static str {
        PORTS_0_1
    }

    fn processing(&self) -> &'static str {
        PUSH
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn configure(&mut self, cfg: &Config, errh: &mut ErrorSink) -> Result<(), ()> {
        let before = errh.nerrors();
        let length = cfg.keyword_or("LENGTH", 64usize, errh);
        let data = cfg.keyword_or("DATA", 0u8, errh);
        self.template = vec![data; length];
        self.limit = cfg.keyword("LIMIT", errh);
        self.active = cfg.keyword_or("ACTIVE", true, errh);
        self.burst = cfg.keyword_or("BURST", 8usize, errh).max(1);
        self.thread = cfg.keyword_or("THREAD", 0usize, errh);
        if errh.nerrors() > before {
            return Err(());
        }
        // Live reconfiguration may re-enable an exhausted or paused source.
        if self.active && !self.exhausted() {
            if let Some(task) = &self.task {
                task.reschedule();
            }
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), ()> {
        let task = ctx.register_task(self.thread);
        self.full_signal = ctx.downstream_full_signal(0, Some(&task));
        if self.active {
            task.reschedule();
        }
        self.task = Some(task);
        Ok(())
    }

    fn cleanup(&mut self, _stage: CleanupStage) {
        self.task = None;
    }

    fn run_task(&mut self, task: &Task, ports: &Ports) -> bool {
        if !self.active || self.exhausted() {
            return false;
        }
        if !self.full_signal.active() {
            // No space downstream; the signal reschedules us on wake.
            return false;
        }
        let mut emitted = 0;
        while emitted < self.burst && !self.exhausted() {
            let Some(mut packet) = Packet::from_slice(&self.template) else {
                debug!("packet allocation failed, backing off");
                break;
            };
            packet.anno_mut().set_timestamp(SystemTime::now());
            self.count += 1;
            emitted += 1;
            ports.output(0).push(packet);
        }
        if !self.exhausted() {
            task.reschedule();
        }
        emitted > 0
    }

    fn add_handlers(&self, reg: &mut HandlerBuilder) {
        reg.add_read_handler("count", |el| {
            el.as_any()
                .downcast_ref::<InfiniteSource>()
                .map(|s| s.count.to_string())
                .unwrap_or_default()
        });
        reg.add_write_handler("reset", |el, _arg, _errh| {
            let src = el.as_any_mut().downcast_mut::<InfiniteSource>().ok_or(())?;
            src.count = 0;
            if src.active {
                if let Some(task) = &src.task {
                    task.reschedule();
                }
            }
            Ok(())
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
    fn test_configure_defaults_and_overrides() {
        let mut src = InfiniteSource::default();
        let mut errh = ErrorSink::new();
        src.configure(&Config::parse("LENGTH 9, LIMIT 3, DATA 7, BURST 2"), &mut errh)
            .unwrap();
        assert_eq!(errh.nerrors(), 0);
        assert_eq!(src.template, vec![7u8; 9]);
        assert_eq!(src.limit, Some(3));
        assert_eq!(src.burst, 2);
        assert!(src.active);
    }

    #[test]
    fn test_burst_of_zero_is_clamped() {
        let mut src = InfiniteSource::default();
        let mut errh = ErrorSink::new();
        src.configure(&Config::parse("BURST 0"), &mut errh).unwrap();
        assert_eq!(src.burst, 1);
    }

    #[test]
    fn test_malformed_limit_fails() {
        let mut src = InfiniteSource::default();
        let mut errh = ErrorSink::new();
        assert!(src.configure(&Config::parse("LIMIT never"), &mut errh).is_err());
        assert_eq!(errh.nerrors(), 1);
    }
}
