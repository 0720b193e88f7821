//! Discard: the graph's packet sink.

use std::any::Any;

use pktgraph::element::{CleanupStage, Element, PORTS_1_0};
use pktgraph::notifier::NotifierSignal;
use pktgraph::packet::Packet;
use pktgraph::port::{Discipline, Ports};
use pktgraph::router::InitContext;
use pktgraph::task::Task;
use pktgraph::HandlerBuilder;

/// Kills every packet it receives.
///
/// On a push input, packets die on the caller's stack. On a pull input, a
/// task drains upstream, sleeping on the upstream empty signal so an empty
/// source costs nothing.
#[derive(Default)]
pub struct Discard {
    count: u64,
    task: Option<Task>,
    upstream: Option<NotifierSignal>,
}

impl Element for Discard {
    fn class_name(&self) -> &'static str {
        "Discard"
    }

    fn port_count(&self) -> &'static str {
        PORTS_1_0
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), ()> {
        if ctx.input_discipline(0) == Discipline::Pull {
            let task = ctx.register_task(0);
            self.upstream = Some(ctx.upstream_empty_signal(0, Some(&task)));
            task.reschedule();
            self.task = Some(task);
        }
        Ok(())
    }

    fn cleanup(&mut self, _stage: CleanupStage) {
        self.task = None;
    }

    fn push(&mut self, _port: usize, packet: Packet, _ports: &Ports) {
        self.count += 1;
        packet.kill();
    }

    fn run_task(&mut self, task: &Task, ports: &Ports) -> bool {
        match ports.input(0).pull() {
            Some(packet) => {
                self.count += 1;
                packet.kill();
                task.reschedule();
                true
            }
            None => {
                // Re-check after the failed pull: a wake racing with it must
                // not be lost.
                let busy = self.upstream.as_ref().is_none_or(|s| s.active());
                if busy {
                    task.reschedule();
                }
                false
            }
        }
    }

    fn add_handlers(&self, reg: &mut HandlerBuilder) {
        reg.add_read_handler("count", |el| {
            el.as_any()
                .downcast_ref::<Discard>()
                .map(|d| d.count.to_string())
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
    fn test_push_kills_and_counts() {
        let mut discard = Discard::default();
        let ports = Ports::empty();
        let p = Packet::make(32).unwrap();
        let witness = p.clone();
        assert_eq!(witness.use_count(), 2);
        discard.push(0, p, &ports);
        assert_eq!(discard.count, 1);
        assert_eq!(witness.use_count(), 1, "discard released its handle");
    }
}
