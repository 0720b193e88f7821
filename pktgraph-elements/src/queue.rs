//! Queue: the push-to-pull bridge with backpressure signals.

use std::any::Any;
use std::collections::VecDeque;

use pktgraph::element::{Element, PUSH_TO_PULL};
use pktgraph::notifier::{ActiveNotifier, NotifierKind, NotifierSignal};
use pktgraph::packet::Packet;
use pktgraph::port::Ports;
use pktgraph::task::Task;
use pktgraph::{Config, ErrorSink, HandlerBuilder};
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1000;

/// A fixed-capacity FIFO between a push producer and a pull consumer.
///
/// Overflowing packets are dropped and counted. The queue is the canonical
/// notifier provider: it publishes the nonempty signal to pull consumers
/// downstream and the nonfull signal to push producers upstream, so both
/// sides can sleep instead of polling.
///
/// Configuration: capacity as the positional argument or `CAPACITY`
/// (default 1000). Live reconfiguration adjusts the capacity; packets
/// already queued beyond a shrunken capacity drain normally.
pub struct Queue {
    ring: VecDeque<Packet>,
    capacity: usize,
    drops: u64,
    highwater: usize,
    nonempty: ActiveNotifier,
    nonfull: ActiveNotifier,
}

impl Default for Queue {
    fn default() -> Self {
        Queue {
            ring: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
            drops: 0,
            highwater: 0,
            nonempty: ActiveNotifier::new(false),
            nonfull: ActiveNotifier::new(true),
        }
    }
}

impl Queue {
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Re-derive both signals from the ring state. `wake` is edge-triggered,
    /// so calling this after every mutation is cheap.
    fn settle_signals(&self) {
        if self.ring.is_empty() {
            self.nonempty.sleep();
        } else {
            self.nonempty.wake();
        }
        if self.ring.len() >= self.capacity {
            self.nonfull.sleep();
        } else {
            self.nonfull.wake();
        }
    }
}

impl Element for Queue {
    fn class_name(&self) -> &'static str {
        "Queue"
    }

    fn processing(&self) -> &'static str {
        PUSH_TO_PULL
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn configure(&mut self, cfg: &Config, errh: &mut ErrorSink) -> Result<(), ()> {
        let before = errh.nerrors();
        let mut capacity = DEFAULT_CAPACITY;
        if cfg.arg(0).is_some() {
            if let Some(cap) = cfg.require(0, "CAPACITY", errh) {
                capacity = cap;
            }
        }
        capacity = cfg.keyword_or("CAPACITY", capacity, errh);
        if capacity == 0 {
            errh.error("CAPACITY must be at least 1");
        }
        if errh.nerrors() > before {
            return Err(());
        }
        self.capacity = capacity;
        self.settle_signals();
        Ok(())
    }

    fn push(&mut self, _port: usize, packet: Packet, _ports: &Ports) {
        if self.ring.len() >= self.capacity {
            self.drops += 1;
            trace!(drops = self.drops, "queue full, dropping");
            packet.kill();
        } else {
            self.ring.push_back(packet);
            self.highwater = self.highwater.max(self.ring.len());
        }
        self.settle_signals();
    }

    fn pull(&mut self, _port: usize, _ports: &Ports) -> Option<Packet> {
        let packet = self.ring.pop_front();
        self.settle_signals();
        packet
    }

    fn notifier_signal(
        &mut self,
        kind: NotifierKind,
        _port: usize,
        listener: Option<&Task>,
    ) -> Option<NotifierSignal> {
        let notifier = match kind {
            NotifierKind::Empty => &self.nonempty,
            NotifierKind::Full => &self.nonfull,
        };
        if let Some(task) = listener {
            notifier.add_listener(task.clone());
        }
        Some(notifier.signal())
    }

    fn add_handlers(&self, reg: &mut HandlerBuilder) {
        reg.add_read_handler("length", |el| {
            el.as_any()
                .downcast_ref::<Queue>()
                .map(|q| q.ring.len().to_string())
                .unwrap_or_default()
        });
        reg.add_read_handler("capacity", |el| {
            el.as_any()
                .downcast_ref::<Queue>()
                .map(|q| q.capacity.to_string())
                .unwrap_or_default()
        });
        reg.add_read_handler("drops", |el| {
            el.as_any()
                .downcast_ref::<Queue>()
                .map(|q| q.drops.to_string())
                .unwrap_or_default()
        });
        reg.add_read_handler("highwater", |el| {
            el.as_any()
                .downcast_ref::<Queue>()
                .map(|q| q.highwater.to_string())
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
