//! Counter: passthrough packet and byte counting.

use std::any::Any;

use pktgraph::element::Element;
use pktgraph::packet::Packet;
use pktgraph::{Config, ErrorSink, HandlerBuilder};

/// Counts packets and bytes flowing through it, in either discipline.
///
/// Handlers: `count` and `byte_count` (read), `reset` (write).
#[derive(Default)]
pub struct Counter {
    count: u64,
    byte_count: u64,
}

impl Counter {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

impl Element for Counter {
    fn class_name(&self) -> &'static str {
        "Counter"
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn configure(&mut self, _cfg: &Config, _errh: &mut ErrorSink) -> Result<(), ()> {
        // No arguments; reconfiguration is a no-op and never resets counts.
        Ok(())
    }

    fn simple_action(&mut self, packet: Packet) -> Option<Packet> {
        self.count += 1;
        self.byte_count += packet.len() as u64;
        Some(packet)
    }

    fn add_handlers(&self, reg: &mut HandlerBuilder) {
        reg.add_read_handler("count", |el| {
            el.as_any()
                .downcast_ref::<Counter>()
                .map(|c| c.count.to_string())
                .unwrap_or_default()
        });
        reg.add_read_handler("byte_count", |el| {
            el.as_any()
                .downcast_ref::<Counter>()
                .map(|c| c.byte_count.to_string())
                .unwrap_or_default()
        });
        reg.add_write_handler("reset", |el, _arg, _errh| {
            let counter = el.as_any_mut().downcast_mut::<Counter>().ok_or(())?;
            counter.count = 0;
            counter.byte_count = 0;
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
