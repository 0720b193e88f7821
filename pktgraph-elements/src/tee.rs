//! Tee: push fan-out.

use std::any::Any;

use pktgraph::element::{Element, PUSH};
use pktgraph::packet::Packet;
use pktgraph::port::Ports;

/// Duplicates each incoming packet to every output.
///
/// Outputs 0..n-1 receive clones (storage shared until someone writes), the
/// last output receives the original handle.
#[derive(Default)]
pub struct Tee;

impl Element for Tee {
    fn class_name(&self) -> &'static str {
        "Tee"
    }

    fn port_count(&self) -> &'static str {
        "1/2-"
    }

    fn processing(&self) -> &'static str {
        PUSH
    }

    fn push(&mut self, _port: usize, packet: Packet, ports: &Ports) {
        let n = ports.noutputs();
        for i in 0..n - 1 {
            ports.output(i).push(packet.clone());
        }
        ports.output(n - 1).push(packet);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
