//! Strip and Unstrip: data-window header operations.

use std::any::Any;

use pktgraph::element::Element;
use pktgraph::packet::Packet;
use pktgraph::{Config, ErrorSink};
use tracing::trace;

/// Strips a fixed number of bytes from the front of each packet.
///
/// The bytes stay in headroom, so a downstream [`Unstrip`] of the same
/// width restores them exactly. Packets shorter than the strip width are
/// dropped.
#[derive(Default)]
pub struct Strip {
    nbytes: usize,
}

impl Element for Strip {
    fn class_name(&self) -> &'static str {
        "Strip"
    }

    fn configure(&mut self, cfg: &Config, errh: &mut ErrorSink) -> Result<(), ()> {
        self.nbytes = cfg.require(0, "LENGTH", errh).ok_or(())?;
        Ok(())
    }

    fn simple_action(&mut self, mut packet: Packet) -> Option<Packet> {
        if packet.pull(self.nbytes) {
            Some(packet)
        } else {
            trace!(len = packet.len(), nbytes = self.nbytes, "packet too short");
            packet.kill();
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Prepends a fixed number of bytes to each packet.
///
/// When the bytes are still in headroom (for example after a [`Strip`]),
/// they are re-exposed in place; otherwise the packet grows into a fresh
/// buffer with zeroed prefix bytes. Drops the packet on allocation failure.
#[derive(Default)]
pub struct Unstrip {
    nbytes: usize,
}

impl Element for Unstrip {
    fn class_name(&self) -> &'static str {
        "Unstrip"
    }

    fn configure(&mut self, cfg: &Config, errh: &mut ErrorSink) -> Result<(), ()> {
        self.nbytes = cfg.require(0, "LENGTH", errh).ok_or(())?;
        Ok(())
    }

    fn simple_action(&mut self, packet: Packet) -> Option<Packet> {
        match packet.push(self.nbytes) {
            Some(writable) => Some(writable.into_packet()),
            None => {
                trace!(nbytes = self.nbytes, "prepend failed");
                None
            }
        }
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

    fn configured<T: Element + Default>(n: usize) -> T {
        let mut el = T::default();
        let mut errh = ErrorSink::new();
        el.configure(&Config::parse(&n.to_string()), &mut errh).unwrap();
        el
    }

    #[test]
    fn test_strip_then_unstrip_restores_bytes() {
        let original: Vec<u8> = (0..64).collect();
        let packet = Packet::from_slice(&original).unwrap();

        let mut strip: Strip = configured(14);
        let stripped = strip.simple_action(packet).unwrap();
        assert_eq!(stripped.data(), &original[14..]);

        let mut unstrip: Unstrip = configured(14);
        let restored = unstrip.simple_action(stripped).unwrap();
        assert_eq!(restored.data(), &original[..]);
    }

    #[test]
    fn test_strip_drops_short_packets() {
        let mut strip: Strip = configured(20);
        let packet = Packet::make(10).unwrap();
        assert!(strip.simple_action(packet).is_none());
    }

    #[test]
    fn test_unstrip_without_headroom_zero_fills() {
        let packet = Packet::make_with(0, 8, 0).unwrap();
        let mut unstrip: Unstrip = configured(4);
        let out = unstrip.simple_action(packet).unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(&out.data()[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_missing_length_is_config_error() {
        let mut strip = Strip::default();
        let mut errh = ErrorSink::new();
        assert!(strip.configure(&Config::empty(), &mut errh).is_err());
        assert_eq!(errh.nerrors(), 1);
    }
}
