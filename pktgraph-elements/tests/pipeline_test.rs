//! End-to-end element graph tests.
//!
//! Builds small routers out of catalog elements, drives them to quiescence
//! on the calling thread, and inspects results through the handler registry.

use std::any::Any;

use pktgraph::element::{Element, PORTS_1_0, PUSH};
use pktgraph::packet::Packet;
use pktgraph::port::Ports;
use pktgraph::{Error, RouterBuilder};
use pktgraph_elements::default_registry;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Push sink that keeps every packet it receives, for byte-level inspection.
struct CaptureSink {
    packets: Vec<Packet>,
}

impl Element for CaptureSink {
    fn class_name(&self) -> &'static str {
        "CaptureSink"
    }
    fn port_count(&self) -> &'static str {
        PORTS_1_0
    }
    fn processing(&self) -> &'static str {
        PUSH
    }
    fn push(&mut self, _port: usize, packet: Packet, _ports: &Ports) {
        self.packets.push(packet);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn capture() -> Box<CaptureSink> {
    Box::new(CaptureSink { packets: Vec::new() })
}

/// Scenario 1: a bounded source through a counter into a sink. The driver
/// must quiesce once the limit is reached and every packet must be counted.
#[test]
fn test_source_counter_discard() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 3, LENGTH 64")
        .element("cnt", "Counter", "")
        .element("sink", "Discard", "")
        .connect("src", 0, "cnt", 0)
        .connect("cnt", 0, "sink", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    assert_eq!(router.handler_read("src.count").unwrap(), "3");
    assert_eq!(router.handler_read("cnt.count").unwrap(), "3");
    assert_eq!(router.handler_read("cnt.byte_count").unwrap(), "192");
    assert_eq!(router.handler_read("sink.count").unwrap(), "3");
}

/// Scenario 2: push producer through a queue to a pull-side consumer driven
/// by the empty/full signals. Backpressure keeps the small queue from
/// dropping, and the graph quiesces once the source is exhausted.
#[test]
fn test_queue_bridge_with_backpressure() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 100, LENGTH 32, BURST 1")
        .element("q", "Queue", "4")
        .element("uq", "Unqueue", "BURST 3")
        .element("cnt", "Counter", "")
        .element("sink", "Discard", "")
        .connect("src", 0, "q", 0)
        .connect("q", 0, "uq", 0)
        .connect("uq", 0, "cnt", 0)
        .connect("cnt", 0, "sink", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    assert_eq!(router.handler_read("q.drops").unwrap(), "0");
    assert_eq!(router.handler_read("q.length").unwrap(), "0");
    assert_eq!(router.handler_read("cnt.count").unwrap(), "100");
    assert_eq!(router.handler_read("cnt.byte_count").unwrap(), "3200");
}

/// Scenario 3: a pull sink (Discard on the pull side of a queue) drains the
/// queue from its own task and sleeps when the queue reports empty.
#[test]
fn test_pull_discard_drains_queue() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 25, BURST 1")
        .element("q", "Queue", "8")
        .element("sink", "Discard", "")
        .connect("src", 0, "q", 0)
        .connect("q", 0, "sink", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    assert_eq!(router.handler_read("q.length").unwrap(), "0");
    assert_eq!(router.handler_read("q.drops").unwrap(), "0");
    assert_eq!(router.handler_read("sink.count").unwrap(), "25");
}

/// Prepend-then-strip through the graph restores the payload bit-exactly:
/// Unstrip re-exposes headroom, Strip takes the same bytes back off.
#[test]
fn test_unstrip_strip_roundtrip() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 1, LENGTH 64, DATA 171")
        .element("grow", "Unstrip", "14")
        .element("trim", "Strip", "14")
        .element_instance("cap", capture(), "")
        .connect("src", 0, "grow", 0)
        .connect("grow", 0, "trim", 0)
        .connect("trim", 0, "cap", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    let cap = router.element("cap").unwrap();
    cap.with(|el| {
        let sink = el.as_any().downcast_ref::<CaptureSink>().unwrap();
        assert_eq!(sink.packets.len(), 1);
        assert_eq!(sink.packets[0].data(), &[171u8; 64][..]);
    });
}

/// Tee fan-out shares storage until a branch writes; the write must not be
/// visible on the other branch.
#[test]
fn test_tee_fanout_cow_isolation() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 1, LENGTH 64, DATA 5")
        .element("tee", "Tee", "")
        .element("trim", "Strip", "10")
        .element_instance("cap_a", capture(), "")
        .element_instance("cap_b", capture(), "")
        .connect("src", 0, "tee", 0)
        .connect("tee", 0, "trim", 0)
        .connect("trim", 0, "cap_a", 0)
        .connect("tee", 1, "cap_b", 0)
        .build()
        .unwrap();
    router.run_until_idle();

    // Branch A saw the stripped view, branch B the full packet; the strip
    // only moved A's window, so the storage is still shared.
    let a = router
        .element("cap_a")
        .unwrap()
        .with(|el| el.as_any_mut().downcast_mut::<CaptureSink>().unwrap().packets.remove(0));
    let b_handle = router.element("cap_b").unwrap().clone();
    b_handle.with(|el| {
        let sink = el.as_any().downcast_ref::<CaptureSink>().unwrap();
        assert_eq!(sink.packets[0].len(), 64);
    });
    assert_eq!(a.len(), 54);

    // Writing through one branch's handle must not leak into the other.
    let mut wa = a.uniqueify().unwrap();
    wa.data_mut().fill(0xEE);
    b_handle.with(|el| {
        let sink = el.as_any().downcast_ref::<CaptureSink>().unwrap();
        assert_eq!(sink.packets[0].data(), &[5u8; 64][..]);
    });
}

/// Handler reads/writes and live reconfiguration through the router.
#[test]
fn test_handlers_and_live_reconfigure() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 2, LENGTH 16")
        .element("cnt", "Counter", "")
        .element("sink", "Discard", "")
        .connect("src", 0, "cnt", 0)
        .connect("cnt", 0, "sink", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    assert_eq!(router.handler_read("cnt.count").unwrap(), "2");

    router.handler_write("cnt.reset", "").unwrap();
    assert_eq!(router.handler_read("cnt.count").unwrap(), "0");

    // Raising the source limit at runtime resumes emission.
    router.live_reconfigure("src", "LIMIT 5, LENGTH 16").unwrap();
    router.run_until_idle();
    assert_eq!(router.handler_read("src.count").unwrap(), "5");
    assert_eq!(router.handler_read("cnt.count").unwrap(), "3");

    // Strip does not opt into live reconfiguration.
    let router2 = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 1")
        .element("trim", "Strip", "4")
        .element("sink", "Discard", "")
        .connect("src", 0, "trim", 0)
        .connect("trim", 0, "sink", 0)
        .build()
        .unwrap();
    assert!(matches!(
        router2.live_reconfigure("trim", "8"),
        Err(Error::NotReconfigurable(_))
    ));
}

/// A queue smaller than the offered load drops and counts the excess when
/// the producer ignores backpressure within a burst.
#[test]
fn test_queue_overflow_accounting() {
    init_tracing();
    // BURST 8 against capacity 4: the source checks the full signal once per
    // run, so each run can overshoot by up to BURST - 1.
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 8, BURST 8")
        .element("q", "Queue", "4")
        .element("sink", "Discard", "")
        .connect("src", 0, "q", 0)
        .connect("q", 0, "sink", 0)
        .build()
        .unwrap();
    router.run_until_idle();
    let drops: u64 = router.handler_read("q.drops").unwrap().parse().unwrap();
    let delivered: u64 = router.handler_read("sink.count").unwrap().parse().unwrap();
    assert_eq!(drops + delivered, 8);
    assert_eq!(router.handler_read("q.length").unwrap(), "0");
}
