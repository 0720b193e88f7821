//! Multi-thread driver tests.
//!
//! Producer and consumer tasks live on different driver threads with a
//! queue between them; the queue's signals are the only coordination.
//! Serialized because the drivers busy-poll and time-share badly with
//! parallel tests.

use std::time::{Duration, Instant};

use pktgraph::RouterBuilder;
use pktgraph_elements::default_registry;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_for(router: &pktgraph::Router, path: &str, want: &str, timeout: Duration) -> String {
    let start = Instant::now();
    loop {
        let got = router.handler_read(path).unwrap();
        if got == want || start.elapsed() > timeout {
            return got;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Source on thread 0 feeds a queue drained by an Unqueue on thread 1. All
/// packets arrive exactly once and both drivers exit on stop.
#[test]
#[serial_test::serial]
fn test_two_thread_producer_consumer() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 500, LENGTH 32, BURST 1, THREAD 0")
        .element("q", "Queue", "64")
        .element("uq", "Unqueue", "BURST 4, THREAD 1")
        .element("cnt", "Counter", "")
        .element("sink", "Discard", "")
        .connect("src", 0, "q", 0)
        .connect("q", 0, "uq", 0)
        .connect("uq", 0, "cnt", 0)
        .connect("cnt", 0, "sink", 0)
        .threads(2)
        .pin_thread(0, 0)
        .build()
        .unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| router.run());
        let got = wait_for(&router, "cnt.count", "500", Duration::from_secs(10));
        router.stop();
        assert_eq!(got, "500");
    });
    assert_eq!(router.handler_read("q.drops").unwrap(), "0");
    assert_eq!(router.handler_read("q.length").unwrap(), "0");
}

/// Tasks land on the threads their elements asked for.
#[test]
#[serial_test::serial]
fn test_single_thread_stepping_drives_both_tasks() {
    init_tracing();
    let router = RouterBuilder::new(default_registry())
        .element("src", "InfiniteSource", "LIMIT 10, BURST 1, THREAD 0")
        .element("q", "Queue", "4")
        .element("uq", "Unqueue", "BURST 1, THREAD 1")
        .element("sink", "Discard", "")
        .connect("src", 0, "q", 0)
        .connect("q", 0, "uq", 0)
        .connect("uq", 0, "sink", 0)
        .threads(2)
        .build()
        .unwrap();

    // Stepping only thread 0 runs the source until the queue fills; the
    // consumer never runs because it lives on thread 1.
    while router.step(0) {}
    assert_eq!(router.handler_read("q.length").unwrap(), "4");
    assert_eq!(router.handler_read("sink.count").unwrap(), "0");

    // Stepping both threads drains everything.
    while router.step(0) || router.step(1) {}
    assert_eq!(router.handler_read("q.length").unwrap(), "0");
    assert_eq!(router.handler_read("sink.count").unwrap(), "10");
    assert_eq!(router.handler_read("q.drops").unwrap(), "0");
}
