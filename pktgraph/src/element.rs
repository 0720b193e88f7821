//! The element contract: graph nodes implementing the push/pull data path.
//!
//! Every processing unit implements [`Element`]. The core only ever sees the
//! trait — concrete element types are plugins registered by class name — so
//! the catalog can grow without the engine changing.
//!
//! Data movement is synchronous: a push call chain runs on the caller's
//! stack from producer to consumer with no suspension points, and a pull
//! chain likewise from consumer to producer. Elements must not block.

use std::any::Any;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::ErrorSink;
use crate::notifier::{NotifierKind, NotifierSignal};
use crate::packet::Packet;
use crate::port::Ports;
use crate::router::InitContext;
use crate::task::Task;

/// Port-count declaration: one input, one output.
pub const PORTS_1_1: &str = "1/1";
/// Port-count declaration: no inputs, one output (a source).
pub const PORTS_0_1: &str = "0/1";
/// Port-count declaration: one input, no outputs (a sink).
pub const PORTS_1_0: &str = "1/0";

/// Processing declaration: all ports push.
pub const PUSH: &str = "h/h";
/// Processing declaration: all ports pull.
pub const PULL: &str = "l/l";
/// Processing declaration: all ports agnostic.
pub const AGNOSTIC: &str = "a/a";
/// Processing declaration: push input, pull output (queue-like).
pub const PUSH_TO_PULL: &str = "h/l";
/// Processing declaration: pull input, push output (unqueue-like).
pub const PULL_TO_PUSH: &str = "l/h";

/// Configure phase for information/naming elements that others read during
/// their own configuration.
pub const CONFIGURE_PHASE_INFO: i32 = 20;
/// Default configure phase for ordinary processing elements.
pub const CONFIGURE_PHASE_DEFAULT: i32 = 100;

/// How far the lifecycle got before cleanup was invoked. Cleanup must be
/// idempotent per resource and safe at any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStage {
    /// This element's own `configure` failed.
    ConfigureFailed,
    /// Configured, but initialization never completed (some element failed).
    Configured,
    /// This element's own `initialize` failed.
    InitializeFailed,
    /// Fully initialized; normal teardown.
    Initialized,
}

/// A packet-processing graph node.
///
/// Implementors override the lifecycle hooks and data-path methods they
/// need. A 1-input/1-output agnostic transform only overrides
/// [`simple_action`](Element::simple_action); the default `push` and `pull`
/// adapt it to whichever discipline flow resolution assigns.
pub trait Element: Send {
    /// The class name this element registers under.
    fn class_name(&self) -> &'static str;

    /// Port-count declaration, e.g. `"1/1"`, `"0/1"`, `"1/2-"`, `"-/1"`.
    fn port_count(&self) -> &'static str {
        PORTS_1_1
    }

    /// Processing declaration, e.g. [`PUSH`], [`AGNOSTIC`], `"h/l"`, `"a/ah"`.
    /// Per-port codes: `h` push, `l` pull, `a` agnostic; the last code on a
    /// side repeats for any remaining ports.
    fn processing(&self) -> &'static str {
        AGNOSTIC
    }

    /// Elements with lower phases configure first.
    fn configure_phase(&self) -> i32 {
        CONFIGURE_PHASE_DEFAULT
    }

    /// Parse configuration arguments. Must be idempotent and free of
    /// irreversible side effects; record problems in `errh` and return `Err`.
    fn configure(&mut self, _cfg: &Config, _errh: &mut ErrorSink) -> Result<(), ()> {
        Ok(())
    }

    /// Whether [`configure`](Element::configure) may be re-run at runtime.
    fn can_live_reconfigure(&self) -> bool {
        false
    }

    /// Acquire runtime resources: register tasks and timers, resolve
    /// notifier signals. Runs only after every element configured.
    fn initialize(&mut self, _ctx: &mut InitContext<'_>) -> Result<(), ()> {
        Ok(())
    }

    /// Release resources. Called on teardown and on partial-initialization
    /// failure, in reverse initialization order. Elements that stored tasks
    /// or timers must drop them here; task hooks hold a handle back to the
    /// element.
    fn cleanup(&mut self, _stage: CleanupStage) {}

    /// Receive a packet on a push input. The element must forward ownership
    /// to exactly one place or kill the packet.
    fn push(&mut self, port: usize, packet: Packet, ports: &Ports) {
        let _ = port;
        if let Some(p) = self.simple_action(packet) {
            ports.output(0).push(p);
        }
    }

    /// Produce a packet on a pull output, or `None` if nothing is available
    /// right now (not an error).
    fn pull(&mut self, port: usize, ports: &Ports) -> Option<Packet> {
        let _ = port;
        let packet = ports.input(0).pull()?;
        self.simple_action(packet)
    }

    /// Convenience transform for 1-input/1-output agnostic elements.
    /// Return `None` to drop the packet (after killing it).
    fn simple_action(&mut self, packet: Packet) -> Option<Packet> {
        Some(packet)
    }

    /// Scheduler entry point for task-driven elements. Returns whether
    /// useful work was done; reschedule explicitly to keep running.
    fn run_task(&mut self, _task: &Task, _ports: &Ports) -> bool {
        false
    }

    /// Provide an activity signal for the given port, registering `listener`
    /// for wakeups. `None` means "not a provider" and the search traverses
    /// through this element.
    fn notifier_signal(
        &mut self,
        _kind: NotifierKind,
        _port: usize,
        _listener: Option<&Task>,
    ) -> Option<NotifierSignal> {
        None
    }

    /// Register read/write handlers for the introspection registry.
    fn add_handlers(&self, _reg: &mut crate::handler::HandlerBuilder) {}

    /// Capability downcast support.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct ElementCell {
    name: String,
    inner: Mutex<Box<dyn Element>>,
    ports: ArcSwap<Ports>,
}

/// Shared handle to one element instance in a router.
///
/// The per-element mutex serializes the element's execution; a push or pull
/// chain locks each element it passes through for the duration of that
/// element's work. A data path that re-enters an element already on the
/// current call chain is a configuration error (it would deadlock) and is
/// not supported.
#[derive(Clone)]
pub struct ElementHandle {
    cell: Arc<ElementCell>,
}

impl ElementHandle {
    pub(crate) fn new(name: String, element: Box<dyn Element>) -> ElementHandle {
        ElementHandle {
            cell: Arc::new(ElementCell {
                name,
                inner: Mutex::new(element),
                ports: ArcSwap::from_pointee(Ports::empty()),
            }),
        }
    }

    /// The element's instance name in the router.
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Deliver a packet to one of this element's push inputs.
    pub fn push(&self, port: usize, packet: Packet) {
        let ports = self.cell.ports.load_full();
        let mut el = self.cell.inner.lock();
        el.push(port, packet, &ports);
    }

    /// Request a packet from one of this element's pull outputs.
    pub fn pull(&self, port: usize) -> Option<Packet> {
        let ports = self.cell.ports.load_full();
        let mut el = self.cell.inner.lock();
        el.pull(port, &ports)
    }

    /// Run a closure with exclusive access to the element.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Element) -> R) -> R {
        let mut el = self.cell.inner.lock();
        f(&mut **el)
    }

    /// Create a task whose hook runs this element's
    /// [`run_task`](Element::run_task).
    pub fn task(&self) -> Task {
        let handle = self.clone();
        Task::new(move |task| {
            let ports = handle.cell.ports.load_full();
            let mut el = handle.cell.inner.lock();
            el.run_task(task, &ports)
        })
    }

    pub(crate) fn install_ports(&self, ports: Ports) {
        self.cell.ports.store(Arc::new(ports));
    }

    /// Drop the wiring. Ports hold handles to peer elements, so this is what
    /// breaks the reference cycles at teardown.
    pub(crate) fn detach(&self) {
        self.cell.ports.store(Arc::new(Ports::empty()));
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Element for Nop {
        fn class_name(&self) -> &'static str {
            "Nop"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_defaults() {
        let nop = Nop;
        assert_eq!(nop.port_count(), "1/1");
        assert_eq!(nop.processing(), AGNOSTIC);
        assert_eq!(nop.configure_phase(), CONFIGURE_PHASE_DEFAULT);
        assert!(!nop.can_live_reconfigure());
    }

    #[test]
    fn test_handle_with_and_downcast() {
        let handle = ElementHandle::new("n0".into(), Box::new(Nop));
        assert_eq!(handle.name(), "n0");
        let is_nop = handle.with(|el| el.as_any().downcast_ref::<Nop>().is_some());
        assert!(is_nop);
    }

    #[test]
    fn test_default_simple_action_passthrough() {
        let mut nop = Nop;
        let p = Packet::make(8).unwrap();
        let out = nop.simple_action(p).unwrap();
        assert_eq!(out.len(), 8);
    }
}
