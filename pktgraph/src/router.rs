//! Router construction and the runtime control surface.
//!
//! A [`RouterBuilder`] accumulates element declarations and connections, then
//! [`build`](RouterBuilder::build) runs the whole setup pipeline: materialize
//! elements, validate the graph, resolve port disciplines to a fixed point,
//! configure in phase order, install the wiring, collect handlers, and
//! initialize. Setup is all-or-nothing: any failure unwinds with the right
//! [`CleanupStage`] per element and returns an error carrying every recorded
//! diagnostic, not just the first.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::element::{AGNOSTIC, CleanupStage, Element, ElementHandle};
use crate::error::{Error, ErrorSink};
use crate::handler::{HandlerBuilder, ReadHandler, WriteHandler};
use crate::notifier::{NotifierKind, NotifierSignal};
use crate::port::{Discipline, InputPort, Link, OutputPort, PortCount, Ports, Processing};
use crate::sched::Scheduler;
use crate::task::Task;
use crate::timer::Timer;

/// Maps element class names to constructors.
#[derive(Default)]
pub struct ElementRegistry {
    ctors: HashMap<String, Box<dyn Fn() -> Box<dyn Element> + Send + Sync>>,
}

impl ElementRegistry {
    pub fn new() -> ElementRegistry {
        ElementRegistry::default()
    }

    /// Register a constructor under `class`. A later registration replaces an
    /// earlier one.
    pub fn register<F>(&mut self, class: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Element> + Send + Sync + 'static,
    {
        self.ctors.insert(class.to_string(), Box::new(ctor));
    }

    /// Instantiate an element of the given class.
    pub fn create(&self, class: &str) -> Result<Box<dyn Element>, Error> {
        match self.ctors.get(class) {
            Some(ctor) => Ok(ctor()),
            None => Err(Error::UnknownElementClass(class.to_string())),
        }
    }
}

enum Decl {
    Class(String),
    Instance(Box<dyn Element>),
}

struct ElementDecl {
    name: String,
    decl: Decl,
    config: String,
}

/// Builds a [`Router`] from element declarations and connections.
pub struct RouterBuilder {
    registry: ElementRegistry,
    elements: Vec<ElementDecl>,
    links: Vec<(String, usize, String, usize)>,
    nthreads: usize,
    pins: Vec<(usize, usize)>,
}

impl RouterBuilder {
    pub fn new(registry: ElementRegistry) -> RouterBuilder {
        RouterBuilder {
            registry,
            elements: Vec::new(),
            links: Vec::new(),
            nthreads: 1,
            pins: Vec::new(),
        }
    }

    /// Declare an element by class name.
    pub fn element(mut self, name: &str, class: &str, config: &str) -> Self {
        self.elements.push(ElementDecl {
            name: name.to_string(),
            decl: Decl::Class(class.to_string()),
            config: config.to_string(),
        });
        self
    }

    /// Declare an element from an already-constructed instance.
    pub fn element_instance(mut self, name: &str, element: Box<dyn Element>, config: &str) -> Self {
        self.elements.push(ElementDecl {
            name: name.to_string(),
            decl: Decl::Instance(element),
            config: config.to_string(),
        });
        self
    }

    /// Connect `from`'s output port to `to`'s input port.
    pub fn connect(mut self, from: &str, from_port: usize, to: &str, to_port: usize) -> Self {
        self.links
            .push((from.to_string(), from_port, to.to_string(), to_port));
        self
    }

    /// Number of driver threads (default 1).
    pub fn threads(mut self, n: usize) -> Self {
        self.nthreads = n.max(1);
        self
    }

    /// Pin a driver thread to a CPU (Linux only; warns elsewhere).
    pub fn pin_thread(mut self, thread: usize, cpu: usize) -> Self {
        self.pins.push((thread, cpu));
        self
    }

    /// Run the full setup pipeline.
    pub fn build(self) -> Result<Router, Error> {
        let mut errh = ErrorSink::new();

        // Materialize elements and the name map.
        let mut handles: Vec<ElementHandle> = Vec::with_capacity(self.elements.len());
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut configs: Vec<String> = Vec::with_capacity(self.elements.len());
        for decl in self.elements {
            if by_name.contains_key(&decl.name) {
                errh.error(format!("duplicate element name '{}'", decl.name));
                continue;
            }
            let element = match decl.decl {
                Decl::Class(class) => self.registry.create(&class)?,
                Decl::Instance(el) => el,
            };
            by_name.insert(decl.name.clone(), handles.len());
            handles.push(ElementHandle::new(decl.name, element));
            configs.push(decl.config);
        }
        let n = handles.len();

        // Resolve links to indices and check that every used port has
        // exactly one peer.
        let mut out_peer: Vec<Vec<Option<(usize, usize)>>> = vec![Vec::new(); n];
        let mut in_peer: Vec<Vec<Option<(usize, usize)>>> = vec![Vec::new(); n];
        for (from, fp, to, tp) in &self.links {
            let (Some(&fi), Some(&ti)) = (by_name.get(from), by_name.get(to)) else {
                let missing = if by_name.contains_key(from) { to } else { from };
                errh.error(format!("link references unknown element '{missing}'"));
                continue;
            };
            if out_peer[fi].len() <= *fp {
                out_peer[fi].resize(fp + 1, None);
            }
            if in_peer[ti].len() <= *tp {
                in_peer[ti].resize(tp + 1, None);
            }
            if out_peer[fi][*fp].is_some() {
                errh.error(format!("{from}: output port {fp} connected twice"));
            }
            if in_peer[ti][*tp].is_some() {
                errh.error(format!("{to}: input port {tp} connected twice"));
            }
            out_peer[fi][*fp] = Some((ti, *tp));
            in_peer[ti][*tp] = Some((fi, *fp));
        }
        for i in 0..n {
            errh.set_context(handles[i].name().to_string());
            for (p, peer) in in_peer[i].iter().enumerate() {
                if peer.is_none() {
                    errh.error(format!("input port {p} unconnected"));
                }
            }
            for (p, peer) in out_peer[i].iter().enumerate() {
                if peer.is_none() {
                    errh.error(format!("output port {p} unconnected"));
                }
            }
            let declared = handles[i].with(|el| el.port_count());
            match PortCount::parse(declared) {
                Ok(pc) => {
                    if let Err(msg) = pc.check(in_peer[i].len(), out_peer[i].len()) {
                        errh.error(msg);
                    }
                }
                Err(msg) => errh.error(msg),
            }
        }
        errh.clear_context();
        if errh.nerrors() > 0 {
            return Err(Error::Config(errh.report()));
        }

        let topo = resolve_flow(&handles, in_peer, out_peer, &mut errh);
        if errh.nerrors() > 0 {
            return Err(Error::Config(errh.report()));
        }

        // Configure in phase order; keep going after failures so one attempt
        // reports everything.
        let phases: Vec<i32> = handles
            .iter()
            .map(|h| h.with(|el| el.configure_phase()))
            .collect();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (phases[i], i));
        let mut configured_ok = vec![false; n];
        for &i in &order {
            errh.set_context(handles[i].name().to_string());
            let before = errh.nerrors();
            let cfg = Config::parse(&configs[i]);
            let result = handles[i].with(|el| el.configure(&cfg, &mut errh));
            if result.is_err() && errh.nerrors() == before {
                errh.error("configure failed");
            }
            configured_ok[i] = result.is_ok();
        }
        errh.clear_context();
        if errh.nerrors() > 0 {
            for &i in &order {
                let stage = if configured_ok[i] {
                    CleanupStage::Configured
                } else {
                    CleanupStage::ConfigureFailed
                };
                handles[i].with(|el| el.cleanup(stage));
            }
            return Err(Error::Config(errh.report()));
        }

        // Wire the data path. Ports hold peer handles, so from here on the
        // graph must be detached before it can be dropped.
        for i in 0..n {
            let inputs = (0..topo.in_peer[i].len())
                .map(|p| {
                    let link = topo.in_peer[i][p].map(|(pe, pp)| Link {
                        peer: handles[pe].clone(),
                        port: pp,
                    });
                    InputPort::new(link, topo.in_disc[i][p])
                })
                .collect();
            let outputs = (0..topo.out_peer[i].len())
                .map(|p| {
                    let link = topo.out_peer[i][p].map(|(pe, pp)| Link {
                        peer: handles[pe].clone(),
                        port: pp,
                    });
                    OutputPort::new(link, topo.out_disc[i][p])
                })
                .collect();
            handles[i].install_ports(Ports::new(inputs, outputs));
        }

        let mut read_handlers: HashMap<(usize, String), ReadHandler> = HashMap::new();
        let mut write_handlers: HashMap<(usize, String), WriteHandler> = HashMap::new();
        for (i, handle) in handles.iter().enumerate() {
            let mut reg = HandlerBuilder::default();
            handle.with(|el| el.add_handlers(&mut reg));
            for (name, f) in reg.read {
                read_handlers.insert((i, name), f);
            }
            for (name, f) in reg.write {
                write_handlers.insert((i, name), f);
            }
        }

        let sched = Scheduler::new(self.nthreads, self.pins);

        // Initialize in declaration order, stopping at the first failure.
        let mut initialized: Vec<usize> = Vec::new();
        let mut init_failed: Option<usize> = None;
        for i in 0..n {
            errh.set_context(handles[i].name().to_string());
            let before = errh.nerrors();
            let mut ctx = InitContext {
                index: i,
                handles: &handles,
                topo: &topo,
                sched: &sched,
                errh: &mut errh,
            };
            let result = handles[i].with(|el| el.initialize(&mut ctx));
            if result.is_err() {
                if errh.nerrors() == before {
                    errh.error("initialize failed");
                }
                init_failed = Some(i);
                break;
            }
            initialized.push(i);
        }
        errh.clear_context();
        if let Some(failed) = init_failed {
            handles[failed].with(|el| el.cleanup(CleanupStage::InitializeFailed));
            for &i in initialized.iter().rev() {
                handles[i].with(|el| el.cleanup(CleanupStage::Initialized));
            }
            for i in (failed + 1)..n {
                handles[i].with(|el| el.cleanup(CleanupStage::Configured));
            }
            for handle in &handles {
                handle.detach();
            }
            return Err(Error::Initialize(errh.report()));
        }

        info!(elements = n, threads = sched.nthreads(), "router built");
        Ok(Router {
            handles,
            by_name,
            read_handlers,
            write_handlers,
            sched,
        })
    }
}

struct Topology {
    in_peer: Vec<Vec<Option<(usize, usize)>>>,
    out_peer: Vec<Vec<Option<(usize, usize)>>>,
    in_disc: Vec<Vec<Discipline>>,
    out_disc: Vec<Vec<Discipline>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    In,
    Out,
}

fn assign(
    slot: &mut Discipline,
    d: Discipline,
    elem: &str,
    side: Side,
    port: usize,
    errh: &mut ErrorSink,
) -> bool {
    match *slot {
        Discipline::Agnostic => {
            *slot = d;
            true
        }
        cur if cur == d => false,
        _ => {
            let what = match side {
                Side::In => "input",
                Side::Out => "output",
            };
            errh.error(format!("{elem}: {what} port {port} required to be both push and pull"));
            false
        }
    }
}

/// Propagate port disciplines to a fixed point.
///
/// A connected pair must agree, and all agnostic ports of one element resolve
/// to a single discipline as a group. A conflict or a port left agnostic at
/// the fixed point is a configuration error.
fn resolve_flow(
    handles: &[ElementHandle],
    in_peer: Vec<Vec<Option<(usize, usize)>>>,
    out_peer: Vec<Vec<Option<(usize, usize)>>>,
    errh: &mut ErrorSink,
) -> Topology {
    let n = handles.len();
    let fallback = Processing::parse(AGNOSTIC).expect("constant parses");
    let decls: Vec<Processing> = (0..n)
        .map(|i| {
            let code = handles[i].with(|el| el.processing());
            match Processing::parse(code) {
                Ok(p) => p,
                Err(msg) => {
                    errh.error(format!("{}: {msg}", handles[i].name()));
                    fallback.clone()
                }
            }
        })
        .collect();

    let mut in_disc: Vec<Vec<Discipline>> = (0..n)
        .map(|i| (0..in_peer[i].len()).map(|p| decls[i].input(p)).collect())
        .collect();
    let mut out_disc: Vec<Vec<Discipline>> = (0..n)
        .map(|i| (0..out_peer[i].len()).map(|p| decls[i].output(p)).collect())
        .collect();

    let mut work: Vec<(usize, Side, usize)> = Vec::new();
    for e in 0..n {
        for p in 0..in_disc[e].len() {
            if in_disc[e][p] != Discipline::Agnostic {
                work.push((e, Side::In, p));
            }
        }
        for p in 0..out_disc[e].len() {
            if out_disc[e][p] != Discipline::Agnostic {
                work.push((e, Side::Out, p));
            }
        }
    }

    while let Some((e, side, p)) = work.pop() {
        let d = match side {
            Side::In => in_disc[e][p],
            Side::Out => out_disc[e][p],
        };
        // A connected pair shares one discipline.
        let peer = match side {
            Side::In => in_peer[e][p],
            Side::Out => out_peer[e][p],
        };
        if let Some((pe, pp)) = peer {
            let (slot, peer_side) = match side {
                Side::In => (&mut out_disc[pe][pp], Side::Out),
                Side::Out => (&mut in_disc[pe][pp], Side::In),
            };
            if assign(slot, d, handles[pe].name(), peer_side, pp, errh) {
                work.push((pe, peer_side, pp));
            }
        }
        // If this port was declared agnostic, the whole agnostic group of the
        // element follows it.
        let declared = match side {
            Side::In => decls[e].input(p),
            Side::Out => decls[e].output(p),
        };
        if declared == Discipline::Agnostic {
            for q in 0..in_disc[e].len() {
                if decls[e].input(q) == Discipline::Agnostic
                    && assign(&mut in_disc[e][q], d, handles[e].name(), Side::In, q, errh)
                {
                    work.push((e, Side::In, q));
                }
            }
            for q in 0..out_disc[e].len() {
                if decls[e].output(q) == Discipline::Agnostic
                    && assign(&mut out_disc[e][q], d, handles[e].name(), Side::Out, q, errh)
                {
                    work.push((e, Side::Out, q));
                }
            }
        }
    }

    for e in 0..n {
        let unresolved = in_disc[e]
            .iter()
            .chain(out_disc[e].iter())
            .any(|d| *d == Discipline::Agnostic);
        if unresolved {
            errh.error(format!(
                "{}: agnostic ports cannot be resolved; no push or pull context reaches them",
                handles[e].name()
            ));
        }
    }

    Topology {
        in_peer,
        out_peer,
        in_disc,
        out_disc,
    }
}

/// Walk the graph from a port toward providers of an activity signal.
///
/// Elements answering [`Element::notifier_signal`] terminate a branch with
/// their signal; non-providers are traversed through to their far side. A
/// branch ending at a dead end (unconnected port, source or sink with no
/// further side) contributes the busy signal since nothing there will ever
/// wake a listener.
fn signal_search(
    handles: &[ElementHandle],
    topo: &Topology,
    kind: NotifierKind,
    start: usize,
    port: usize,
    listener: Option<&Task>,
) -> NotifierSignal {
    let mut signal = NotifierSignal::idle();
    let mut visited = vec![false; handles.len()];
    visited[start] = true;
    let mut frontier: Vec<(usize, usize)> = vec![(start, port)];
    while let Some((elem, p)) = frontier.pop() {
        let peer = match kind {
            NotifierKind::Empty => topo.in_peer[elem].get(p).copied().flatten(),
            NotifierKind::Full => topo.out_peer[elem].get(p).copied().flatten(),
        };
        let Some((pe, pp)) = peer else {
            return NotifierSignal::busy();
        };
        if visited[pe] {
            continue;
        }
        visited[pe] = true;
        let provided = handles[pe].with(|el| el.notifier_signal(kind, pp, listener));
        match provided {
            Some(sig) => signal = signal | sig,
            None => {
                let nfurther = match kind {
                    NotifierKind::Empty => topo.in_peer[pe].len(),
                    NotifierKind::Full => topo.out_peer[pe].len(),
                };
                if nfurther == 0 {
                    return NotifierSignal::busy();
                }
                for q in 0..nfurther {
                    frontier.push((pe, q));
                }
            }
        }
    }
    signal
}

/// Per-element view of the router during initialization.
pub struct InitContext<'a> {
    index: usize,
    handles: &'a [ElementHandle],
    topo: &'a Topology,
    sched: &'a Arc<Scheduler>,
    errh: &'a mut ErrorSink,
}

impl InitContext<'_> {
    /// The diagnostic sink; record problems here before returning `Err`.
    pub fn errors(&mut self) -> &mut ErrorSink {
        self.errh
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.sched
    }

    pub fn nthreads(&self) -> usize {
        self.sched.nthreads()
    }

    /// Create and bind a task that runs this element's
    /// [`run_task`](Element::run_task) on `thread` (clamped to range).
    /// The element keeps the returned handle and drops it in `cleanup`.
    pub fn register_task(&self, thread: usize) -> Task {
        let task = self.handles[self.index].task();
        task.initialize(self.sched, thread.min(self.sched.nthreads() - 1));
        task
    }

    /// Bind a timer to the scheduler, checked on `thread`.
    pub fn register_timer(&self, timer: &Timer, thread: usize) {
        timer.initialize(self.sched, thread.min(self.sched.nthreads() - 1));
    }

    /// Number of connected inputs.
    pub fn ninputs(&self) -> usize {
        self.topo.in_peer[self.index].len()
    }

    /// Number of connected outputs.
    pub fn noutputs(&self) -> usize {
        self.topo.out_peer[self.index].len()
    }

    /// Resolved discipline of an input port.
    pub fn input_discipline(&self, port: usize) -> Discipline {
        self.topo.in_disc[self.index][port]
    }

    /// Resolved discipline of an output port.
    pub fn output_discipline(&self, port: usize) -> Discipline {
        self.topo.out_disc[self.index][port]
    }

    /// Search upstream of an input port for a "packets may be available"
    /// signal, registering `listener` with every provider found.
    pub fn upstream_empty_signal(&self, port: usize, listener: Option<&Task>) -> NotifierSignal {
        signal_search(
            self.handles,
            self.topo,
            NotifierKind::Empty,
            self.index,
            port,
            listener,
        )
    }

    /// Search downstream of an output port for a "space may be available"
    /// signal, registering `listener` with every provider found.
    pub fn downstream_full_signal(&self, port: usize, listener: Option<&Task>) -> NotifierSignal {
        signal_search(
            self.handles,
            self.topo,
            NotifierKind::Full,
            self.index,
            port,
            listener,
        )
    }
}

/// A built, initialized element graph bound to a scheduler.
pub struct Router {
    handles: Vec<ElementHandle>,
    by_name: HashMap<String, usize>,
    read_handlers: HashMap<(usize, String), ReadHandler>,
    write_handlers: HashMap<(usize, String), WriteHandler>,
    sched: Arc<Scheduler>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("nelements", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Run driver loops on all threads until [`stop`](Router::stop).
    pub fn run(&self) {
        self.sched.run();
    }

    /// Drive all queues on the calling thread until the router quiesces.
    pub fn run_until_idle(&self) {
        self.sched.run_until_idle();
    }

    /// One driver iteration on `thread`.
    pub fn step(&self, thread: usize) -> bool {
        self.sched.step(thread)
    }

    /// Ask the driver loops to exit.
    pub fn stop(&self) {
        self.sched.stop();
    }

    /// Number of elements in the graph.
    pub fn nelements(&self) -> usize {
        self.handles.len()
    }

    /// Look up an element by instance name.
    pub fn element(&self, name: &str) -> Option<&ElementHandle> {
        self.by_name.get(name).map(|&i| &self.handles[i])
    }

    fn resolve_handler<'a>(&self, path: &'a str) -> Result<(usize, &'a str), Error> {
        let (elem, handler) = path
            .rsplit_once('.')
            .ok_or_else(|| Error::UnknownHandler(path.to_string()))?;
        let index = *self
            .by_name
            .get(elem)
            .ok_or_else(|| Error::UnknownElement(elem.to_string()))?;
        Ok((index, handler))
    }

    /// Invoke a read handler, addressed as `"element.handler"`.
    pub fn handler_read(&self, path: &str) -> Result<String, Error> {
        let (index, handler) = self.resolve_handler(path)?;
        let f = self
            .read_handlers
            .get(&(index, handler.to_string()))
            .ok_or_else(|| Error::UnknownHandler(path.to_string()))?;
        Ok(self.handles[index].with(|el| f(el)))
    }

    /// Invoke a write handler, addressed as `"element.handler"`.
    pub fn handler_write(&self, path: &str, value: &str) -> Result<(), Error> {
        let (index, handler) = self.resolve_handler(path)?;
        let f = self
            .write_handlers
            .get(&(index, handler.to_string()))
            .ok_or_else(|| Error::UnknownHandler(path.to_string()))?;
        let mut errh = ErrorSink::new();
        errh.set_context(path.to_string());
        match self.handles[index].with(|el| f(el, value, &mut errh)) {
            Ok(()) => Ok(()),
            Err(()) => {
                if errh.nerrors() == 0 {
                    errh.error("write handler failed");
                }
                Err(Error::Config(errh.report()))
            }
        }
    }

    /// Re-run an element's `configure` with a new argument string while the
    /// router keeps running. Only elements opting in via
    /// [`can_live_reconfigure`](Element::can_live_reconfigure) accept this.
    pub fn live_reconfigure(&self, name: &str, config: &str) -> Result<(), Error> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::UnknownElement(name.to_string()))?;
        let handle = &self.handles[index];
        if !handle.with(|el| el.can_live_reconfigure()) {
            return Err(Error::NotReconfigurable(name.to_string()));
        }
        let cfg = Config::parse(config);
        let mut errh = ErrorSink::new();
        errh.set_context(name.to_string());
        let result = handle.with(|el| el.configure(&cfg, &mut errh));
        if result.is_err() && errh.nerrors() == 0 {
            errh.error("configure failed");
        }
        match errh.result() {
            Ok(()) if result.is_ok() => {
                debug!(element = name, "live reconfigured");
                Ok(())
            }
            Ok(()) => Err(Error::Config(errh.report())),
            Err(report) => Err(Error::Config(report)),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.sched.stop();
        for handle in self.handles.iter().rev() {
            handle.with(|el| el.cleanup(CleanupStage::Initialized));
        }
        // Ports hold peer handles; detaching breaks the reference cycles.
        for handle in &self.handles {
            handle.detach();
        }
        debug!("router torn down");
    }
}
