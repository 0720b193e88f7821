//! A modular packet-processing framework.
//!
//! Packet processing is described as a directed graph of small elements
//! connected through ports. Ports resolve to one of two disciplines: on a
//! push connection the producer drives packets downstream on its own call
//! stack, on a pull connection the consumer asks upstream for the next
//! packet. Queues bridge the two worlds and publish notifier signals so pull
//! consumers sleep instead of spinning on empty queues.
//!
//! The pieces:
//!
//! - [`packet`]: reference-counted copy-on-write packet buffers with
//!   headroom, tailroom, and annotations.
//! - [`element`] and [`port`]: the element contract and the wiring.
//! - [`router`]: graph construction, discipline resolution, the element
//!   lifecycle, and the handler control surface.
//! - [`task`], [`timer`], [`sched`]: cooperative run-to-completion
//!   scheduling across one or more driver threads.
//! - [`notifier`]: lock-free activity signals between producers and
//!   consumers.
//!
//! Element implementations live in companion crates; the framework itself
//! ships none.

pub mod config;
pub mod element;
pub mod error;
pub mod handler;
pub mod notifier;
pub mod packet;
pub mod port;
pub mod router;
pub mod sched;
pub mod task;
pub mod timer;

pub use config::Config;
pub use element::{CleanupStage, Element, ElementHandle};
pub use error::{Error, ErrorSink};
pub use handler::HandlerBuilder;
pub use notifier::{ActiveNotifier, NotifierKind, NotifierSignal};
pub use packet::{Packet, WritablePacket};
pub use port::{Discipline, Ports};
pub use router::{ElementRegistry, InitContext, Router, RouterBuilder};
pub use sched::Scheduler;
pub use task::Task;
pub use timer::Timer;
