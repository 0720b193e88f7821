//! The standard element catalog for pktgraph.
//!
//! Everything here is built on the public framework contract only; an
//! out-of-tree element has exactly the same powers. [`default_registry`]
//! returns a registry with every class in this crate, ready for
//! `RouterBuilder::new`.

use pktgraph::ElementRegistry;

mod counter;
mod discard;
mod queue;
mod source;
mod strip;
mod tee;
mod unqueue;

pub use counter::Counter;
pub use discard::Discard;
pub use queue::Queue;
pub use source::InfiniteSource;
pub use strip::{Strip, Unstrip};
pub use tee::Tee;
pub use unqueue::Unqueue;

/// A registry containing every element class in this crate.
pub fn default_registry() -> ElementRegistry {
    let mut reg = ElementRegistry::new();
    reg.register("InfiniteSource", || Box::new(InfiniteSource::default()));
    reg.register("Counter", || Box::new(Counter::default()));
    reg.register("Discard", || Box::new(Discard::default()));
    reg.register("Queue", || Box::new(Queue::default()));
    reg.register("Unqueue", || Box::new(Unqueue::default()));
    reg.register("Strip", || Box::new(Strip::default()));
    reg.register("Unstrip", || Box::new(Unstrip::default()));
    reg.register("Tee", || Box::new(Tee::default()));
    reg
}
