//! Read/write handler registration.
//!
//! Elements expose string-valued get/set operations ("handlers") that
//! external control tools reach through the router. The core only defines
//! the registration contract; how the strings travel to an operator is out
//! of scope.

use crate::element::Element;
use crate::error::ErrorSink;

/// A named string-valued getter on an element.
pub type ReadHandler = Box<dyn Fn(&dyn Element) -> String + Send + Sync>;

/// A named string-valued setter on an element.
pub type WriteHandler = Box<dyn Fn(&mut dyn Element, &str, &mut ErrorSink) -> Result<(), ()> + Send + Sync>;

/// Collects one element's handler registrations during router setup.
///
/// Handlers receive the element as `dyn Element` and typically downcast via
/// `as_any` to reach their own state.
#[derive(Default)]
pub struct HandlerBuilder {
    pub(crate) read: Vec<(String, ReadHandler)>,
    pub(crate) write: Vec<(String, WriteHandler)>,
}

impl HandlerBuilder {
    /// Register a read handler under `name`.
    pub fn add_read_handler<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&dyn Element) -> String + Send + Sync + 'static,
    {
        self.read.push((name.to_string(), Box::new(f)));
    }

    /// Register a write handler under `name`.
    pub fn add_write_handler<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut dyn Element, &str, &mut ErrorSink) -> Result<(), ()> + Send + Sync + 'static,
    {
        self.write.push((name.to_string(), Box::new(f)));
    }
}
