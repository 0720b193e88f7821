use std::fmt;

/// Error type for pktgraph control-plane operations.
///
/// Hot-path failures (packet allocation, empty pulls) are `Option`-shaped and
/// never reach this type; see the packet module.
#[derive(Debug)]
pub enum Error {
    /// The graph description was invalid. Carries the full accumulated
    /// diagnostic report.
    Config(String),
    /// An element failed to acquire runtime resources.
    Initialize(String),
    /// No constructor registered for an element class name.
    UnknownElementClass(String),
    /// No element with this name in the router.
    UnknownElement(String),
    /// No handler with this name on the element.
    UnknownHandler(String),
    /// The element does not accept configuration changes at runtime.
    NotReconfigurable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(report) => write!(f, "configuration failed:\n{report}"),
            Error::Initialize(report) => write!(f, "initialization failed:\n{report}"),
            Error::UnknownElementClass(class) => write!(f, "unknown element class '{class}'"),
            Error::UnknownElement(name) => write!(f, "no element named '{name}'"),
            Error::UnknownHandler(name) => write!(f, "no handler named '{name}'"),
            Error::NotReconfigurable(name) => {
                write!(f, "element '{name}' does not support live reconfiguration")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Accumulating diagnostic sink.
///
/// Configuration and initialization run to completion even after the first
/// failure so that one build attempt reports every problem. Each message is
/// prefixed with the current context (usually the element name) and mirrored
/// to `tracing`.
#[derive(Default)]
pub struct ErrorSink {
    context: Option<String>,
    errors: Vec<String>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context prefix for subsequent messages.
    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = Some(context.into());
    }

    /// Clear the context prefix.
    pub fn clear_context(&mut self) {
        self.context = None;
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        let full = match &self.context {
            Some(ctx) => format!("{ctx}: {message}"),
            None => message,
        };
        tracing::error!(error = %full, "config error");
        self.errors.push(full);
    }

    /// Emit a warning. Warnings are logged but do not fail the build.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        match &self.context {
            Some(ctx) => tracing::warn!(context = %ctx, "{message}"),
            None => tracing::warn!("{message}"),
        }
    }

    /// Number of errors recorded so far.
    pub fn nerrors(&self) -> usize {
        self.errors.len()
    }

    /// The joined diagnostic report.
    pub fn report(&self) -> String {
        self.errors.join("\n")
    }

    /// `Ok` if no errors were recorded, otherwise the joined report.
    pub fn result(&self) -> Result<(), String> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.report())
        }
    }
}
