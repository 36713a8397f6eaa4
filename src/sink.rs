//! Diagnostic sink support
//!
//! Allocators optionally report their activity to a caller-provided
//! [`DiagnosticSink`]. The sink is held weakly: the allocator never keeps it
//! alive, and a missing or dropped sink only removes the side effect.
//! Every report is also forwarded to the `log` facade when the `log`
//! feature is enabled.

use alloc::string::ToString;
use alloc::sync::{Arc, Weak};
use core::fmt;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

#[cfg(feature = "log")]
impl From<Severity> for log::Level {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Information => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        }
    }
}

/// Receiver of allocator diagnostics.
///
/// Allocators call the sink with their lock released, so a sink may query
/// the allocator it is attached to.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Weak handle to an optional sink, plus `log` forwarding.
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    sink: Option<Weak<dyn DiagnosticSink>>,
}

impl Reporter {
    pub fn new(sink: Option<&Arc<dyn DiagnosticSink>>) -> Self {
        Self {
            sink: sink.map(Arc::downgrade),
        }
    }

    pub fn emit(&self, severity: Severity, args: fmt::Arguments<'_>) {
        #[cfg(feature = "log")]
        log::log!(log::Level::from(severity), "{}", args);

        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.log(severity, &args.to_string());
        }
    }
}

/// Report a formatted message through a [`Reporter`].
macro_rules! report {
    ($reporter:expr, $severity:expr, $($arg:tt)+) => {
        $reporter.emit($severity, format_args!($($arg)+))
    };
}
