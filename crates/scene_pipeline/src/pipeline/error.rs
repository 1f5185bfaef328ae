//! Pipeline error types and error reporting

use std::sync::Arc;

use parking_lot::Mutex;

/// Pipeline configuration errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Stages cannot be replaced while a frame loop is running
    #[error("Cannot replace the {0} while the pipeline is running")]
    WiringWhileRunning(&'static str),

    /// The pipeline has been halted and cannot be restarted
    #[error("Pipeline has been halted")]
    Halted,

    /// A required stage was never wired
    #[error("Pipeline has no {0}")]
    MissingStage(&'static str),
}

/// Output device errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The native context could not be created
    #[error("Graphics context creation failed: {0}")]
    ContextCreation(String),

    /// The native context was destroyed underneath the device
    #[error("Graphics context lost")]
    ContextLost,

    /// The device was disposed
    #[error("Output device has been disposed")]
    Disposed,

    /// A STOP op had no matching transform push
    #[error("Transform stack underflow")]
    TransformStackUnderflow,
}

/// Result type for pipeline configuration
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Severity of a reported problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational
    Message,
    /// Recovered problem
    Warning,
    /// Failed operation, pipeline keeps running
    Error,
    /// The pipeline cannot continue
    Fatal,
}

/// Sink for problems found while rendering
///
/// Frame-time failures are reported here instead of being returned, so the
/// host decides how to present them. Messages name the stage or node
/// involved.
pub trait ErrorReporter: Send + Sync {
    /// Report at the given severity
    fn report(&self, severity: Severity, message: &str);

    /// Informational message
    fn message(&self, message: &str) {
        self.report(Severity::Message, message);
    }

    /// Recovered problem
    fn warning(&self, message: &str) {
        self.report(Severity::Warning, message);
    }

    /// Failed operation
    fn error(&self, message: &str) {
        self.report(Severity::Error, message);
    }

    /// Unrecoverable problem
    fn fatal_error(&self, message: &str) {
        self.report(Severity::Fatal, message);
    }
}

/// Reporter forwarding to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Message => log::info!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Error => log::error!("{}", message),
            Severity::Fatal => log::error!("FATAL: {}", message),
        }
    }
}

/// Reporter that keeps every report in memory
///
/// Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct CollectingErrorReporter {
    reports: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl CollectingErrorReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far
    pub fn reports(&self) -> Vec<(Severity, String)> {
        self.reports.lock().clone()
    }

    /// Number of reports at the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.reports.lock().iter().filter(|(s, _)| *s == severity).count()
    }
}

impl ErrorReporter for CollectingErrorReporter {
    fn report(&self, severity: Severity, message: &str) {
        self.reports.lock().push((severity, message.to_string()));
    }
}
