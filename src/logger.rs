//! Injected logging capability

/// Logging capability injected into a [`Transaction`](crate::Transaction).
///
/// The transaction prefixes every message with its id before handing it to
/// the sink, so implementations only need to route the text somewhere.
pub trait TransactionLogger: Send + Sync + 'static {
    /// Record a normal progress message
    fn log(&self, message: &str);
    /// Record a failure message
    fn error(&self, message: &str);
}

/// Default sink: stdout for progress, stderr for failures.
pub struct ConsoleLogger;

impl TransactionLogger for ConsoleLogger {
    fn log(&self, message: &str) {
        println!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Structured sink backed by `tracing`.
pub struct TracingLogger;

impl TransactionLogger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "transact", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "transact", "{message}");
    }
}

/// Silent sink, useful in tests.
pub struct NoopLogger;

impl TransactionLogger for NoopLogger {
    fn log(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
