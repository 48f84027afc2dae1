//! Injected logging for one client connection.

use std::fmt;
use std::sync::Arc;
use tracing::Span;

type StderrHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Where a connection sends its logs.
///
/// Holds the `tracing` span all of the connection's events are recorded in,
/// plus the handler for free-text lines a stdio server writes to stderr.
/// Passed in at construction; transports never log outside this span.
#[derive(Clone)]
pub struct LogSink {
    span: Span,
    stderr: StderrHandler,
}

impl LogSink {
    /// Default sink: an `mcp_client` span and stderr forwarded to `tracing`.
    pub fn for_connection(transport: &'static str, id: &str) -> Self {
        Self::new(tracing::info_span!("mcp_client", id = %id, transport))
    }

    pub fn new(span: Span) -> Self {
        Self {
            span,
            stderr: Arc::new(|server, line| {
                tracing::info!(target: "mut_discovery::stderr", server, "{line}");
            }),
        }
    }

    /// Replace the stderr line handler. It receives `(connection id, line)`.
    pub fn with_stderr_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.stderr = Arc::new(handler);
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn stderr_line(&self, server: &str, line: &str) {
        let _entered = self.span.enter();
        (self.stderr)(server, line);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").field("span", &self.span).finish()
    }
}
