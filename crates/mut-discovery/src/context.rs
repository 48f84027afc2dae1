//! Per-call deadline and cancellation.

use mut_types::McpError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation for one or more client calls.
///
/// Every blocking operation races its I/O future against this context. When
/// the deadline passes or the token is cancelled, the I/O future is dropped,
/// which aborts the HTTP request or the pending pipe read.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no deadline beyond the client's own timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Attach a caller-owned cancellation token (e.g. cancelled on shutdown).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut`, bounded by this context and by the client's `limit`.
    ///
    /// The tighter of the two bounds wins and is reported in the timeout
    /// error.
    pub(crate) async fn run<T, F>(
        &self,
        server: &str,
        method: &str,
        limit: Duration,
        fut: F,
    ) -> Result<T, McpError>
    where
        F: Future<Output = Result<T, McpError>>,
    {
        let budget = match self.remaining() {
            Some(remaining) => remaining.min(limit),
            None => limit,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(McpError::Cancelled {
                server: server.to_string(),
                method: method.to_string(),
            }),
            res = tokio::time::timeout(budget, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(McpError::Timeout {
                    server: server.to_string(),
                    method: method.to_string(),
                    timeout_ms: budget.as_millis() as u64,
                }),
            },
        }
    }
}
