//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and exchanges newline-delimited JSON-RPC messages
//! over its stdin/stdout. Stderr is drained into the connection's
//! [`LogSink`]. One call may be in flight at a time; a concurrent call fails
//! with [`McpError::Busy`].

use crate::client::Connection;
use crate::config::StdioClientConfig;
use crate::context::CallContext;
use crate::sink::LogSink;
use crate::transport::{BoxFuture, RequestIds, Transport};
use mut_types::{JsonRpcRequest, JsonRpcResponse, McpError};
use std::process::Stdio;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

struct StdioIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Async stdio transport for one MCP server process.
pub struct StdioTransport {
    id: String,
    command: String,
    timeout: Duration,
    ids: RequestIds,
    sink: LogSink,
    io: Mutex<Option<StdioIo>>,
    child: Mutex<Child>,
    stderr_task: StdMutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the configured server with the default log sink.
    pub fn spawn(config: &StdioClientConfig) -> Result<Self, McpError> {
        let id = config.options.connection_id("stdio");
        let sink = LogSink::for_connection("stdio", &id);
        Self::start(config, id, sink)
    }

    /// Spawn the configured server, logging into `sink`.
    pub fn spawn_with_sink(config: &StdioClientConfig, sink: LogSink) -> Result<Self, McpError> {
        Self::start(config, config.options.connection_id("stdio"), sink)
    }

    fn start(config: &StdioClientConfig, id: String, sink: LogSink) -> Result<Self, McpError> {
        config.validate()?;

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.command.clone(),
            source: e,
        })?;

        let pipe_error = |pipe| McpError::PipeUnavailable {
            name: config.command.clone(),
            pipe,
        };
        let stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;

        let stderr_sink = sink.clone();
        let stderr_id = id.clone();
        let stderr_task = tokio::spawn(
            async move {
                // Lossy decode: a line that is not UTF-8 must not stop the drain.
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            stderr_sink
                                .stderr_line(&stderr_id, line.trim_end_matches(['\n', '\r']));
                        }
                        Err(e) => {
                            tracing::debug!("Stopped reading MCP server stderr: {e}");
                            break;
                        }
                    }
                }
            }
            .instrument(sink.span().clone()),
        );

        sink.span().in_scope(|| {
            tracing::info!(
                pid = child.id(),
                "Started MCP server process: {} {}",
                config.command,
                config.args.join(" ")
            );
        });

        Ok(Self {
            id,
            command: config.command.clone(),
            timeout: config.options.timeout(),
            ids: RequestIds::new(),
            sink,
            io: Mutex::new(Some(StdioIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            })),
            child: Mutex::new(child),
            stderr_task: StdMutex::new(Some(stderr_task)),
        })
    }

    /// Command the server was started with.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn busy(&self) -> McpError {
        McpError::Busy {
            server: self.id.clone(),
        }
    }

    fn closed(&self) -> McpError {
        McpError::ConnectionClosed {
            server: self.id.clone(),
        }
    }

    fn pipe_failure(&self, what: &str, e: std::io::Error) -> McpError {
        McpError::Transport {
            server: self.id.clone(),
            message: format!("{what}: {e}"),
        }
    }

    async fn write_line(&self, io: &mut StdioIo, line: &str) -> Result<(), McpError> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');
        io.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| self.pipe_failure("write to stdin failed", e))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| self.pipe_failure("flush of stdin failed", e))
    }

    /// Read stdout until the response to `id` arrives.
    ///
    /// Server notifications and late answers to abandoned calls (ids below
    /// `id`) are skipped.
    async fn read_response(
        &self,
        io: &mut StdioIo,
        method: &str,
        id: u64,
    ) -> Result<serde_json::Value, McpError> {
        loop {
            let line = io
                .stdout
                .next_line()
                .await
                .map_err(|e| self.pipe_failure("read from stdout failed", e))?
                .ok_or_else(|| self.closed())?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_str(line).map_err(|source| McpError::Decode {
                    context: format!("{method} response"),
                    source,
                })?;

            match response.id {
                None => {
                    tracing::debug!("Ignoring server message without id: {line}");
                    continue;
                }
                Some(stale) if stale < id => {
                    tracing::warn!(
                        "Discarding response {stale} to an abandoned call (waiting for {id})"
                    );
                    continue;
                }
                Some(_) => {}
            }

            tracing::debug!(id, method, "Received MCP response");
            return response.into_result(&self.id, method, id);
        }
    }
}

impl Transport for StdioTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }

    fn request<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<serde_json::Value, McpError>> {
        let span = self.sink.span().clone();
        Box::pin(
            async move {
                let mut guard = self.io.try_lock().map_err(|_| self.busy())?;
                let io = guard.as_mut().ok_or_else(|| self.closed())?;

                let id = self.ids.next_id();
                let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
                tracing::debug!(id, method, "Sending MCP request");

                ctx.run(&self.id, method, self.timeout, async {
                    self.write_line(io, &line).await?;
                    self.read_response(io, method, id).await
                })
                .await
            }
            .instrument(span),
        )
    }

    fn notify<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        let span = self.sink.span().clone();
        Box::pin(
            async move {
                let mut guard = self.io.try_lock().map_err(|_| self.busy())?;
                let io = guard.as_mut().ok_or_else(|| self.closed())?;

                let line = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
                tracing::debug!(method, "Sending MCP notification");

                ctx.run(&self.id, method, self.timeout, self.write_line(io, &line))
                    .await
            }
            .instrument(span),
        )
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        let span = self.sink.span().clone();
        Box::pin(
            async move {
                // Dropping stdin signals EOF. A call still in flight keeps
                // its pipes and sees the process exit instead.
                if let Ok(mut io) = self.io.try_lock() {
                    io.take();
                }

                let mut child = self.child.lock().await;
                if let Err(e) = child.start_kill() {
                    tracing::debug!("MCP server process already gone: {e}");
                }
                match child.wait().await {
                    Ok(status) => tracing::info!("MCP server process exited: {status}"),
                    Err(e) => tracing::warn!("Failed to wait for MCP server process: {e}"),
                }

                let task = self
                    .stderr_task
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(task) = task {
                    task.abort();
                }
            }
            .instrument(span),
        )
    }
}

/// MCP client over a child process.
pub type StdioClient = Connection<StdioTransport>;

impl Connection<StdioTransport> {
    /// Spawn the configured server and wrap it in an uninitialized client.
    pub fn stdio(config: &StdioClientConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(config)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }

    /// Like [`Connection::stdio`], logging into `sink`.
    pub fn stdio_with_sink(config: &StdioClientConfig, sink: LogSink) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn_with_sink(config, sink)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(command: &str, args: &[&str], timeout_ms: u64) -> StdioClientConfig {
        let mut config = StdioClientConfig::new(command);
        config.args = args.iter().map(|a| a.to_string()).collect();
        config.options.id = Some("stdio:test".into());
        config.options.timeout_ms = timeout_ms;
        config
    }

    /// Bash server that answers every request through `reply`, a shell
    /// snippet that may use `$id`.
    fn scripted(reply: &str, timeout_ms: u64) -> StdioTransport {
        let script = format!(
            r#"while IFS= read -r line; do if [[ $line =~ \"id\":([0-9]+) ]]; then id=${{BASH_REMATCH[1]}}; {reply}; fi; done"#
        );
        StdioTransport::spawn(&config("bash", &["-c", &script], timeout_ms)).unwrap()
    }

    #[tokio::test]
    async fn spawn_echo_process() {
        let transport = StdioTransport::spawn(&config("cat", &[], 5000)).unwrap();
        assert_eq!(transport.id(), "stdio:test");
        assert_eq!(transport.kind(), "stdio");
        assert_eq!(transport.command(), "cat");
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = StdioTransport::spawn(&config("this_command_does_not_exist_xyz123", &[], 5000));
        match result {
            Err(McpError::SpawnFailed { name, .. }) => {
                assert_eq!(name, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected SpawnFailed, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn spawn_empty_command_is_config_error() {
        let result = StdioTransport::spawn(&config("", &[], 5000));
        assert!(matches!(result, Err(McpError::Config(_))));
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let transport = scripted(
            r#"echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}""#,
            5000,
        );
        let ctx = CallContext::new();

        let first = transport
            .request(&ctx, "test/method", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(first["ok"], true);
        // Ids keep increasing across calls
        transport.request(&ctx, "test/method", None).await.unwrap();
        assert_eq!(transport.ids.peek(), 3);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn notifications_and_stale_responses_are_skipped() {
        let transport = scripted(
            r#"echo "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}"; echo ""; echo "{\"jsonrpc\":\"2.0\",\"id\":$((id-1)),\"result\":{}}"; echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"n\":$id}}""#,
            5000,
        );

        let result = transport
            .request(&CallContext::new(), "tools/list", None)
            .await
            .unwrap();
        assert_eq!(result["n"], 1);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn mismatched_id_fails() {
        let transport = scripted(
            r#"echo "{\"jsonrpc\":\"2.0\",\"id\":$((id+5)),\"result\":{}}""#,
            5000,
        );

        match transport.request(&CallContext::new(), "tools/list", None).await {
            Err(McpError::IdMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, Some(6));
            }
            other => panic!("Expected IdMismatch, got: {other:?}"),
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn json_rpc_error_is_surfaced() {
        let transport = scripted(
            r#"echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}""#,
            5000,
        );

        match transport.request(&CallContext::new(), "nope", None).await {
            Err(McpError::JsonRpc { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected JsonRpc error, got: {other:?}"),
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_output_is_decode_error() {
        let transport = scripted(r#"echo "this is not json""#, 5000);
        let err = transport
            .request(&CallContext::new(), "tools/list", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Decode { .. }));
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let transport = StdioTransport::spawn(&config("cat", &[], 5000)).unwrap();
        transport
            .notify(&CallContext::new(), "notifications/initialized", None)
            .await
            .unwrap();
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn timeout_fires_on_unresponsive_server() {
        // `sleep` never writes to stdout
        let transport = StdioTransport::spawn(&config("sleep", &["10"], 100)).unwrap();

        match transport
            .request(&CallContext::new(), "test/method", None)
            .await
        {
            Err(McpError::Timeout { timeout_ms, method, .. }) => {
                assert_eq!(timeout_ms, 100);
                assert_eq!(method, "test/method");
            }
            other => panic!("Expected Timeout, got: {other:?}"),
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn exited_server_is_connection_closed() {
        let transport = StdioTransport::spawn(&config("true", &[], 5000)).unwrap();
        let err = transport
            .request(&CallContext::new(), "tools/list", None)
            .await
            .unwrap_err();
        // Either the write hits a closed pipe or the read sees EOF
        assert!(matches!(
            err,
            McpError::ConnectionClosed { .. } | McpError::Transport { .. }
        ));
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_call_is_busy() {
        let transport = Arc::new(StdioTransport::spawn(&config("sleep", &["10"], 5000)).unwrap());

        let in_flight = Arc::clone(&transport);
        let first = tokio::spawn(async move {
            in_flight
                .request(&CallContext::new(), "slow", None)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = transport
            .request(&CallContext::new(), "tools/list", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Busy { .. }));
        assert!(err.is_state_error());

        // Killing the process ends the in-flight read
        transport.shutdown().await;
        let first = first.await.unwrap();
        assert!(matches!(first, Err(McpError::ConnectionClosed { .. })));
    }

    #[tokio::test]
    async fn stderr_lines_reach_the_sink() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = LogSink::for_connection("stdio", "stdio:test").with_stderr_handler(
            move |server, line| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push(format!("{server}: {line}"));
            },
        );
        let transport = StdioTransport::spawn_with_sink(
            &config("bash", &["-c", "echo 'server starting' >&2; sleep 10"], 5000),
            sink,
        )
        .unwrap();

        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["stdio:test: server starting"]);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let transport = StdioTransport::spawn(&config("cat", &[], 5000)).unwrap();
        transport.shutdown().await;
        transport.shutdown().await;

        let err = transport
            .request(&CallContext::new(), "tools/list", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed { .. }));
    }
}
