//! SSE transport (MCP "HTTP with SSE", protocol 2024-11-05).
//!
//! The client holds one long-lived `GET` stream. The server's first
//! `endpoint` event names the URL that requests are POSTed to; responses come
//! back as `message` events on the stream and are routed to the waiting call
//! by id.

use crate::client::Connection;
use crate::config::SseClientConfig;
use crate::context::CallContext;
use crate::event_stream::SseParser;
use crate::http::{accepted, build_client, build_headers, send_error};
use crate::sink::LogSink;
use crate::transport::{BoxFuture, RequestIds, Transport};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use mut_types::protocol::PROTOCOL_VERSION_HEADER;
use mut_types::{JsonRpcRequest, JsonRpcResponse, McpError};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio_util::task::AbortOnDropHandle;
use tracing::Instrument;

/// Calls waiting for a `message` event, keyed by request id.
#[derive(Default)]
struct Pending {
    open: bool,
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
}

impl Pending {
    /// Fail every waiting call and refuse new ones.
    fn close(&mut self) {
        self.open = false;
        self.waiters.clear();
    }
}

/// Removes its pending entry when the call finishes or is dropped.
struct Waiter<'a> {
    pending: &'a StdMutex<Pending>,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(&self.id);
    }
}

struct SseSession {
    endpoint: Url,
    reader: AbortOnDropHandle<()>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve the `endpoint` event's data against the stream URL.
///
/// The endpoint must share the stream's origin.
fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, String> {
    let endpoint = base
        .join(data.trim())
        .map_err(|e| format!("invalid endpoint '{data}': {e}"))?;
    if endpoint.origin() != base.origin() {
        return Err(format!(
            "endpoint '{endpoint}' does not match the origin of '{base}'"
        ));
    }
    Ok(endpoint)
}

/// Split off the longest valid UTF-8 prefix of `buf`.
///
/// An incomplete multi-byte sequence at the end stays buffered for the next
/// chunk; invalid bytes are replaced.
fn take_utf8(buf: &mut BytesMut) -> String {
    let valid = match std::str::from_utf8(&buf[..]) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    };
    let bytes = buf.split_to(valid);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read the event stream until it ends, routing responses to waiters.
async fn pump<S>(
    server: String,
    base: Url,
    stream: S,
    pending: Arc<StdMutex<Pending>>,
    endpoint_tx: oneshot::Sender<Result<Url, McpError>>,
) where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut endpoint_tx = Some(endpoint_tx);
    let mut parser = SseParser::new();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("SSE stream error: {e}");
                break;
            }
        };
        buf.extend_from_slice(&chunk);
        let text = take_utf8(&mut buf);

        for event in parser.feed(&text) {
            match event.kind() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let resolved = resolve_endpoint(&base, &event.data).map_err(|message| {
                            McpError::Protocol {
                                server: server.clone(),
                                message,
                            }
                        });
                        let _ = tx.send(resolved);
                    }
                    None => tracing::debug!("Ignoring repeated endpoint event"),
                },
                "message" => dispatch(&pending, &event.data),
                other => tracing::debug!("Ignoring SSE event '{other}'"),
            }
        }
    }

    tracing::info!("SSE stream ended");
    if let Some(tx) = endpoint_tx {
        let _ = tx.send(Err(McpError::ConnectionClosed { server }));
    }
    lock(&pending).close();
}

fn dispatch(pending: &StdMutex<Pending>, data: &str) {
    let response: JsonRpcResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Failed to parse SSE message: {e}: {data}");
            return;
        }
    };

    let Some(id) = response.id else {
        tracing::debug!("Server notification: {data}");
        return;
    };

    match lock(pending).waiters.remove(&id) {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => tracing::warn!("Dropping SSE response with unknown id {id}"),
    }
}

/// SSE transport for one MCP server.
pub struct SseTransport {
    id: String,
    url: Url,
    http: reqwest::Client,
    headers: reqwest::header::HeaderMap,
    timeout: Duration,
    ids: RequestIds,
    sink: LogSink,
    session: Mutex<Option<SseSession>>,
    pending: Arc<StdMutex<Pending>>,
    protocol_version: StdMutex<Option<String>>,
}

impl SseTransport {
    /// Validate the configuration. The stream is opened on first use.
    pub fn new(config: &SseClientConfig) -> Result<Self, McpError> {
        let id = config.options.connection_id("sse");
        let sink = LogSink::for_connection("sse", &id);
        Self::build(config, id, sink)
    }

    pub fn with_sink(config: &SseClientConfig, sink: LogSink) -> Result<Self, McpError> {
        Self::build(config, config.options.connection_id("sse"), sink)
    }

    fn build(config: &SseClientConfig, id: String, sink: LogSink) -> Result<Self, McpError> {
        config.validate()?;
        let url = Url::parse(&config.url).map_err(|e| mut_types::ConfigError::InvalidValue {
            key: "url".into(),
            message: e.to_string(),
        })?;
        let headers = build_headers(config, "application/json, text/event-stream")?;
        // The stream is long-lived; per-request timeouts apply to POSTs only
        let http = build_client(&id, None)?;

        Ok(Self {
            id,
            url,
            http,
            headers,
            timeout: config.options.timeout(),
            ids: RequestIds::new(),
            sink,
            session: Mutex::new(None),
            pending: Arc::new(StdMutex::new(Pending::default())),
            protocol_version: StdMutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST URL announced by the server, once the stream is open.
    pub async fn endpoint_url(&self) -> Option<Url> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.endpoint.clone())
    }

    fn closed(&self) -> McpError {
        McpError::ConnectionClosed {
            server: self.id.clone(),
        }
    }

    async fn endpoint(&self, method: &str) -> Result<Url, McpError> {
        let mut session = self.session.lock().await;
        if let Some(open) = session.as_ref() {
            if open.reader.is_finished() {
                return Err(self.closed());
            }
            return Ok(open.endpoint.clone());
        }

        let opened = self.open(method).await?;
        let endpoint = opened.endpoint.clone();
        *session = Some(opened);
        Ok(endpoint)
    }

    async fn open(&self, method: &str) -> Result<SseSession, McpError> {
        let mut headers = self.headers.clone();
        headers.remove(CONTENT_TYPE);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        tracing::debug!("GET {}", self.url);
        let response = self
            .http
            .get(self.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| send_error(&self.id, method, self.timeout, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                server: self.id.clone(),
                status: status.as_u16(),
                body,
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("text/event-stream") {
            return Err(McpError::Protocol {
                server: self.id.clone(),
                message: format!("expected an event stream, got content type '{content_type}'"),
            });
        }

        {
            let mut pending = lock(&self.pending);
            pending.open = true;
            pending.waiters.clear();
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = AbortOnDropHandle::new(tokio::spawn(
            pump(
                self.id.clone(),
                self.url.clone(),
                response.bytes_stream(),
                Arc::clone(&self.pending),
                endpoint_tx,
            )
            .instrument(self.sink.span().clone()),
        ));

        let endpoint = endpoint_rx.await.map_err(|_| self.closed())??;
        tracing::info!("SSE stream open, posting to {endpoint}");
        Ok(SseSession { endpoint, reader })
    }

    async fn post(
        &self,
        method: &str,
        endpoint: Url,
        envelope: &JsonRpcRequest,
    ) -> Result<(), McpError> {
        let mut request = self
            .http
            .post(endpoint)
            .headers(self.headers.clone())
            .timeout(self.timeout);
        if let Some(version) = lock(&self.protocol_version).clone() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        tracing::debug!(id = ?envelope.id, method, "POST to SSE endpoint");
        let response = request
            .json(envelope)
            .send()
            .await
            .map_err(|e| send_error(&self.id, method, self.timeout, e))?;

        let status = response.status();
        if accepted(status) {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(McpError::Http {
            server: self.id.clone(),
            status: status.as_u16(),
            body,
        })
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let endpoint = self.endpoint(method).await?;

        let id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if !pending.open {
                return Err(self.closed());
            }
            pending.waiters.insert(id, tx);
        }
        let _waiter = Waiter {
            pending: &self.pending,
            id,
        };

        let envelope = JsonRpcRequest::new(id, method, params);
        self.post(method, endpoint, &envelope).await?;

        let response = rx.await.map_err(|_| self.closed())?;
        tracing::debug!(id, method, "Received MCP response");
        response.into_result(&self.id, method, id)
    }
}

impl Transport for SseTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "sse"
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
                ctx.run(&self.id, method, self.timeout, self.exchange(method, params))
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
                ctx.run(&self.id, method, self.timeout, async {
                    let endpoint = self.endpoint(method).await?;
                    let envelope = JsonRpcRequest::notification(method, params);
                    self.post(method, endpoint, &envelope).await
                })
                .await
            }
            .instrument(span),
        )
    }

    fn set_protocol_version(&self, version: &str) {
        *lock(&self.protocol_version) = Some(version.to_string());
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        let span = self.sink.span().clone();
        Box::pin(
            async move {
                // Dropping the session aborts the reader and closes the stream
                if self.session.lock().await.take().is_some() {
                    tracing::info!("SSE stream closed");
                }
                lock(&self.pending).close();
                lock(&self.protocol_version).take();
            }
            .instrument(span),
        )
    }
}

/// MCP client over a persistent SSE stream.
pub type SseClient = Connection<SseTransport>;

impl Connection<SseTransport> {
    pub fn sse(config: &SseClientConfig) -> Result<Self, McpError> {
        let transport = SseTransport::new(config)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }

    pub fn sse_with_sink(config: &SseClientConfig, sink: LogSink) -> Result<Self, McpError> {
        let transport = SseTransport::with_sink(config, sink)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }
}
