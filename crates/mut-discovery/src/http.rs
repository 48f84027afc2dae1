//! Streamable HTTP transport.
//!
//! Every message is a `POST` to the server URL. The response body is either
//! plain JSON or a `text/event-stream` whose first `data:` frame holds the
//! JSON-RPC response. The server may assign a session with the
//! `mcp-session-id` header; it is sent back on every later request.

use crate::client::Connection;
use crate::config::HttpClientConfig;
use crate::context::CallContext;
use crate::event_stream;
use crate::sink::LogSink;
use crate::transport::{BoxFuture, RequestIds, Transport};
use mut_types::protocol::{PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};
use mut_types::{ConfigError, JsonRpcRequest, JsonRpcResponse, McpError};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::Instrument;

/// Build the fixed header set for a connection: configured headers plus
/// `default_accept`.
pub(crate) fn build_headers(
    config: &HttpClientConfig,
    default_accept: &'static str,
) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static(default_accept));

    for (name, value) in &config.headers {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: format!("headers.{name}"),
            message,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Build the reqwest client shared by all calls on one connection.
pub(crate) fn build_client(id: &str, timeout: Option<Duration>) -> Result<reqwest::Client, McpError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| McpError::Transport {
        server: id.to_string(),
        message: format!("Failed to build HTTP client: {e}"),
    })
}

/// Map a reqwest failure, keeping timeouts distinguishable.
pub(crate) fn send_error(id: &str, method: &str, timeout: Duration, e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout {
            server: id.to_string(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        McpError::Transport {
            server: id.to_string(),
            message: format!("{method} request failed: {e}"),
        }
    }
}

/// Whether a notification POST was accepted.
pub(crate) fn accepted(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
    )
}

/// Streamable HTTP transport for one MCP server.
pub struct HttpTransport {
    id: String,
    url: String,
    http: reqwest::Client,
    headers: HeaderMap,
    timeout: Duration,
    ids: RequestIds,
    sink: LogSink,
    session: Mutex<Session>,
    protocol_version: Mutex<Option<String>>,
}

/// Server-assigned session. `epoch` advances on shutdown so a response that
/// was in flight at the time cannot restore the old session.
#[derive(Debug, Default)]
struct Session {
    epoch: u64,
    id: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &HttpClientConfig) -> Result<Self, McpError> {
        let id = config.options.connection_id("http");
        let sink = LogSink::for_connection("http", &id);
        Self::build(config, id, sink)
    }

    pub fn with_sink(config: &HttpClientConfig, sink: LogSink) -> Result<Self, McpError> {
        Self::build(config, config.options.connection_id("http"), sink)
    }

    fn build(config: &HttpClientConfig, id: String, sink: LogSink) -> Result<Self, McpError> {
        config.validate()?;
        let headers = build_headers(config, "application/json, text/event-stream")?;
        let timeout = config.options.timeout();
        let http = build_client(&id, Some(timeout))?;

        Ok(Self {
            id,
            url: config.url.clone(),
            http,
            headers,
            timeout,
            ids: RequestIds::new(),
            sink,
            session: Mutex::new(Session::default()),
            protocol_version: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        lock(&self.session).id.clone()
    }

    async fn post(
        &self,
        method: &str,
        envelope: &JsonRpcRequest,
    ) -> Result<reqwest::Response, McpError> {
        let mut request = self.http.post(&self.url).headers(self.headers.clone());
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_ID_HEADER, session);
        }
        if let Some(version) = lock(&self.protocol_version).clone() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        tracing::debug!(id = ?envelope.id, method, "POST {}", self.url);
        request
            .json(envelope)
            .send()
            .await
            .map_err(|e| send_error(&self.id, method, self.timeout, e))
    }

    async fn read_body(&self, method: &str, response: reqwest::Response) -> Result<String, McpError> {
        response
            .text()
            .await
            .map_err(|e| send_error(&self.id, method, self.timeout, e))
    }

    async fn exchange(
        &self,
        method: &str,
        id: u64,
        envelope: &JsonRpcRequest,
    ) -> Result<serde_json::Value, McpError> {
        let epoch = lock(&self.session).epoch;
        let response = self.post(method, envelope).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                server: self.id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let session = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let body = self.read_body(method, response).await?;
        let payload = if event_stream {
            event_stream::first_data(&body).ok_or_else(|| McpError::Framing {
                context: format!("{method} event-stream response"),
                message: "no data frame".to_string(),
            })?
        } else {
            body
        };

        let parsed: JsonRpcResponse =
            serde_json::from_str(&payload).map_err(|source| McpError::Decode {
                context: format!("{method} response"),
                source,
            })?;
        let result = parsed.into_result(&self.id, method, id)?;

        if let Some(session) = session {
            let mut current = lock(&self.session);
            if current.epoch != epoch {
                tracing::debug!("Ignoring MCP session from a response that outlived shutdown");
            } else if current.id.as_deref() != Some(session.as_str()) {
                tracing::debug!("MCP session assigned: {session}");
                current.id = Some(session);
            }
        }

        Ok(result)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "http"
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
                let id = self.ids.next_id();
                let envelope = JsonRpcRequest::new(id, method, params);
                ctx.run(&self.id, method, self.timeout, self.exchange(method, id, &envelope))
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
                let envelope = JsonRpcRequest::notification(method, params);
                ctx.run(&self.id, method, self.timeout, async {
                    let response = self.post(method, &envelope).await?;
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
        Box::pin(async move {
            {
                let mut session = lock(&self.session);
                session.id = None;
                session.epoch += 1;
            }
            lock(&self.protocol_version).take();
            self.sink
                .span()
                .in_scope(|| tracing::debug!("HTTP session state cleared"));
        })
    }
}

/// MCP client over streamable HTTP.
pub type HttpClient = Connection<HttpTransport>;

impl Connection<HttpTransport> {
    pub fn http(config: &HttpClientConfig) -> Result<Self, McpError> {
        let transport = HttpTransport::new(config)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }

    pub fn http_with_sink(config: &HttpClientConfig, sink: LogSink) -> Result<Self, McpError> {
        let transport = HttpTransport::with_sink(config, sink)?;
        Ok(Connection::new(
            transport,
            config.options.protocol_version,
            config.options.client_info.clone(),
        ))
    }
}
