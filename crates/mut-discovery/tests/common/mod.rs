//! Raw TCP mock MCP servers shared by the integration tests.
//!
//! `MockHttpServer` answers streamable-HTTP POSTs; `MockSseServer` serves a
//! long-lived event stream plus a POST endpoint. Both record every request.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Path to the bash stdio server fixture.
pub const STDIO_FIXTURE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/mock_mcp_server.sh"
);

/// One HTTP request as seen by a mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn rpc_method(&self) -> Option<String> {
        self.json()["method"].as_str().map(str::to_string)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one HTTP request (head plus `Content-Length` body).
pub async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Build a complete HTTP/1.1 response.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    response
}

/// The canned MCP server: `mock-server` with one tool, prompt and resource.
pub fn mock_result(server_name: &str, method: &str, params: &Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "prompts": {}, "resources": {}},
            "serverInfo": {"name": server_name, "version": "1.0.0"}
        })),
        "tools/list" => Ok(json!({
            "tools": [{
                "name": "test_tool",
                "description": "A test tool",
                "inputSchema": {
                    "type": "object",
                    "properties": {"input": {"type": "string"}}
                }
            }]
        })),
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or_default();
            Ok(json!({
                "content": [{"type": "text", "text": format!("Tool result: {name}")}]
            }))
        }
        "prompts/list" => Ok(json!({
            "prompts": [{
                "name": "test_prompt",
                "description": "A test prompt",
                "arguments": [{"name": "arg1", "description": "First argument", "required": true}]
            }]
        })),
        "prompts/get" => Ok(json!({
            "description": "Test prompt description",
            "messages": [{"role": "user", "content": {"type": "text", "text": "Test prompt message"}}]
        })),
        "resources/list" => Ok(json!({
            "resources": [{
                "uri": "test://resource",
                "name": "test_resource",
                "description": "A test resource",
                "mimeType": "text/plain"
            }]
        })),
        "resources/read" => {
            let uri = params["uri"].as_str().unwrap_or_default();
            Ok(json!({
                "contents": [{"uri": uri, "mimeType": "text/plain", "text": "Test resource content"}]
            }))
        }
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}

fn rpc_envelope(server_name: &str, request: &Value) -> Value {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default();
    match mock_result(server_name, method, &request["params"]) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        }
    }
}

/// How a [`MockHttpServer`] answers.
#[derive(Debug, Clone)]
pub struct HttpBehavior {
    pub server_name: &'static str,
    /// Frame responses as `text/event-stream`.
    pub sse_framing: bool,
    /// Session id to assign in `mcp-session-id`.
    pub session_id: Option<&'static str>,
    /// Delay before answering requests (not notifications).
    pub delay: Duration,
    /// Answer every request with this status and body instead.
    pub fail_with: Option<(&'static str, &'static str)>,
    /// Status for notifications.
    pub notification_status: &'static str,
    /// Echo this id instead of the request's.
    pub force_id: Option<u64>,
    /// Answer requests with this `text/event-stream` body verbatim.
    pub raw_event_stream: Option<&'static str>,
}

impl Default for HttpBehavior {
    fn default() -> Self {
        Self {
            server_name: "mock-server",
            sse_framing: false,
            session_id: None,
            delay: Duration::ZERO,
            fail_with: None,
            notification_status: "202 Accepted",
            force_id: None,
            raw_event_stream: None,
        }
    }
}

/// Streamable-HTTP mock MCP server on a random local port.
pub struct MockHttpServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpServer {
    pub async fn start(behavior: HttpBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let recorded = Arc::clone(&recorded);
                let behavior = behavior.clone();

                tokio::spawn(async move {
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    recorded.lock().unwrap().push(request.clone());

                    let response = Self::respond(&behavior, &request).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.flush().await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/mcp"),
            requests,
        }
    }

    async fn respond(behavior: &HttpBehavior, request: &RecordedRequest) -> String {
        if let Some((status, body)) = behavior.fail_with {
            return http_response(status, &[("Content-Type", "text/plain")], body);
        }

        let message = request.json();
        if message.get("id").is_none() {
            return http_response(behavior.notification_status, &[], "");
        }

        tokio::time::sleep(behavior.delay).await;

        if let Some(body) = behavior.raw_event_stream {
            return http_response("200 OK", &[("Content-Type", "text/event-stream")], body);
        }

        let mut envelope = rpc_envelope(behavior.server_name, &message);
        if let Some(id) = behavior.force_id {
            envelope["id"] = json!(id);
        }

        let mut headers = Vec::new();
        if let Some(session) = behavior.session_id {
            headers.push(("mcp-session-id", session));
        }
        if behavior.sse_framing {
            headers.push(("Content-Type", "text/event-stream"));
            let body = format!("event: message\ndata: {envelope}\n\n");
            http_response("200 OK", &headers, &body)
        } else {
            headers.push(("Content-Type", "application/json"));
            http_response("200 OK", &headers, &envelope.to_string())
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests that carried an id (not notifications).
    pub fn rpc_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.json().get("id").is_some())
            .collect()
    }
}

/// How a [`MockSseServer`] answers.
#[derive(Debug, Clone)]
pub struct SseBehavior {
    /// Data of the `endpoint` event; `None` means never send one.
    pub endpoint: Option<String>,
    /// Answer requests on the stream.
    pub respond: bool,
    /// Status for the `GET` of the stream.
    pub stream_status: &'static str,
}

impl Default for SseBehavior {
    fn default() -> Self {
        Self {
            endpoint: Some("/messages?sessionId=abc123".into()),
            respond: true,
            stream_status: "200 OK",
        }
    }
}

#[derive(Default)]
struct SseState {
    stream: Mutex<Option<mpsc::UnboundedSender<String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    streams_opened: Mutex<usize>,
}

/// MCP "HTTP with SSE" mock server on a random local port.
pub struct MockSseServer {
    pub url: String,
    state: Arc<SseState>,
}

impl MockSseServer {
    pub async fn start(behavior: SseBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(SseState::default());
        let shared = Arc::clone(&state);

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let state = Arc::clone(&shared);
                let behavior = behavior.clone();
                tokio::spawn(Self::handle(socket, state, behavior));
            }
        });

        Self {
            url: format!("http://{addr}/sse"),
            state,
        }
    }

    async fn handle(mut socket: TcpStream, state: Arc<SseState>, behavior: SseBehavior) {
        let Some(request) = read_request(&mut socket).await else {
            return;
        };
        state.requests.lock().unwrap().push(request.clone());

        if request.request_line.starts_with("GET") {
            if behavior.stream_status != "200 OK" {
                let response = http_response(behavior.stream_status, &[], "no stream");
                let _ = socket.write_all(response.as_bytes()).await;
                return;
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            *state.stream.lock().unwrap() = Some(tx);
            *state.streams_opened.lock().unwrap() += 1;

            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let _ = socket.write_all(b": keep-alive\n\n").await;
            if let Some(endpoint) = &behavior.endpoint {
                let event = format!("event: endpoint\ndata: {endpoint}\n\n");
                let _ = socket.write_all(event.as_bytes()).await;
            }
            let _ = socket.flush().await;

            while let Some(event) = rx.recv().await {
                if socket.write_all(event.as_bytes()).await.is_err() {
                    break;
                }
                let _ = socket.flush().await;
            }
            let _ = socket.shutdown().await;
            return;
        }

        // POST to the message endpoint
        let response = http_response("202 Accepted", &[], "");
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;

        let message = request.json();
        if message.get("id").is_none() || !behavior.respond {
            return;
        }
        let envelope = rpc_envelope("mock-server", &message);
        let event = format!("event: message\ndata: {envelope}\n\n");
        if let Some(tx) = state.stream.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Push a raw event block onto the open stream.
    pub fn push(&self, raw: &str) {
        if let Some(tx) = self.state.stream.lock().unwrap().as_ref() {
            let _ = tx.send(raw.to_string());
        }
    }

    /// End the open stream from the server side.
    pub fn close_stream(&self) {
        self.state.stream.lock().unwrap().take();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request_line.starts_with("POST"))
            .collect()
    }

    pub fn streams_opened(&self) -> usize {
        *self.state.streams_opened.lock().unwrap()
    }
}

/// Route `tracing` output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mut_discovery=debug")
        .with_test_writer()
        .try_init();
}
