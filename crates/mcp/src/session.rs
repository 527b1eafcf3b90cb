//! Provider process lifecycle and the request/response exchange over its stdio.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsParams, ListToolsResult, RequestId, Tool,
};

/// Default timeout for a single request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of one response line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Failure text used when a provider flags an error but sends no text.
pub const BLANK_ERROR_TEXT: &str = "tool reported an error";

/// How long a provider gets to exit after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Lines queued for the writer task before senders wait.
const OUTBOUND_CAPACITY: usize = 32;

/// How to launch one provider process.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

type Reply = oneshot::Sender<Result<JsonRpcResponse>>;

/// Requests waiting for a response, keyed by id. Closed once stdout ends.
#[derive(Default)]
struct Inflight {
    closed: bool,
    replies: HashMap<RequestId, Reply>,
}

type SharedInflight = Arc<parking_lot::Mutex<Inflight>>;

/// Removes a request's reply slot when its exchange ends or is dropped.
struct Registration<'a> {
    inflight: &'a SharedInflight,
    id: RequestId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.inflight.lock().replies.remove(&self.id);
    }
}

/// Handle to a running provider process.
///
/// Stdin is owned by a writer task and stdout by a reader task, so a caller
/// that goes away mid-exchange never leaves a partial line on the channel.
pub struct Session {
    config: SessionConfig,
    process: Mutex<Child>,
    outbound: parking_lot::Mutex<Option<mpsc::Sender<String>>>,
    turn: Mutex<()>,
    inflight: SharedInflight,
    tasks: [JoinHandle<()>; 2],
    next_id: AtomicI64,
    initialized: AtomicBool,
    server_info: Mutex<Option<InitializeResult>>,
}

impl Session {
    /// Spawn a provider process with piped stdio.
    pub async fn spawn(config: SessionConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|source| Error::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdout")))?;

        tracing::debug!(
            provider = %config.name,
            command = %config.command,
            pid = ?process.id(),
            "provider process spawned"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let inflight = SharedInflight::default();
        let writer = tokio::spawn(write_lines(config.name.clone(), stdin, outbound_rx));
        let reader = tokio::spawn(read_responses(
            config.name.clone(),
            BufReader::new(stdout),
            Arc::clone(&inflight),
        ));

        Ok(Self {
            config,
            process: Mutex::new(process),
            outbound: parking_lot::Mutex::new(Some(outbound_tx)),
            turn: Mutex::new(()),
            inflight,
            tasks: [writer, reader],
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            server_info: Mutex::new(None),
        })
    }

    /// Get the provider name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Perform the `initialize` handshake. Must precede tool calls.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams::default();
        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        self.notify("notifications/initialized", None::<()>).await?;

        tracing::info!(
            provider = %self.config.name,
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "provider initialized"
        );

        *self.server_info.lock().await = Some(result.clone());
        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Check if the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Fetch every tool the provider offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let params = ListToolsParams { cursor };
            let page: ListToolsResult = self.request("tools/list", Some(params)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(provider = %self.config.name, tool_count = tools.len(), "listed tools");
        Ok(tools)
    }

    /// Call a tool by the provider's own name.
    ///
    /// A result flagged `isError` is returned as [`Error::ToolCallFailed`]
    /// carrying the provider's text, or [`BLANK_ERROR_TEXT`] when it sent none.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            let text = result.joined_text();
            let message = if text.trim().is_empty() {
                BLANK_ERROR_TEXT.to_string()
            } else {
                text
            };
            return Err(Error::ToolCallFailed(message));
        }

        Ok(result)
    }

    /// Check if the provider process is still running.
    pub async fn is_running(&self) -> bool {
        let mut process = self.process.lock().await;
        matches!(process.try_wait(), Ok(None))
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn shutdown(&self) -> Result<()> {
        // The writer flushes what is queued, then closes stdin.
        self.outbound.lock().take();

        let mut process = self.process.lock().await;
        match timeout(SHUTDOWN_GRACE, process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(provider = %self.config.name, %status, "provider exited");
                Ok(())
            }
            _ => {
                process.kill().await?;
                tracing::debug!(provider = %self.config.name, "provider killed");
                Ok(())
            }
        }
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }
        let request_json = serde_json::to_string(&request)?;

        // Waiting for the channel counts against the same bound as the reply.
        let response = timeout(self.config.timeout, self.exchange(&id, method, request_json))
            .await
            .map_err(|_| Error::Timeout(self.config.timeout))??;

        let result_value = response.into_result()?;
        serde_json::from_value(result_value)
            .map_err(|e| Error::InvalidResponse(format!("{method}: {e}")))
    }

    /// Run one exchange. Only one is in flight per session.
    ///
    /// Dropping this future at any await point leaves the channel usable: the
    /// line is queued whole or not at all, and a late reply is discarded.
    async fn exchange(
        &self,
        id: &RequestId,
        method: &str,
        line: String,
    ) -> Result<JsonRpcResponse> {
        let _turn = self.turn.lock().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let _registration = self.register(id, reply_tx)?;
        self.send_line(line).await?;

        tracing::trace!(provider = %self.config.name, ?id, method, "request sent");

        reply_rx.await.map_err(|_| Error::ProviderExited)?
    }

    fn register(&self, id: &RequestId, reply: Reply) -> Result<Registration<'_>> {
        let mut inflight = self.inflight.lock();
        if inflight.closed {
            return Err(Error::ProviderExited);
        }
        inflight.replies.insert(id.clone(), reply);
        Ok(Registration {
            inflight: &self.inflight,
            id: id.clone(),
        })
    }

    async fn send_line(&self, line: String) -> Result<()> {
        let outbound = self.outbound.lock().clone().ok_or(Error::ProviderExited)?;
        outbound
            .send(line)
            .await
            .map_err(|_| Error::ProviderExited)
    }

    async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<()>
    where
        P: serde::Serialize,
    {
        // Notifications have no ID
        let mut notification = Map::new();
        notification.insert("jsonrpc".into(), Value::from("2.0"));
        notification.insert("method".into(), Value::from(method));
        if let Some(p) = params {
            notification.insert("params".into(), serde_json::to_value(p)?);
        }

        let notification_json = serde_json::to_string(&notification)?;
        timeout(self.config.timeout, self.send_line(notification_json))
            .await
            .map_err(|_| Error::Timeout(self.config.timeout))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Writer task: sole owner of the provider's stdin.
async fn write_lines(
    provider: String,
    mut stdin: ChildStdin,
    mut outbound: mpsc::Receiver<String>,
) {
    while let Some(line) = outbound.recv().await {
        if let Err(e) = write_line(&mut stdin, &line).await {
            tracing::debug!(provider = %provider, error = %e, "provider stdin closed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Reader task: routes each response to the request waiting on its id.
///
/// Notifications, server requests, non-JSON noise, and responses left
/// behind by a timed-out or cancelled exchange are skipped. When stdout ends,
/// every waiter gets [`Error::ProviderExited`].
async fn read_responses<R>(provider: String, mut stdout: R, inflight: SharedInflight)
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        match read_capped_line(&mut stdout, &mut line, MAX_OUTPUT_SIZE).await {
            Ok(LineRead::Line) => dispatch(&provider, &line, &inflight),
            Ok(LineRead::TooLong { size }) => reject_oversized(&provider, &line, size, &inflight),
            Ok(LineRead::Eof) => break,
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "provider stdout failed");
                break;
            }
        }
    }

    tracing::debug!(provider = %provider, "provider stdout closed");
    let mut inflight = inflight.lock();
    inflight.closed = true;
    for (_, reply) in inflight.replies.drain() {
        let _ = reply.send(Err(Error::ProviderExited));
    }
}

fn dispatch(provider: &str, line: &[u8], inflight: &SharedInflight) {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    let message: JsonRpcResponse = match serde_json::from_str(trimmed) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(provider = %provider, error = %e, "skipping non-JSON-RPC line");
            return;
        }
    };

    let Some(id) = message.id.clone().filter(|_| message.is_response()) else {
        tracing::trace!(
            provider = %provider,
            method = ?message.method,
            "ignoring server-initiated message"
        );
        return;
    };

    let reply = inflight.lock().replies.remove(&id);
    match reply {
        Some(reply) => {
            let _ = reply.send(Ok(message));
        }
        None => tracing::debug!(provider = %provider, got = ?id, "discarding stale response"),
    }
}

/// Fail the request an oversized line answers. When its id cannot be read
/// from the kept prefix, every waiter fails.
fn reject_oversized(provider: &str, prefix: &[u8], size: usize, inflight: &SharedInflight) {
    tracing::warn!(provider = %provider, size, max = MAX_OUTPUT_SIZE, "provider line too large");

    let mut inflight = inflight.lock();
    let targets: Vec<RequestId> = match prefix_id(prefix) {
        Some(id) => vec![id],
        None => inflight.replies.keys().cloned().collect(),
    };
    for id in targets {
        if let Some(reply) = inflight.replies.remove(&id) {
            let _ = reply.send(Err(Error::OutputTooLarge {
                size,
                max: MAX_OUTPUT_SIZE,
            }));
        }
    }
}

/// The value of the first `"id"` key in a truncated JSON object.
fn prefix_id(prefix: &[u8]) -> Option<RequestId> {
    let text = String::from_utf8_lossy(prefix);
    let after_key = &text[text.find("\"id\"")? + 4..];
    let value = after_key.trim_start().strip_prefix(':')?;
    serde_json::Deserializer::from_str(value)
        .into_iter::<RequestId>()
        .next()?
        .ok()
}

#[derive(Debug, PartialEq)]
enum LineRead {
    Line,
    TooLong { size: usize },
    Eof,
}

/// Read one `\n`-terminated line, keeping at most `max` bytes of it.
///
/// The remainder of an oversized line is consumed and dropped, so memory
/// stays bounded whatever the provider writes.
async fn read_capped_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut size = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match size {
                0 => LineRead::Eof,
                size if size > max => LineRead::TooLong { size },
                _ => LineRead::Line,
            });
        }

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        let keep = used.min(max.saturating_sub(line.len()));
        line.extend_from_slice(&available[..keep]);
        size += used;
        reader.consume(used);

        if done {
            return Ok(if size > max {
                LineRead::TooLong { size }
            } else {
                LineRead::Line
            });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.config.name)
            .field("command", &self.config.command)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_builder() {
        let config = SessionConfig::new("fs", "python3")
            .with_args(["servers/filesystem_server.py"])
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.name, "fs");
        assert_eq!(config.args, vec!["servers/filesystem_server.py"]);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.env.is_empty());
    }

    #[tokio::test]
    async fn capped_reader_bounds_oversized_lines() {
        let input: &[u8] = b"ok\nabcdefghij\n\nlast";
        let mut reader = BufReader::with_capacity(4, input);
        let mut line = Vec::new();

        assert_eq!(read_capped_line(&mut reader, &mut line, 5).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"ok\n");

        assert_eq!(
            read_capped_line(&mut reader, &mut line, 5).await.unwrap(),
            LineRead::TooLong { size: 11 }
        );
        assert_eq!(line, b"abcde");

        assert_eq!(read_capped_line(&mut reader, &mut line, 5).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"\n");

        assert_eq!(read_capped_line(&mut reader, &mut line, 5).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"last");

        assert_eq!(read_capped_line(&mut reader, &mut line, 5).await.unwrap(), LineRead::Eof);
    }

    #[test]
    fn reads_id_from_truncated_response() {
        assert_eq!(
            prefix_id(br#"{"jsonrpc":"2.0","id":7,"result":{"content":[{"type":"te"#),
            Some(RequestId::Number(7))
        );
        assert_eq!(
            prefix_id(br#"{"id": "req-1", "result""#),
            Some(RequestId::String("req-1".into()))
        );
        assert_eq!(prefix_id(br#"{"jsonrpc":"2.0","result":{"cont"#), None);
    }

    #[tokio::test]
    async fn oversized_line_fails_only_its_request() {
        let inflight = SharedInflight::default();
        let (seven_tx, seven_rx) = oneshot::channel();
        let (eight_tx, mut eight_rx) = oneshot::channel();
        {
            let mut slots = inflight.lock();
            slots.replies.insert(RequestId::Number(7), seven_tx);
            slots.replies.insert(RequestId::Number(8), eight_tx);
        }

        reject_oversized("mock", br#"{"id":7,"result":"#, MAX_OUTPUT_SIZE + 10, &inflight);

        assert!(matches!(
            seven_rx.await.unwrap(),
            Err(Error::OutputTooLarge { size, .. }) if size == MAX_OUTPUT_SIZE + 10
        ));
        assert!(eight_rx.try_recv().is_err());
        assert!(inflight.lock().replies.contains_key(&RequestId::Number(8)));
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let config = SessionConfig::new("missing", "definitely-not-a-real-provider-binary");
        let err = Session::spawn(config).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-provider-binary"));
    }
}
