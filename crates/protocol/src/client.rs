//! The protocol client: one connection to one tool server.
//!
//! Requests are correlated by JSON-RPC id. A single reader task owns the
//! inbound half and routes each response to its waiting caller through a
//! pending map of one-shot channels, so many invocations can be in flight at
//! once and responses may arrive in any order. Only the client writes to the
//! connection; the writer sits behind a lock.
//!
//! Failure handling:
//! - unknown tool or schema mismatch fails before anything is sent
//! - a bounded wait per invocation covering the write and the response,
//!   after which the pending entry is dropped; a write cut off mid-frame
//!   abandons the connection
//! - on connection loss, exactly one reconnect (with fresh discovery) and one
//!   resend; if that fails too the client goes dead until [`ProtocolClient::restart`]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use refdesk_core::{InvocationError, ToolDescriptor, ToolExecutor, ToolOutput, TransportError};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::jsonrpc::{
    self, CallToolResult, Inbound, METHOD_NOT_FOUND, Notification, PROTOCOL_VERSION, Request,
    Response, RpcError, TOOL_ERROR, ToolsListResult,
};
use crate::registry::ToolRegistry;
use crate::transport::{BoxedReader, BoxedWriter, Connection, Connector};

type Outcome = Result<Value, RpcError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;
type LineWriter = Arc<Mutex<FramedWrite<BoxedWriter, LinesCodec>>>;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bounded wait for one `tools/call`
    pub invocation_timeout: Duration,

    /// Bounded wait for each handshake and discovery request
    pub handshake_timeout: Duration,

    /// Dispatch one invocation at a time
    pub serialize_dispatch: bool,

    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            serialize_dispatch: false,
            client_name: "refdesk".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    /// Reconnection failed; every call fails fast until restarted.
    Dead,
}

#[derive(Clone)]
enum ClientState {
    Disconnected,
    Connected(Arc<LiveConnection>),
    Dead(String),
}

enum RequestFailure {
    TimedOut,
    Lost(String),
}

/// An initialized connection and its reader task.
struct LiveConnection {
    writer: LineWriter,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    _child: Option<Child>,
}

impl LiveConnection {
    fn start(connection: Connection, reply_timeout: Duration) -> Self {
        let Connection {
            reader,
            writer,
            child,
        } = connection;

        let writer: LineWriter = Arc::new(Mutex::new(FramedWrite::new(writer, LinesCodec::new())));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            FramedRead::new(reader, LinesCodec::new()),
            pending.clone(),
            writer.clone(),
            alive.clone(),
            reply_timeout,
        ));

        Self {
            writer,
            pending,
            alive,
            reader_task,
            _child: child,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), String> {
        let line = serde_json::to_string(message).map_err(|e| e.to_string())?;
        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|e| e.to_string())
    }

    /// Stop using a connection whose outbound stream may end in a partial
    /// frame. Callers still waiting on it see the connection as lost.
    async fn abandon(&self, reason: &str) {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!(%reason, "Abandoning tool server connection");
        }
        self.reader_task.abort();
        self.pending.lock().await.clear();
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(
    mut lines: FramedRead<BoxedReader, LinesCodec>,
    pending: PendingMap,
    writer: LineWriter,
    alive: Arc<AtomicBool>,
    reply_timeout: Duration,
) {
    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Tool server stream failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match jsonrpc::classify(line) {
            Inbound::Response { id, outcome } => {
                let waiter = pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => warn!(id, "Response for unknown or expired request id"),
                }
            }
            Inbound::Notification { method, .. } => {
                debug!(%method, "Tool server notification");
            }
            Inbound::Request { id, method } => {
                warn!(%method, "Refusing server-initiated request");
                let reply = Response::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not supported by client: {method}"),
                );
                // Replying must never stall response routing.
                if let Ok(text) = serde_json::to_string(&reply) {
                    let writer = writer.clone();
                    tokio::spawn(async move {
                        let sent = tokio::time::timeout(reply_timeout, async {
                            writer.lock().await.send(text).await
                        })
                        .await;
                        match sent {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(error = %e, "Failed to refuse server request"),
                            Err(_) => warn!("Timed out refusing server request"),
                        }
                    });
                }
            }
            Inbound::Invalid(reason) => {
                debug!(%reason, line, "Skipping non-protocol line from tool server");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let orphaned = std::mem::take(&mut *pending.lock().await);
    if !orphaned.is_empty() {
        warn!(in_flight = orphaned.len(), "Tool server connection closed with requests in flight");
    }
    debug!("Tool server reader finished");
}

/// Client for one tool server process.
pub struct ProtocolClient {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    next_id: AtomicU64,
    state: RwLock<ClientState>,
    registry: RwLock<ToolRegistry>,
    reconnect_lock: Mutex<()>,
    dispatch_lock: Mutex<()>,
}

impl ProtocolClient {
    pub fn new(connector: impl Connector + 'static, options: ClientOptions) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
            next_id: AtomicU64::new(1),
            state: RwLock::new(ClientState::Disconnected),
            registry: RwLock::new(ToolRegistry::new()),
            reconnect_lock: Mutex::new(()),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Open the connection and discover tools. Returns the tool count.
    /// A live connection is kept as is; a dead client stays dead until
    /// [`ProtocolClient::restart`].
    ///
    /// A failed first connect leaves the client disconnected, so the next
    /// invocation makes its own single attempt.
    pub async fn connect(&self) -> Result<usize, TransportError> {
        let _guard = self.reconnect_lock.lock().await;
        match &*self.state.read().await {
            ClientState::Connected(live) if live.is_alive() => {
                return Ok(self.registry.read().await.len());
            }
            ClientState::Dead(reason) => return Err(TransportError::Dead(reason.clone())),
            ClientState::Connected(_) | ClientState::Disconnected => {}
        }
        let live = self.establish().await?;
        *self.state.write().await = ClientState::Connected(live);
        Ok(self.registry.read().await.len())
    }

    /// Tear down whatever connection exists and start over. Clears the dead
    /// state on success.
    pub async fn restart(&self) -> Result<usize, TransportError> {
        let _guard = self.reconnect_lock.lock().await;
        *self.state.write().await = ClientState::Disconnected;
        match self.establish().await {
            Ok(live) => {
                *self.state.write().await = ClientState::Connected(live);
                info!("Tool server restarted");
                Ok(self.registry.read().await.len())
            }
            Err(e) => {
                *self.state.write().await = ClientState::Dead(e.to_string());
                Err(e)
            }
        }
    }

    /// Close the connection, killing an owned server process.
    pub async fn shutdown(&self) {
        *self.state.write().await = ClientState::Disconnected;
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.state.read().await {
            ClientState::Connected(live) if live.is_alive() => ConnectionStatus::Connected,
            ClientState::Connected(_) | ClientState::Disconnected => ConnectionStatus::Disconnected,
            ClientState::Dead(_) => ConnectionStatus::Dead,
        }
    }

    /// Tools found at the last successful discovery.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.read().await.descriptors()
    }

    /// Invoke a tool and wait for its result.
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<ToolOutput, InvocationError> {
        let _serial = if self.options.serialize_dispatch {
            Some(self.dispatch_lock.lock().await)
        } else {
            None
        };

        let mut reconnected = false;
        let state = self.state.read().await.clone();
        let mut conn = match state {
            ClientState::Connected(live) if live.is_alive() => live,
            ClientState::Dead(reason) => {
                return Err(InvocationError::ToolProcessUnavailable(reason));
            }
            ClientState::Connected(stale) => {
                reconnected = true;
                self.reconnect(Some(&stale)).await?
            }
            ClientState::Disconnected => {
                reconnected = true;
                self.reconnect(None).await?
            }
        };

        loop {
            self.validate(name, arguments).await?;

            let params = json!({ "name": name, "arguments": arguments });
            let timeout = self.options.invocation_timeout;
            match self.request(&conn, "tools/call", Some(params), timeout).await {
                Ok(outcome) => return into_output(name, outcome),
                Err(RequestFailure::TimedOut) => {
                    warn!(tool = name, timeout_ms = timeout.as_millis() as u64, "Tool call timed out");
                    return Err(InvocationError::Timeout {
                        tool_name: name.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(RequestFailure::Lost(reason)) => {
                    warn!(tool = name, %reason, "Lost connection to tool server");
                    if reconnected {
                        self.mark_dead(&conn, &reason).await;
                        return Err(InvocationError::ToolProcessUnavailable(reason));
                    }
                    reconnected = true;
                    conn = self.reconnect(Some(&conn)).await?;
                }
            }
        }
    }

    async fn validate(&self, name: &str, arguments: &Value) -> Result<(), InvocationError> {
        let registry = self.registry.read().await;
        let tool = registry
            .get(name)
            .ok_or_else(|| InvocationError::UnknownTool(name.to_string()))?;
        tool.schema
            .validate(arguments)
            .map_err(|reason| InvocationError::InvalidArguments {
                tool_name: name.to_string(),
                reason,
            })
    }

    /// Replace a lost connection. Concurrent callers that lost the same
    /// connection share one attempt.
    async fn reconnect(
        &self,
        stale: Option<&Arc<LiveConnection>>,
    ) -> Result<Arc<LiveConnection>, InvocationError> {
        let _guard = self.reconnect_lock.lock().await;

        let state = self.state.read().await.clone();
        match state {
            ClientState::Dead(reason) => {
                return Err(InvocationError::ToolProcessUnavailable(reason));
            }
            ClientState::Connected(current)
                if current.is_alive() && stale.is_none_or(|s| !Arc::ptr_eq(s, &current)) =>
            {
                return Ok(current);
            }
            _ => {}
        }

        *self.state.write().await = ClientState::Disconnected;
        info!(server = %self.connector.describe(), "Reconnecting to tool server");

        match self.establish().await {
            Ok(live) => {
                *self.state.write().await = ClientState::Connected(live.clone());
                Ok(live)
            }
            Err(e) => {
                error!(error = %e, "Tool server unavailable, marking connection dead");
                *self.state.write().await = ClientState::Dead(e.to_string());
                Err(InvocationError::ToolProcessUnavailable(e.to_string()))
            }
        }
    }

    async fn mark_dead(&self, conn: &Arc<LiveConnection>, reason: &str) {
        let mut state = self.state.write().await;
        if let ClientState::Connected(current) = &*state
            && Arc::ptr_eq(current, conn)
        {
            error!(%reason, "Tool server lost again after reconnect, marking connection dead");
            *state = ClientState::Dead(reason.to_string());
        }
    }

    /// Connect, handshake, and discover tools.
    async fn establish(&self) -> Result<Arc<LiveConnection>, TransportError> {
        let connection = self.connector.connect().await?;
        let live = Arc::new(LiveConnection::start(connection, self.options.invocation_timeout));
        let timeout = self.options.handshake_timeout;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });
        let init = self
            .request(&live, "initialize", Some(params), timeout)
            .await
            .map_err(|f| handshake_failure("initialize", f))?
            .map_err(|e| TransportError::Handshake(format!("initialize rejected: {}", e.message)))?;

        if let Some(version) = init.get("protocolVersion").and_then(Value::as_str)
            && version != PROTOCOL_VERSION
        {
            debug!(server_version = version, "Server answered with a different protocol version");
        }

        tokio::time::timeout(
            timeout,
            live.write_message(&Notification::new("notifications/initialized", None)),
        )
        .await
        .map_err(|_| TransportError::Handshake("timed out sending notifications/initialized".into()))?
        .map_err(TransportError::Io)?;

        let mut discovered = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self
                .request(&live, "tools/list", params, timeout)
                .await
                .map_err(|f| handshake_failure("tools/list", f))?
                .map_err(|e| TransportError::Handshake(format!("tools/list rejected: {}", e.message)))?;

            let page: ToolsListResult = serde_json::from_value(result)
                .map_err(|e| TransportError::Protocol(format!("malformed tools/list result: {e}")))?;
            discovered.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        let registry = ToolRegistry::from_discovered(discovered);
        info!(
            server = %self.connector.describe(),
            tools = ?registry.names(),
            "Tool server ready"
        );
        *self.registry.write().await = registry;

        Ok(live)
    }

    async fn request(
        &self,
        conn: &LiveConnection,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Outcome, RequestFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Request::new(id, method, params))
            .map_err(|e| RequestFailure::Lost(format!("unencodable request: {e}")))?;
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);

        // The reader clears the map only after flipping `alive`.
        if !conn.is_alive() {
            conn.pending.lock().await.remove(&id);
            return Err(RequestFailure::Lost("connection closed".into()));
        }

        // One deadline covers waiting for the writer, the write and the response.
        let mut mid_write = false;
        let exchange = async {
            let mut writer = conn.writer.lock().await;
            mid_write = true;
            writer
                .send(line)
                .await
                .map_err(|e| RequestFailure::Lost(format!("write failed: {e}")))?;
            mid_write = false;
            drop(writer);
            debug!(id, method, "Sent request");

            rx.await.map_err(|_| {
                RequestFailure::Lost("connection closed while waiting for a response".into())
            })
        };
        let result = tokio::time::timeout(timeout, exchange).await;

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(failure)) => {
                conn.pending.lock().await.remove(&id);
                Err(failure)
            }
            Err(_) => {
                conn.pending.lock().await.remove(&id);
                if mid_write {
                    conn.abandon("request write timed out").await;
                }
                Err(RequestFailure::TimedOut)
            }
        }
    }
}

fn handshake_failure(method: &str, failure: RequestFailure) -> TransportError {
    match failure {
        RequestFailure::TimedOut => TransportError::Handshake(format!("timed out waiting for {method}")),
        RequestFailure::Lost(reason) => TransportError::Io(reason),
    }
}

fn into_output(tool_name: &str, outcome: Outcome) -> Result<ToolOutput, InvocationError> {
    let value = outcome.map_err(|e| InvocationError::Remote {
        tool_name: tool_name.to_string(),
        code: e.code,
        message: e.message,
    })?;

    let result: CallToolResult =
        serde_json::from_value(value.clone()).map_err(|e| InvocationError::Remote {
            tool_name: tool_name.to_string(),
            code: TOOL_ERROR,
            message: format!("malformed tools/call result: {e}"),
        })?;

    if result.is_error {
        return Err(InvocationError::Remote {
            tool_name: tool_name.to_string(),
            code: TOOL_ERROR,
            message: result.text(),
        });
    }

    Ok(ToolOutput {
        text: result.text(),
        structured: Some(value),
    })
}

#[async_trait]
impl ToolExecutor for ProtocolClient {
    /// Connects first if nothing has been discovered yet. A server that
    /// cannot be reached yields no tools; invocations report the failure.
    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let disconnected = matches!(&*self.state.read().await, ClientState::Disconnected);
        if disconnected && let Err(e) = self.connect().await {
            warn!(error = %e, "Tool discovery failed");
        }
        self.tools().await
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput, InvocationError> {
        self.call(name, arguments).await
    }
}
