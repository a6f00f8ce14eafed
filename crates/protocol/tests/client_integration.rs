//! Protocol client against an in-memory tool server.
//!
//! The fake server speaks the same newline-delimited JSON-RPC as a real one
//! and exposes a handful of tools with scripted behaviour: normal answers,
//! tool-level errors, slow answers, dropped connections, and a server that
//! asks the client something back.

use async_trait::async_trait;
use refdesk_core::{InvocationError, ToolExecutor, TransportError};
use refdesk_protocol::{ClientOptions, Connection, ConnectionStatus, Connector, ProtocolClient};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::Mutex;

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    max_connects: AtomicUsize,
    initialized: AtomicUsize,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeState {
    fn new(max_connects: usize) -> Arc<Self> {
        let state = Self::default();
        state.max_connects.store(max_connects, Ordering::SeqCst);
        Arc::new(state)
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

struct FakeConnector {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.state.max_connects.load(Ordering::SeqCst) {
            return Err(TransportError::Spawn {
                command: "fake-server".into(),
                reason: "refused".into(),
            });
        }

        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server_side, self.state.clone(), n));

        let (read_half, write_half) = tokio::io::split(client_side);
        Ok(Connection::new(read_half, write_half))
    }

    fn describe(&self) -> String {
        "fake-server".into()
    }
}

type Writer = Arc<Mutex<WriteHalf<DuplexStream>>>;

async fn write_line(writer: &Writer, line: String) {
    let mut w = writer.lock().await;
    let _ = w.write_all(format!("{line}\n").as_bytes()).await;
}

async fn reply(writer: &Writer, id: Value, result: Value) {
    write_line(writer, json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()).await;
}

async fn reply_text(writer: &Writer, id: Value, text: &str) {
    let result = json!({"content": [{"type": "text", "text": text}], "isError": false});
    reply(writer, id, result).await;
}

fn tool_list() -> Vec<Value> {
    vec![
        json!({
            "name": "search_issuer",
            "description": "Search issuers by name",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
        json!({
            "name": "get_bond_rating",
            "description": "Credit rating for an ISIN",
            "inputSchema": {
                "type": "object",
                "properties": {"isin": {"type": "string"}},
                "required": ["isin"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "echo_delay",
            "description": "Echo text after a delay",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}, "delay_ms": {"type": "integer"}},
                "required": ["text", "delay_ms"]
            }
        }),
        json!({"name": "slow", "description": "Answers after two seconds", "inputSchema": {"type": "object"}}),
        json!({"name": "crash", "inputSchema": {"type": "object"}}),
        json!({"name": "crash_always", "inputSchema": {"type": "object"}}),
        json!({"name": "ask_back", "inputSchema": {"type": "object"}}),
        json!({"name": "reject", "inputSchema": {"type": "object"}}),
    ]
}

async fn serve(stream: DuplexStream, state: Arc<FakeState>, connection_no: usize) {
    let (read_half, write_half) = tokio::io::split(stream);
    let writer: Writer = Arc::new(Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();
    let mut awaiting_reply: Option<Value> = None;

    // Servers sometimes print banners on stdout.
    write_line(&writer, "Starting fake reference-data server".into()).await;

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: Value = serde_json::from_str(&line).expect("client wrote invalid JSON");
        let id = msg.get("id").cloned().unwrap_or(Value::Null);

        match msg.get("method").and_then(Value::as_str) {
            Some("initialize") => {
                assert_eq!(msg["params"]["protocolVersion"], "2024-11-05");
                reply(
                    &writer,
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0.0.1"}
                    }),
                )
                .await;
            }
            Some("notifications/initialized") => {
                state.initialized.fetch_add(1, Ordering::SeqCst);
                write_line(
                    &writer,
                    json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}})
                        .to_string(),
                )
                .await;
            }
            Some("tools/list") => {
                let tools = tool_list();
                let result = match msg["params"]["cursor"].as_str() {
                    None => json!({"tools": tools[..4].to_vec(), "nextCursor": "page-2"}),
                    Some(_) => json!({"tools": tools[4..].to_vec()}),
                };
                reply(&writer, id, result).await;
            }
            Some("tools/call") => {
                let name = msg["params"]["name"].as_str().unwrap_or_default().to_string();
                let args = msg["params"]["arguments"].clone();
                state.calls.lock().await.push(name.clone());

                match name.as_str() {
                    "search_issuer" => {
                        let text = format!(
                            "Issuer: {} Inc.\nLEI: HWUPKR0MPOU8FGXBT394",
                            args["name"].as_str().unwrap_or_default()
                        );
                        reply_text(&writer, id, &text).await;
                    }
                    "get_bond_rating" if args["isin"] == "US037833AS99" => {
                        reply_text(&writer, id, "AA+ (S&P), Aaa (Moody's)").await;
                    }
                    "get_bond_rating" => {
                        let result = json!({
                            "content": [{"type": "text", "text": "ISIN not found"}],
                            "isError": true
                        });
                        reply(&writer, id, result).await;
                    }
                    "echo_delay" => {
                        let writer = writer.clone();
                        let state = state.clone();
                        let text = args["text"].as_str().unwrap_or_default().to_string();
                        let delay = args["delay_ms"].as_u64().unwrap_or(0);
                        tokio::spawn(async move {
                            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            state.max_in_flight.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            state.in_flight.fetch_sub(1, Ordering::SeqCst);
                            reply_text(&writer, id, &text).await;
                        });
                    }
                    "slow" => {
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_secs(2)).await;
                            reply_text(&writer, id, "too late").await;
                        });
                    }
                    "crash" if connection_no == 1 => return,
                    "crash" => reply_text(&writer, id, "recovered").await,
                    "crash_always" => return,
                    "ask_back" => {
                        awaiting_reply = Some(id);
                        write_line(
                            &writer,
                            json!({"jsonrpc": "2.0", "id": "srv-1", "method": "sampling/createMessage", "params": {}})
                                .to_string(),
                        )
                        .await;
                    }
                    "reject" => {
                        write_line(
                            &writer,
                            json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32602, "message": "Invalid params"}})
                                .to_string(),
                        )
                        .await;
                    }
                    other => panic!("unexpected tool {other}"),
                }
            }
            Some(other) => panic!("unexpected method {other}"),
            None => {
                // The client answering our own request.
                if msg["id"] == "srv-1"
                    && let Some(call_id) = awaiting_reply.take()
                {
                    let code = msg["error"]["code"].as_i64().unwrap_or_default();
                    reply_text(&writer, call_id, &format!("client replied {code}")).await;
                }
            }
        }
    }
}

fn client_with(state: &Arc<FakeState>, options: ClientOptions) -> ProtocolClient {
    ProtocolClient::new(
        FakeConnector {
            state: state.clone(),
        },
        options,
    )
}

fn client(state: &Arc<FakeState>) -> ProtocolClient {
    client_with(state, ClientOptions::default())
}

#[tokio::test]
async fn discovers_tools_across_pages() {
    let state = FakeState::new(1);
    let client = client(&state);

    let count = client.connect().await.unwrap();
    assert_eq!(count, 8);
    assert_eq!(client.status().await, ConnectionStatus::Connected);
    assert_eq!(state.initialized.load(Ordering::SeqCst), 1);

    let tools = client.tools().await;
    assert_eq!(tools[0].name, "search_issuer");
    assert_eq!(tools[0].description, "Search issuers by name");
    let crash = tools.iter().find(|t| t.name == "crash").unwrap();
    assert_eq!(crash.description, "Tool named crash");
}

#[tokio::test]
async fn successful_invocation_returns_text() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let output = client
        .call("search_issuer", &json!({"name": "Apple"}))
        .await
        .unwrap();
    assert_eq!(output.text, "Issuer: Apple Inc.\nLEI: HWUPKR0MPOU8FGXBT394");

    let rating = client
        .invoke("get_bond_rating", &json!({"isin": "US037833AS99"}))
        .await
        .unwrap();
    assert!(rating.text.contains("AA+"));
}

#[tokio::test]
async fn first_call_connects_lazily() {
    let state = FakeState::new(1);
    let client = client(&state);

    let output = client
        .call("search_issuer", &json!({"name": "Treasury"}))
        .await
        .unwrap();
    assert!(output.text.contains("Treasury"));
    assert_eq!(state.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_server() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let err = client.call("get_bond_rating", &json!({})).await.unwrap_err();
    assert!(matches!(err, InvocationError::InvalidArguments { .. }));

    let err = client
        .call("get_bond_rating", &json!({"isin": 912810}))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::InvalidArguments { .. }));

    let err = client
        .call("get_bond_rating", &json!({"isin": "US037833AS99", "extra": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::InvalidArguments { .. }));

    let err = client
        .call("get_instrument_price", &json!({"isin": "US037833AS99"}))
        .await
        .unwrap_err();
    assert_eq!(err, InvocationError::UnknownTool("get_instrument_price".into()));

    assert_eq!(state.call_count().await, 0);
}

#[tokio::test]
async fn tool_errors_become_remote_errors() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let err = client
        .call("get_bond_rating", &json!({"isin": "XS0000000000"}))
        .await
        .unwrap_err();
    match err {
        InvocationError::Remote { message, .. } => assert_eq!(message, "ISIN not found"),
        other => panic!("Expected remote error, got {other:?}"),
    }

    let err = client.call("reject", &json!({})).await.unwrap_err();
    match err {
        InvocationError::Remote { code, message, .. } => {
            assert_eq!(code, -32602);
            assert_eq!(message, "Invalid params");
        }
        other => panic!("Expected remote error, got {other:?}"),
    }
    assert_eq!(client.status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn timeout_is_bounded_and_connection_survives() {
    let state = FakeState::new(1);
    let client = client_with(
        &state,
        ClientOptions {
            invocation_timeout: Duration::from_millis(100),
            ..ClientOptions::default()
        },
    );
    client.connect().await.unwrap();

    let started = Instant::now();
    let err = client.call("slow", &json!({})).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        err,
        InvocationError::Timeout {
            tool_name: "slow".into(),
            timeout_ms: 100
        }
    );
    assert!(err.is_transient());

    let output = client
        .call("search_issuer", &json!({"name": "Apple"}))
        .await
        .unwrap();
    assert!(output.text.contains("Apple"));
    assert_eq!(state.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn responses_are_routed_by_id_not_arrival_order() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let slow = json!({"text": "first", "delay_ms": 200});
    let fast = json!({"text": "second", "delay_ms": 10});
    let (first, second) = tokio::join!(client.call("echo_delay", &slow), client.call("echo_delay", &fast));
    assert_eq!(first.unwrap().text, "first");
    assert_eq!(second.unwrap().text, "second");
    assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn serialized_dispatch_runs_one_at_a_time() {
    let state = FakeState::new(1);
    let client = client_with(
        &state,
        ClientOptions {
            serialize_dispatch: true,
            ..ClientOptions::default()
        },
    );
    client.connect().await.unwrap();

    let slow = json!({"text": "first", "delay_ms": 100});
    let fast = json!({"text": "second", "delay_ms": 10});
    let (first, second) = tokio::join!(client.call("echo_delay", &slow), client.call("echo_delay", &fast));
    assert_eq!(first.unwrap().text, "first");
    assert_eq!(second.unwrap().text, "second");
    assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lost_connection_reconnects_once_and_resends() {
    let state = FakeState::new(2);
    let client = client(&state);
    client.connect().await.unwrap();

    let output = client.call("crash", &json!({})).await.unwrap();
    assert_eq!(output.text, "recovered");
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    assert_eq!(state.initialized.load(Ordering::SeqCst), 2);
    assert_eq!(client.status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn failed_reconnect_marks_client_dead() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let err = client.call("crash", &json!({})).await.unwrap_err();
    assert!(matches!(err, InvocationError::ToolProcessUnavailable(_)));
    assert_eq!(client.status().await, ConnectionStatus::Dead);
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);

    // Dead clients fail fast without touching the connector.
    let err = client
        .call("search_issuer", &json!({"name": "Apple"}))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ToolProcessUnavailable(_)));
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);

    // Only a restart clears the dead state, even once the server is reachable.
    state.max_connects.store(3, Ordering::SeqCst);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Dead(_)));
    assert_eq!(client.status().await, ConnectionStatus::Dead);
    assert_eq!(client.descriptors().await.len(), 8);
    assert_eq!(client.status().await, ConnectionStatus::Dead);
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);

    // A supervisor can bring it back.
    client.restart().await.unwrap();
    assert_eq!(client.status().await, ConnectionStatus::Connected);
    let output = client
        .call("search_issuer", &json!({"name": "Apple"}))
        .await
        .unwrap();
    assert!(output.text.contains("Apple"));
}

#[tokio::test]
async fn second_loss_after_reconnect_is_fatal() {
    let state = FakeState::new(5);
    let client = client(&state);
    client.connect().await.unwrap();

    let err = client.call("crash_always", &json!({})).await.unwrap_err();
    assert!(matches!(err, InvocationError::ToolProcessUnavailable(_)));
    assert_eq!(state.connects.load(Ordering::SeqCst), 2);
    assert_eq!(client.status().await, ConnectionStatus::Dead);
}

#[tokio::test]
async fn server_requests_are_refused() {
    let state = FakeState::new(1);
    let client = client(&state);
    client.connect().await.unwrap();

    let output = client.call("ask_back", &json!({})).await.unwrap();
    assert_eq!(output.text, "client replied -32601");
}

#[tokio::test]
async fn unreachable_server_fails_connect() {
    let state = FakeState::new(0);
    let client = client(&state);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Spawn { .. }));
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);

    // The lazy attempt on first call is the single reconnect.
    let err = client
        .call("search_issuer", &json!({"name": "Apple"}))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ToolProcessUnavailable(_)));
    assert_eq!(client.status().await, ConnectionStatus::Dead);
}

#[tokio::test]
async fn descriptors_trigger_discovery_once() {
    let state = FakeState::new(2);
    let client = client(&state);

    let tools = client.descriptors().await;
    assert_eq!(tools.len(), 8);
    assert_eq!(client.connect().await.unwrap(), 8);
    assert_eq!(client.descriptors().await.len(), 8);
    assert_eq!(state.connects.load(Ordering::SeqCst), 1);
}

/// Answers the handshake over a tiny pipe, then never reads again.
struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let (client_side, server_side) = tokio::io::duplex(256);
        tokio::spawn(handshake_then_stall(server_side));
        let (read_half, write_half) = tokio::io::split(client_side);
        Ok(Connection::new(read_half, write_half))
    }

    fn describe(&self) -> String {
        "stalled-server".into()
    }
}

async fn handshake_then_stall(stream: DuplexStream) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: Value = serde_json::from_str(&line).expect("client wrote invalid JSON");
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        let result = match method.as_str() {
            "initialize" => json!({"protocolVersion": "2024-11-05", "capabilities": {}}),
            "tools/list" => json!({"tools": tool_list()[..1].to_vec()}),
            _ => continue,
        };
        let response = json!({"jsonrpc": "2.0", "id": msg["id"], "result": result});
        if write_half
            .write_all(format!("{response}\n").as_bytes())
            .await
            .is_err()
        {
            return;
        }
        if method == "tools/list" {
            break;
        }
    }

    // Keep both halves open without reading.
    let _hold = (lines, write_half);
    std::future::pending::<()>().await;
}

#[tokio::test]
async fn stalled_server_cannot_block_calls_past_the_timeout() {
    let client = ProtocolClient::new(
        StalledConnector,
        ClientOptions {
            invocation_timeout: Duration::from_millis(200),
            ..ClientOptions::default()
        },
    );
    assert_eq!(client.connect().await.unwrap(), 1);

    // Far larger than the pipe, so the write itself blocks.
    let big = json!({"name": "A".repeat(16 * 1024)});
    let small = json!({"name": "Apple"});

    let started = Instant::now();
    let (first, second) = tokio::time::timeout(Duration::from_secs(3), async {
        tokio::join!(client.call("search_issuer", &big), client.call("search_issuer", &small))
    })
    .await
    .expect("calls outlived their own timeout");
    assert!(started.elapsed() < Duration::from_secs(1));

    for result in [first, second] {
        assert_eq!(
            result.unwrap_err(),
            InvocationError::Timeout {
                tool_name: "search_issuer".into(),
                timeout_ms: 200
            }
        );
    }

    // The half-written frame leaves the connection unusable.
    assert_eq!(client.status().await, ConnectionStatus::Disconnected);
}
