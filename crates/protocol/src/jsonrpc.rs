//! JSON-RPC 2.0 wire types for the tool-server dialect.
//!
//! One message per line. Outbound traffic is always [`Request`] or
//! [`Notification`]; inbound lines are sorted by [`classify`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;

/// Code reported for tool results flagged with `isError`.
pub const TOOL_ERROR: i64 = -32000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

/// A response, as written by us when refusing a server-initiated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound line, sorted by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// The server asking us something.
    Request { id: Value, method: String },
    /// Not a JSON-RPC message (e.g. stray print output).
    Invalid(String),
}

pub fn classify(line: &str) -> Inbound {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Inbound::Invalid(format!("not JSON: {e}")),
    };
    let Some(obj) = value.as_object() else {
        return Inbound::Invalid("not a JSON object".into());
    };

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        return match obj.get("id") {
            Some(id) if !id.is_null() => Inbound::Request {
                id: id.clone(),
                method,
            },
            _ => Inbound::Notification {
                method,
                params: obj.get("params").cloned(),
            },
        };
    }

    let Some(id) = obj.get("id").and_then(Value::as_u64) else {
        return Inbound::Invalid("response without a numeric id".into());
    };

    if let Some(error) = obj.get("error") {
        let outcome = match serde_json::from_value::<RpcError>(error.clone()) {
            Ok(err) => Err(err),
            Err(e) => Err(RpcError {
                code: TOOL_ERROR,
                message: format!("malformed error object: {e}"),
                data: Some(error.clone()),
            }),
        };
        return Inbound::Response { id, outcome };
    }

    match obj.get("result") {
        Some(result) => Inbound::Response {
            id,
            outcome: Ok(result.clone()),
        },
        None => Inbound::Invalid("response carries neither result nor error".into()),
    }
}

// --- Method payloads ---

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text items joined by newlines. Non-text items are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                Content::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let req = Request::new(7, "tools/call", Some(json!({"name": "search_issuer"})));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""id":7"#));
        assert!(json.contains(r#""method":"tools/call""#));
    }

    #[test]
    fn notification_has_no_id() {
        let json = serde_json::to_string(&Notification::new("notifications/initialized", None)).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn classify_result_response() {
        let inbound = classify(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#);
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            }
        );
    }

    #[test]
    fn classify_error_response() {
        let inbound =
            classify(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32602,"message":"bad params"}}"#);
        match inbound {
            Inbound::Response { id, outcome: Err(e) } => {
                assert_eq!(id, 4);
                assert_eq!(e.code, -32602);
                assert_eq!(e.message, "bad params");
            }
            other => panic!("Wrong classification: {other:?}"),
        }
    }

    #[test]
    fn classify_server_traffic() {
        assert!(matches!(
            classify(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#),
            Inbound::Notification { .. }
        ));
        assert!(matches!(
            classify(r#"{"jsonrpc":"2.0","id":"srv-1","method":"sampling/createMessage"}"#),
            Inbound::Request { .. }
        ));
    }

    #[test]
    fn classify_garbage() {
        assert!(matches!(classify("Starting server..."), Inbound::Invalid(_)));
        assert!(matches!(classify("[1,2]"), Inbound::Invalid(_)));
        assert!(matches!(classify(r#"{"jsonrpc":"2.0","id":1}"#), Inbound::Invalid(_)));
    }

    #[test]
    fn call_result_joins_text_items() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Issuer: Apple Inc."},
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "LEI: HWUPKR0MPOU8FGXBT394"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.text(), "Issuer: Apple Inc.\nLEI: HWUPKR0MPOU8FGXBT394");
        assert!(!result.is_error);
    }

    #[test]
    fn tools_list_parsing() {
        let result: ToolsListResult = serde_json::from_value(json!({
            "tools": [
                {"name": "get_bond_rating", "inputSchema": {"type": "object"}},
                {"name": "search_issuer", "description": "Search issuers by name"}
            ]
        }))
        .unwrap();
        assert_eq!(result.tools.len(), 2);
        assert!(result.tools[0].description.is_none());
        assert!(result.tools[1].input_schema.is_null());
        assert!(result.next_cursor.is_none());
    }
}
