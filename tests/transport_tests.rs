use mcp_manager::transport::{JsonRpcRequest, JsonRpcResponse, TransportMode};
use serde_json::json;

#[test]
fn test_ping_request_serialization() {
    let request = JsonRpcRequest::new(7u64, "ping", None);

    let json = serde_json::to_string(&request).unwrap();

    assert_eq!(json, r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#);
}

#[test]
fn test_ping_ids_are_unique() {
    let first = JsonRpcRequest::ping();
    let second = JsonRpcRequest::ping();

    assert_eq!(first.method, "ping");
    assert_ne!(first.id, second.id);
}

#[test]
fn test_response_answers_matching_request() {
    let request = JsonRpcRequest::new("abc", "ping", None);

    let response: JsonRpcResponse =
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": "abc", "result": {}})).unwrap();
    assert!(response.answers(&request));
    assert!(response.is_success());

    let error: JsonRpcResponse = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": "other",
        "error": {"code": -32601, "message": "Method not found"}
    }))
    .unwrap();
    assert!(!error.answers(&request));
    assert!(!error.is_success());
    assert_eq!(
        error.error.map(|e| e.to_string()).as_deref(),
        Some("JSON-RPC error -32601: Method not found")
    );
}

#[test]
fn test_transport_mode_parsing() {
    assert_eq!("stdio".parse::<TransportMode>().unwrap(), TransportMode::Stdio);
    assert_eq!("Network".parse::<TransportMode>().unwrap(), TransportMode::Network);
    assert_eq!("http".parse::<TransportMode>().unwrap(), TransportMode::Network);
    assert!("pigeon".parse::<TransportMode>().is_err());

    assert_eq!(serde_json::to_string(&TransportMode::Network).unwrap(), r#""network""#);
    assert_eq!(TransportMode::default(), TransportMode::Stdio);
}

#[test]
fn test_response_into_result() {
    let ok: JsonRpcResponse =
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"pong": true}})).unwrap();
    assert_eq!(ok.into_result().unwrap(), json!({"pong": true}));

    let failed: JsonRpcResponse = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {"code": -32700, "message": "Parse error"}
    }))
    .unwrap();
    assert!(failed.id.is_none());
    assert_eq!(failed.into_result().unwrap_err().code, -32700);
}

#[test]
fn test_transport_aliases_load_from_documents() {
    let config: mcp_manager::ServerConfig = serde_json::from_value(json!({
        "name": "web",
        "transport": "http",
        "port": 9000,
        "command": "node",
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z"
    }))
    .unwrap();
    assert_eq!(config.transport, TransportMode::Network);

    let sse: TransportMode = serde_json::from_str(r#""sse""#).unwrap();
    assert_eq!(sse, TransportMode::Network);
    assert_eq!(serde_json::to_string(&sse).unwrap(), r#""network""#);
}
