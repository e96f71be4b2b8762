//! Mock JSON-RPC node for integration testing
//!
//! Provides a wiremock-based server that answers individual Ethereum RPC
//! methods, echoing the request id the way a real node does.

use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, MockServer, Request, ResponseTemplate,
};

/// Mock ledger RPC endpoint
pub struct MockRpcNode {
    server: MockServer,
}

impl MockRpcNode {
    /// Start a new mock node
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the server URL
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Answer `rpc_method` with `result`
    pub async fn respond(&self, rpc_method: &str, result: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(move |req: &Request| {
                ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": request_id(req),
                    "result": result.clone(),
                }))
            })
            .mount(&self.server)
            .await;
    }

    /// Answer `rpc_method` with a JSON-RPC error object
    pub async fn respond_error(&self, rpc_method: &str, code: i64, message: &str) {
        let message = message.to_string();
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(move |req: &Request| {
                ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": request_id(req),
                    "error": { "code": code, "message": message.clone(), "data": "0x" },
                }))
            })
            .mount(&self.server)
            .await;
    }

    /// Fail every request with an HTTP status
    pub async fn respond_status(&self, status: u16) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Standard handshake for a chain with id 1337
    pub async fn setup_handshake(&self) {
        self.respond("eth_chainId", json!("0x539")).await;
    }
}

fn request_id(req: &Request) -> Value {
    serde_json::from_slice::<Value>(&req.body)
        .ok()
        .and_then(|body| body.get("id").cloned())
        .unwrap_or(Value::from(0))
}
