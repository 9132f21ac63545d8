//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Retries live in [`crate::fetcher::LogFetcher`]; this client only maps
//! transport and provider failures onto [`IndexerError`] so the fetcher can
//! tell transient errors from fatal ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use govindex_core::error::IndexerError;
use govindex_core::types::{to_hex_quantity, LogFilter, RawLog};

use crate::fetcher::EvmRpcClient;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

enum CallError {
    Transport(IndexerError),
    Provider(JsonRpcError),
}

/// HTTP JSON-RPC client for a single endpoint.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Client with a 30 s request timeout.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, Duration::from_secs(30))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| CallError::Transport(self.transport_error(e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Transport(IndexerError::RateLimited(body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Transport(IndexerError::Rpc(format!(
                "HTTP {}: {body}",
                status.as_u16()
            ))));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Transport(self.transport_error(e)))?;
        if let Some(err) = body.error {
            return Err(CallError::Provider(err));
        }
        debug!(method, url = %self.url, "rpc call succeeded");
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn transport_error(&self, e: reqwest::Error) -> IndexerError {
        if e.is_timeout() {
            IndexerError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            IndexerError::Rpc(e.to_string())
        }
    }
}

/// Map a provider error object onto the indexer's error taxonomy.
fn classify(err: JsonRpcError, range: Option<(u64, u64)>) -> IndexerError {
    let message = err.message.to_ascii_lowercase();
    if message.contains("rate limit") || message.contains("too many requests") {
        return IndexerError::RateLimited(err.to_string());
    }
    if let Some((from, to)) = range {
        let rejects_range = ["more than", "too large", "too many", "block range", "response size", "exceed"]
            .iter()
            .any(|needle| message.contains(needle));
        if rejects_range {
            return IndexerError::RangeTooLarge {
                from,
                to,
                reason: err.message,
            };
        }
    }
    IndexerError::Other(err.to_string())
}

fn parse_quantity(value: &Value) -> Result<u64, IndexerError> {
    let raw = value
        .as_str()
        .ok_or_else(|| IndexerError::Rpc(format!("expected hex quantity, got {value}")))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Rpc(format!("malformed quantity {raw:?}: {e}")))
}

fn get_logs_params(filter: &LogFilter, from: u64, to: u64) -> Value {
    json!({
        "address": filter.address,
        "topics": filter.topics,
        "fromBlock": to_hex_quantity(from),
        "toBlock": to_hex_quantity(to),
    })
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        match self.call("eth_blockNumber", vec![]).await {
            Ok(value) => parse_quantity(&value),
            Err(CallError::Transport(e)) => Err(e),
            Err(CallError::Provider(e)) => Err(classify(e, None)),
        }
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let params = vec![get_logs_params(filter, from, to)];
        match self.call("eth_getLogs", params).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(CallError::Transport(e)) => Err(e),
            Err(CallError::Provider(e)) => Err(classify(e, Some((from, to)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i64, message: &str) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.into(),
        }
    }

    #[test]
    fn range_rejections_are_classified() {
        let err = classify(
            rpc_error(-32005, "query returned more than 10000 results"),
            Some((1, 5_000)),
        );
        assert!(matches!(err, IndexerError::RangeTooLarge { from: 1, to: 5_000, .. }));

        let err = classify(rpc_error(-32600, "block range is too large"), Some((1, 2)));
        assert!(matches!(err, IndexerError::RangeTooLarge { .. }));
    }

    #[test]
    fn rate_limit_and_other_errors() {
        let err = classify(rpc_error(-32005, "Rate limit exceeded"), Some((1, 2)));
        assert!(err.is_retryable());

        let err = classify(rpc_error(-32602, "invalid argument 0"), Some((1, 2)));
        assert!(matches!(err, IndexerError::Other(_)));
        assert!(!err.is_retryable());

        // Without a range, a range-like message is just an error.
        let err = classify(rpc_error(-1, "too large"), None);
        assert!(matches!(err, IndexerError::Other(_)));
    }

    #[test]
    fn get_logs_params_shape() {
        let filter = LogFilter::address("0xabc").topic0(vec!["0x01".to_string()]);
        assert_eq!(
            get_logs_params(&filter, 10, 255),
            json!({
                "address": "0xabc",
                "topics": [["0x01"]],
                "fromBlock": "0xa",
                "toBlock": "0xff",
            })
        );
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity(&json!("0xce8a2a")).unwrap(), 0xce8a2a);
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "eth_blockNumber",
            params: vec![],
            id: 1,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
    }
}
