//! Minimal Ethereum JSON-RPC over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{NavError, RpcErrorKind};
use crate::models::EvmAddress;

/// Returned by nodes (Infura, Alchemy) when the caller is over its request budget.
const LIMIT_EXCEEDED: i64 = -32005;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NavError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NavError::config(format!("failed to build RPC HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, NavError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NavError::Rpc(RpcErrorKind::Unreachable(e.to_string())))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NavError::Rpc(RpcErrorKind::Unreachable(format!(
                "{method}: HTTP {status}"
            ))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NavError::Rpc(RpcErrorKind::Malformed(format!(
                "{method}: HTTP {status}: {body}"
            ))));
        }

        let body: Response = response
            .json()
            .await
            .map_err(|e| NavError::Rpc(RpcErrorKind::Malformed(format!("{method}: {e}"))))?;

        if let Some(error) = body.error {
            let message = format!("{method}: {} (code {})", error.message, error.code);
            return Err(NavError::Rpc(if error.code == LIMIT_EXCEEDED {
                RpcErrorKind::Unreachable(message)
            } else {
                RpcErrorKind::Reverted(message)
            }));
        }

        body.result
            .filter(|v| !v.is_null())
            .ok_or_else(|| NavError::Rpc(RpcErrorKind::Malformed(format!("{method}: no result"))))
    }

    pub async fn block_number(&self) -> Result<u64, NavError> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let hex = as_hex_str(&value, "eth_blockNumber")?;
        parse_quantity(hex)
    }

    /// `eth_call` at a fixed block; returns the raw `0x`-prefixed return data.
    pub async fn eth_call(
        &self,
        to: &EvmAddress,
        data: &str,
        block: u64,
    ) -> Result<String, NavError> {
        let value = self
            .call(
                "eth_call",
                json!([{ "to": to.as_str(), "data": data }, format!("{block:#x}")]),
            )
            .await?;
        Ok(as_hex_str(&value, "eth_call")?.to_string())
    }
}

fn as_hex_str<'a>(value: &'a Value, method: &str) -> Result<&'a str, NavError> {
    value.as_str().ok_or_else(|| {
        NavError::Rpc(RpcErrorKind::Malformed(format!(
            "{method}: expected hex string, got {value}"
        )))
    })
}

fn strip_hex_prefix(hex: &str) -> Result<&str, NavError> {
    hex.strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .ok_or_else(|| NavError::Rpc(RpcErrorKind::Malformed(format!("missing 0x prefix: {hex}"))))
}

/// Parses a JSON-RPC quantity such as `0x1b4`.
pub(crate) fn parse_quantity(hex: &str) -> Result<u64, NavError> {
    let digits = strip_hex_prefix(hex)?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| NavError::Rpc(RpcErrorKind::Malformed(format!("bad quantity {hex}: {e}"))))
}

/// Decodes one ABI-encoded `uint256` return word.
///
/// `Ok(None)` means empty return data: the contract has no such function.
pub(crate) fn decode_uint_word(hex: &str) -> Result<Option<u128>, NavError> {
    let digits = strip_hex_prefix(hex)?;
    if digits.is_empty() {
        return Ok(None);
    }
    if digits.len() != 64 {
        return Err(NavError::Rpc(RpcErrorKind::Malformed(format!(
            "expected a 32-byte word, got {} hex digits",
            digits.len()
        ))));
    }
    let (high, low) = digits.split_at(32);
    if !high.chars().all(|c| c == '0') {
        return Err(NavError::Rpc(RpcErrorKind::Malformed(format!(
            "value {hex} exceeds 128 bits"
        ))));
    }
    u128::from_str_radix(low, 16)
        .map(Some)
        .map_err(|e| NavError::Rpc(RpcErrorKind::Malformed(format!("bad word {hex}: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn uint_words() {
        let six = format!("0x{:064x}", 6);
        assert_eq!(decode_uint_word(&six).unwrap(), Some(6));

        let supply = format!("0x{:064x}", 2_000_000_000u128);
        assert_eq!(decode_uint_word(&supply).unwrap(), Some(2_000_000_000));

        assert_eq!(decode_uint_word("0x").unwrap(), None);
    }

    #[test]
    fn oversized_or_short_words_are_malformed() {
        let huge = format!("0x1{}", "0".repeat(63));
        assert!(matches!(
            decode_uint_word(&huge),
            Err(NavError::Rpc(RpcErrorKind::Malformed(_)))
        ));
        assert!(decode_uint_word("0x06").is_err());
    }
}
