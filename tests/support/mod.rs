#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use vaultnav::chain::VaultSupplyReader;
use vaultnav::clock::FixedClock;
use vaultnav::config::Config;
use vaultnav::debank::DebankClient;
use vaultnav::pipeline::{Clients, Pipeline};
use vaultnav::pricing::CoinGeckoClient;
use vaultnav::retry::RetryPolicy;
use vaultnav::storage::DocumentSink;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const VAULT: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";
pub const USDC_BASE: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
pub const USDT_BASE: &str = "0xfde4c96c8593536e31f229ea8f37b2ada2699bb2";
pub const ACCESS_KEY: &str = "test-access-key";

pub const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";
pub const DECIMALS_SELECTOR: &str = "0x313ce567";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ))
}

/// ABI word for a uint256 return value.
pub fn word(value: u128) -> String {
    format!("0x{value:064x}")
}

pub fn rpc_result(result: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

pub fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": code, "message": message}
    }))
}

/// Matches a JSON-RPC request by method and, for `eth_call`, by calldata.
pub struct RpcMethod {
    pub method: &'static str,
    pub data: Option<&'static str>,
}

pub fn rpc_method(method: &'static str) -> RpcMethod {
    RpcMethod { method, data: None }
}

pub fn rpc_call(data: &'static str) -> RpcMethod {
    RpcMethod {
        method: "eth_call",
        data: Some(data),
    }
}

impl Match for RpcMethod {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return false;
        };
        if body["method"] != self.method {
            return false;
        }
        match self.data {
            Some(data) => body["params"][0]["data"] == data,
            None => true,
        }
    }
}

pub async fn mount_supply(server: &MockServer, block: u64, total_supply: u128, decimals: u8) {
    Mock::given(method("POST"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(rpc_result(&format!("{block:#x}")))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_call(TOTAL_SUPPLY_SELECTOR))
        .respond_with(rpc_result(&word(total_supply)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(rpc_call(DECIMALS_SELECTOR))
        .respond_with(rpc_result(&word(u128::from(decimals))))
        .mount(server)
        .await;
}

pub fn simple_price_body(coin_id: &str, usd: f64) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(coin_id.to_string(), json!({"usd": usd}));
    Value::Object(body)
}

pub async fn mount_reference_price(server: &MockServer, coin_id: &str, usd: f64) {
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", coin_id))
        .respond_with(ResponseTemplate::new(200).set_body_json(simple_price_body(coin_id, usd)))
        .mount(server)
        .await;
}

pub async fn mount_holdings(server: &MockServer, chain: &str, tokens: Value, protocols: Value) {
    Mock::given(method("GET"))
        .and(path("/v1/user/token_list"))
        .and(query_param("chain_id", chain))
        .respond_with(ResponseTemplate::new(200).set_body_json(tokens))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/user/complex_protocol_list"))
        .and(query_param("chain_id", chain))
        .respond_with(ResponseTemplate::new(200).set_body_json(protocols))
        .mount(server)
        .await;
}

/// 1000 USDC in the wallet plus a USDC/USDT pool holding 500 of each.
pub fn scenario_tokens() -> Value {
    json!([
        {"id": USDC_BASE, "chain": "base", "symbol": "USDC", "price": 1.0, "amount": 1000.0}
    ])
}

pub fn scenario_protocols() -> Value {
    json!([
        {
            "id": "aerodrome",
            "chain": "base",
            "name": "Aerodrome",
            "portfolio_item_list": [
                {
                    "name": "Liquidity Pool",
                    "stats": {"net_usd_value": 1000.0},
                    "pool": {"id": "0xpool"},
                    "detail": {
                        "supply_token_list": [
                            {"id": USDC_BASE, "chain": "base", "symbol": "USDC", "price": 1.0, "amount": 500.0},
                            {"id": USDT_BASE, "chain": "base", "symbol": "USDT", "price": 1.0, "amount": 500.0}
                        ]
                    }
                }
            ]
        }
    ])
}

pub fn test_config(debank: &MockServer, coingecko: &MockServer) -> Result<Config> {
    let payload = json!({
        "wallet_address": WALLET,
        "vault_address": VAULT,
        "chain_id": "base",
        "chains": ["base"],
        "database_name": "nav",
        "asset": {
            "ticker": "USDC",
            "coingecko_id": "usd-coin",
            "token_addresses": {"base": USDC_BASE}
        },
        "retry": {"max_attempts": 3, "initial_backoff": "1ms"},
        "http": {"timeout": "200ms"},
        "endpoints": {"debank": debank.uri(), "coingecko": coingecko.uri()}
    });
    Config::from_payload(&payload.to_string())
}

pub fn test_pipeline(
    config: Config,
    data_dir: &Path,
    rpc: &MockServer,
    sink: Arc<dyn DocumentSink>,
) -> Result<Pipeline> {
    let timeout = config.http.timeout;
    let balances = DebankClient::new(SecretString::from(ACCESS_KEY), timeout)?
        .with_base_url(&config.endpoints.debank)
        .with_retry(fast_retry());
    let supply = VaultSupplyReader::new(rpc.uri(), &config.chain_id, timeout)?
        .with_retry(fast_retry());
    let prices = CoinGeckoClient::new(timeout)?
        .with_base_url(&config.endpoints.coingecko)
        .with_retry(fast_retry());

    let clients = Clients {
        balances: Arc::new(balances),
        supply: Arc::new(supply),
        prices: Arc::new(prices),
        sink,
    };
    Ok(Pipeline::new(config, data_dir, clients, fixed_clock()))
}
