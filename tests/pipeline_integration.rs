mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::json;
use tempfile::TempDir;
use vaultnav::error::{NavError, RpcErrorKind};
use vaultnav::models::UnresolvedPricePolicy;
use vaultnav::pipeline::Stage;
use vaultnav::storage::{FailingDocumentSink, MemoryDocumentSink, RECORDS_DIR};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

use support::*;

struct Servers {
    debank: MockServer,
    coingecko: MockServer,
    rpc: MockServer,
}

async fn scenario_servers() -> Servers {
    let servers = Servers {
        debank: MockServer::start().await,
        coingecko: MockServer::start().await,
        rpc: MockServer::start().await,
    };
    mount_holdings(
        &servers.debank,
        "base",
        scenario_tokens(),
        scenario_protocols(),
    )
    .await;
    mount_reference_price(&servers.coingecko, "usd-coin", 1.0).await;
    mount_supply(&servers.rpc, 0x1b4, 2_000_000_000, 6).await;
    servers
}

#[tokio::test]
async fn full_run_values_vault_at_one() -> Result<()> {
    let servers = scenario_servers().await;
    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    let summary = pipeline.run_with_id("run-1").await?;
    let record = &summary.record;

    assert_eq!(record.total_value_reference_asset, Decimal::from(2000));
    assert_eq!(record.total_value_usd, Decimal::from(2000));
    assert_eq!(record.nav_per_share, Decimal::ONE);
    assert_eq!(record.reference_asset_ticker, "USDC");
    assert_eq!(record.total_supply, "2000000000");
    assert_eq!(record.supply_block, 0x1b4);
    assert!(record.is_complete());

    let keys: Vec<&str> = record
        .raw_breakdown
        .positions
        .iter()
        .map(|p| p.key.as_str())
        .collect();
    assert_eq!(keys, vec!["aerodrome.base.USDC-USDT", "spot.base"]);

    assert!(summary.outcome.is_complete());
    assert!(pipeline.artifacts().snapshot_file().exists());
    assert!(pipeline.artifacts().supply_file().exists());
    assert!(pipeline.artifacts().record_file().exists());
    assert!(dir.path().join(RECORDS_DIR).join("run-1.json").exists());

    let stored = sink.records();
    assert_eq!(stored.len(), 1);
    assert_eq!(&stored[0], record);

    Ok(())
}

#[tokio::test]
async fn repeated_runs_are_deterministic() -> Result<()> {
    let servers = scenario_servers().await;
    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    let first = pipeline.run_with_id("same").await?.record;
    let second = pipeline.run_with_id("same").await?.record;

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first)?,
        serde_json::to_string(&second)?
    );
    assert_eq!(sink.records().len(), 2);

    Ok(())
}

#[tokio::test]
async fn rpc_timeout_fails_supply_stage_and_publishes_nothing() -> Result<()> {
    let servers = Servers {
        debank: MockServer::start().await,
        coingecko: MockServer::start().await,
        rpc: MockServer::start().await,
    };
    mount_holdings(&servers.debank, "base", scenario_tokens(), json!([])).await;
    mount_reference_price(&servers.coingecko, "usd-coin", 1.0).await;
    Mock::given(method("POST"))
        .respond_with(rpc_result("0x10").set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&servers.rpc)
        .await;

    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    let err = pipeline.run_with_id("run-timeout").await.unwrap_err();
    assert_eq!(err.stage, Stage::Supply);
    assert!(matches!(
        err.source,
        NavError::Rpc(RpcErrorKind::Unreachable(_))
    ));

    assert!(pipeline.artifacts().snapshot_file().exists());
    assert!(!pipeline.artifacts().supply_file().exists());
    assert!(!pipeline.artifacts().record_file().exists());
    assert!(sink.records().is_empty());

    Ok(())
}

fn unpriced_tokens() -> serde_json::Value {
    json!([
        {"id": USDC_BASE, "chain": "base", "symbol": "USDC", "price": 1.0, "amount": 1000.0},
        {"id": "mystery", "chain": "base", "symbol": "MYST", "amount": 42.0}
    ])
}

#[tokio::test]
async fn unresolved_price_aborts_compute_by_default() -> Result<()> {
    let servers = scenario_servers().await;
    let debank = MockServer::start().await;
    mount_holdings(&debank, "base", unpriced_tokens(), json!([])).await;

    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let config = test_config(&debank, &servers.coingecko)?;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    let err = pipeline.run_with_id("run-abort").await.unwrap_err();
    assert_eq!(err.stage, Stage::Compute);
    match err.source {
        NavError::IncompleteValuation { legs } => {
            assert_eq!(legs, vec!["spot.base.MYST".to_string()]);
        }
        other => panic!("expected incomplete valuation, got {other:?}"),
    }
    assert!(!pipeline.artifacts().record_file().exists());
    assert!(sink.records().is_empty());

    Ok(())
}

#[tokio::test]
async fn omit_policy_records_the_gap() -> Result<()> {
    let servers = scenario_servers().await;
    let debank = MockServer::start().await;
    mount_holdings(&debank, "base", unpriced_tokens(), json!([])).await;

    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let mut config = test_config(&debank, &servers.coingecko)?;
    config.valuation.unresolved_price = UnresolvedPricePolicy::Omit;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    let record = pipeline.run_with_id("run-omit").await?.record;
    assert!(!record.is_complete());
    assert_eq!(record.raw_breakdown.omissions.len(), 1);
    assert_eq!(record.raw_breakdown.omissions[0].symbol, "MYST");
    assert_eq!(record.total_value_reference_asset, Decimal::from(1000));
    assert_eq!(record.valuation_policy, UnresolvedPricePolicy::Omit);
    assert_eq!(sink.records().len(), 1);

    Ok(())
}

#[tokio::test]
async fn offline_document_store_keeps_local_record() -> Result<()> {
    let servers = scenario_servers().await;
    let dir = TempDir::new()?;
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(
        config,
        dir.path(),
        &servers.rpc,
        Arc::new(FailingDocumentSink),
    )?;

    let summary = pipeline.run_with_id("run-offline").await?;
    assert!(!summary.outcome.is_complete());
    assert!(summary.outcome.document_id.is_none());
    assert!(summary.outcome.remote_error.is_some());

    let saved = pipeline.artifacts().load_record().await?;
    assert_eq!(saved, summary.record);

    Ok(())
}

#[tokio::test]
async fn stages_rerun_from_saved_artifacts() -> Result<()> {
    let servers = scenario_servers().await;
    let dir = TempDir::new()?;
    let sink = Arc::new(MemoryDocumentSink::new());
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(config, dir.path(), &servers.rpc, sink.clone())?;

    pipeline.fetch().await?;
    pipeline.supply().await?;
    let computed = pipeline.compute_saved("run-staged").await?;
    assert!(pipeline.artifacts().record_file().exists());
    assert!(sink.records().is_empty());

    let (published, outcome) = pipeline.publish_saved().await?;
    assert_eq!(published, computed);
    assert!(outcome.is_complete());
    assert_eq!(sink.records().len(), 1);

    Ok(())
}

#[tokio::test]
async fn compute_without_artifacts_names_missing_file() -> Result<()> {
    let servers = scenario_servers().await;
    let dir = TempDir::new()?;
    let config = test_config(&servers.debank, &servers.coingecko)?;
    let pipeline = test_pipeline(
        config,
        dir.path(),
        &servers.rpc,
        Arc::new(MemoryDocumentSink::new()),
    )?;

    let err = pipeline.compute_saved("run-empty").await.unwrap_err();
    assert_eq!(err.stage, Stage::Compute);
    assert!(matches!(err.source, NavError::Artifact { .. }));

    Ok(())
}
