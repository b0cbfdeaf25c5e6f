//! Integration tests for the instrumentation layer.

use db_tool_server::db::{PoolConfig, QueryExecutor, SqliteConnectionManager, SqlitePool};
use db_tool_server::error::{DbError, DbResult};
use db_tool_server::mcp::ToolRegistry;
use db_tool_server::observability::{
    Metrics, Observability, ObservabilityConfig, REDACTED, sanitize_params,
};
use db_tool_server::tools::{QueryValidator, ToolContext};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoInput {
    message: String,
    #[serde(default)]
    delay_ms: u64,
}

async fn echo(ctx: ToolContext, input: EchoInput) -> DbResult<JsonValue> {
    tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
    Ok(json!({
        "message": input.message,
        "has_correlation_id": ctx.correlation_id().is_some(),
    }))
}

async fn always_busy(_ctx: ToolContext, _input: EchoInput) -> DbResult<JsonValue> {
    Err(DbError::pool_exhausted(10))
}

fn context() -> (ToolContext, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("obs.db");
    let manager = SqliteConnectionManager::new(&path.to_string_lossy(), true).unwrap();
    let pool = SqlitePool::new(
        manager,
        PoolConfig {
            base_size: 1,
            max_overflow: 0,
            checkout_timeout: Duration::from_millis(200),
            max_age: Duration::from_secs(60),
        },
    );
    let ctx = ToolContext::new(
        pool,
        QueryValidator::default(),
        QueryExecutor::new(Duration::from_secs(5), 100),
    );
    (ctx, dir)
}

fn instrumented(metrics: Arc<Metrics>, slow_call_threshold: Duration) -> ToolRegistry {
    ToolRegistry::builder()
        .tool("echo", "Echo a message", echo)
        .tool("always_busy", "Fails with pool exhaustion", always_busy)
        .layer(Observability::new(
            metrics,
            ObservabilityConfig { slow_call_threshold },
        ))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_calls_are_counted_per_outcome() {
    let (ctx, _dir) = context();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = instrumented(Arc::clone(&metrics), Duration::from_secs(10));

    let echo = registry.get("echo").unwrap();
    let out = echo
        .call(ctx.clone(), json!({"message": "hi", "api_token": "s3cr3t"}))
        .await
        .unwrap();
    assert_eq!(out["message"], json!("hi"));
    assert_eq!(out["has_correlation_id"], json!(true));

    let err = registry
        .get("always_busy")
        .unwrap()
        .call(ctx.clone(), json!({"message": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted { .. }));

    let err = echo.call(ctx, json!({"wrong": 1})).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidParams { .. }));

    assert_eq!(metrics.requests("echo", "started"), 2);
    assert_eq!(metrics.requests("echo", "success"), 1);
    assert_eq!(metrics.requests("echo", "error"), 1);
    assert_eq!(metrics.errors("echo", "validation"), 1);
    assert_eq!(metrics.errors("always_busy", "pool_exhausted"), 1);
    assert_eq!(metrics.duration_samples("echo"), 2);
    assert_eq!(metrics.in_flight("echo"), 0);
    assert_eq!(metrics.slow_calls("echo"), 0);
}

#[tokio::test]
async fn test_slow_calls_counted_and_still_succeed() {
    let (ctx, _dir) = context();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = instrumented(Arc::clone(&metrics), Duration::from_millis(20));

    let out = registry
        .get("echo")
        .unwrap()
        .call(ctx, json!({"message": "slow", "delay_ms": 60}))
        .await
        .unwrap();
    assert_eq!(out["message"], json!("slow"));
    assert_eq!(metrics.slow_calls("echo"), 1);
    assert_eq!(metrics.requests("echo", "success"), 1);
}

#[tokio::test]
async fn test_collectors_are_isolated() {
    let (ctx, _dir) = context();
    let first = Arc::new(Metrics::new().unwrap());
    let second = Arc::new(Metrics::new().unwrap());
    let registry = instrumented(Arc::clone(&first), Duration::from_secs(10));

    registry
        .get("echo")
        .unwrap()
        .call(ctx, json!({"message": "a"}))
        .await
        .unwrap();

    assert_eq!(first.requests("echo", "success"), 1);
    assert_eq!(second.requests("echo", "success"), 0);
}

#[test]
fn test_redaction_example() {
    let params = json!({"token": "abc", "creator_id": "x"});
    assert_eq!(
        sanitize_params(&params),
        json!({"token": REDACTED, "creator_id": "x"})
    );
    // The caller's value is untouched.
    assert_eq!(params["token"], json!("abc"));

    let nested = json!({"filters": [{"Password": "p", "limit": 3}], "apiKey": 1});
    assert_eq!(
        sanitize_params(&nested),
        json!({"filters": [{"Password": REDACTED, "limit": 3}], "apiKey": REDACTED})
    );
}
