//! Tool gateway scenarios: rate limits, the denial breaker, and the
//! no-token guarantee across the tool surface.

use std::sync::Arc;

use rust_decimal_macros::dec;

use tradegate::broker::MockBroker;
use tradegate::config::Settings;
use tradegate::core::Core;

fn make_core(dir: &tempfile::TempDir, mutate: impl FnOnce(&mut Settings)) -> Arc<Core> {
    let mut settings = Settings {
        data_dir: dir.path().to_path_buf(),
        risk_policy_path: dir.path().join("absent-policy.yml"),
        ..Settings::default()
    };
    mutate(&mut settings);
    let broker = Arc::new(MockBroker::new(42));
    broker.set_quote("AAPL", dec!(190.28), dec!(190.47));
    Core::with_broker(settings, broker).expect("core builds")
}

fn account_params() -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({"account_id": "DU123456"})
        .as_object()
        .cloned()
        .expect("object")
}

/// Scenario 5: the 61st call in a minute fails with a rate-limit reason;
/// continued denials open the breaker, and during the cooldown every call
/// is rejected with BREAKER_OPEN regardless of budget.
#[tokio::test]
async fn rate_limit_then_breaker_takes_over() {
    let dir = tempfile::tempdir().expect("tempdir");
    let core = make_core(&dir, |settings| {
        // Session and global budgets stay out of the way.
        settings.rate_limit_per_session = 10_000;
        settings.rate_limit_global = 100_000;
    });

    for call in 0..60 {
        core.run_tool("get_portfolio", "session-1", account_params(), "corr-rl")
            .await
            .unwrap_or_else(|e| panic!("call {call} should pass: {e}"));
    }

    let err = core
        .run_tool("get_portfolio", "session-1", account_params(), "corr-rl")
        .await
        .expect_err("call 61 must be rate limited");
    assert_eq!(err.code(), "RATE_LIMITED");
    assert!(err.message().contains("tool:get_portfolio"));

    // Keep driving denials until the breaker trips (100 consecutive).
    let mut breaker_open = false;
    for _ in 0..100 {
        let err = core
            .run_tool("get_portfolio", "session-1", account_params(), "corr-rl")
            .await
            .expect_err("still denied");
        if err.code() == "BREAKER_OPEN" {
            breaker_open = true;
            break;
        }
        assert_eq!(err.code(), "RATE_LIMITED");
    }
    assert!(breaker_open, "breaker should have opened");

    // A different session and tool with plenty of budget is still rejected.
    let err = core
        .run_tool(
            "get_market_snapshot",
            "session-2",
            serde_json::json!({"symbol": "AAPL"})
                .as_object()
                .cloned()
                .expect("object"),
            "corr-rl",
        )
        .await
        .expect_err("rejected during cooldown");
    assert_eq!(err.code(), "BREAKER_OPEN");
}

/// The gateway denies tools that could yield a token or touch broker
/// writes, and unknown parameters never reach dispatch.
#[tokio::test]
async fn gateway_surface_is_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let core = make_core(&dir, |_| {});

    for forbidden in ["submit_order", "grant_approval", "consume_token", "cancel_order"] {
        let err = core
            .run_tool(forbidden, "session-1", serde_json::Map::new(), "corr-x")
            .await
            .expect_err("must be denied");
        assert_eq!(err.code(), "TOOL_DENIED", "tool {forbidden} leaked through");
    }

    let mut params = account_params();
    params.insert("token_id".to_string(), serde_json::json!("t-1"));
    let err = core
        .run_tool("get_portfolio", "session-1", params, "corr-x")
        .await
        .expect_err("unknown parameter must be rejected");
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

/// Session budgets on gated-write tools are independent of rate limits.
#[tokio::test]
async fn write_tool_session_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let core = make_core(&dir, |settings| {
        settings.rate_limit_per_tool = 10_000;
        settings.rate_limit_per_session = 10_000;
        settings.rate_limit_global = 100_000;
    });

    let params = serde_json::json!({
        "broker_order_id": "MOCK000001",
        "reason": "cancel the resting limit order",
    })
    .as_object()
    .cloned()
    .expect("object");

    // The default policy budget for gated writes is 50 per session.
    for call in 0..50 {
        core.run_tool("request_order_cancel", "s-budget", params.clone(), "corr-b")
            .await
            .unwrap_or_else(|e| panic!("call {call} should pass: {e}"));
    }
    let err = core
        .run_tool("request_order_cancel", "s-budget", params.clone(), "corr-b")
        .await
        .expect_err("budget exhausted");
    assert_eq!(err.code(), "TOOL_DENIED");
    assert!(err.message().contains("budget"));

    // A fresh session is unaffected.
    core.run_tool("request_order_cancel", "s-other", params, "corr-b")
        .await
        .expect("fresh session passes");
}
