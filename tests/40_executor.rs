mod common;

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Map, Value};

use common::{test_config, Harness, Script, ADMIN, ANALYST, VIEWER};
use sqlgate::database::QueryRows;
use sqlgate::QueryError;

#[tokio::test]
async fn viewer_sees_filtered_rows_and_granted_columns() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", Some(&["id", "status"]), Some("region = 'west'"))
        .await;

    let result = h
        .services
        .executor
        .execute("SELECT id, status, region FROM orders", VIEWER, None, true)
        .await?;

    let executed = h.backend.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains("WHERE (region = 'west')"), "{}", executed[0]);
    assert!(result.query_text.contains("WHERE (region = 'west')"));

    assert_eq!(result.columns, vec!["id", "status"]);
    assert_eq!(result.row_count, 2);
    for row in &result.rows {
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "status"]);
    }
    assert!(!result.cached);
    Ok(())
}

#[tokio::test]
async fn existing_filter_is_kept_alongside_row_filter() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", None, Some("region = 'west'")).await;

    h.services
        .executor
        .execute("SELECT * FROM orders WHERE status = 'open' ORDER BY id", VIEWER, None, false)
        .await?;
    assert_eq!(
        h.backend.executed()[0],
        "SELECT * FROM orders WHERE (status = 'open') AND (region = 'west') ORDER BY id LIMIT 1000"
    );
    Ok(())
}

#[tokio::test]
async fn second_identical_call_is_served_from_cache() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;

    let mut params = Map::new();
    params.insert("status".to_string(), json!("open"));

    let sql = "SELECT * FROM orders WHERE status = :status";
    let first = h.services.executor.execute(sql, ANALYST, Some(params.clone()), true).await?;
    let second = h.services.executor.execute(sql, ANALYST, Some(params), true).await?;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.execution_time_ms, 0.0);
    assert_eq!(first.rows, second.rows);
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.backend.executed_params()[0], vec![json!("open")]);

    // Both invocations are audited as successes
    let records = h.audit.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].entry.execution_time_ms, 0.0);
    Ok(())
}

#[tokio::test]
async fn cache_disallowed_always_executes() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;

    for _ in 0..3 {
        let result = h.services.executor.execute("SELECT * FROM orders", ANALYST, None, false).await?;
        assert!(!result.cached);
    }
    assert_eq!(h.backend.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn empty_results_are_not_cached() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "refunds", None, None).await;
    h.backend.script(
        "refunds",
        Script::Rows(QueryRows {
            columns: vec!["id".to_string()],
            rows: Vec::new(),
        }),
    );

    let first = h.services.executor.execute("SELECT id FROM refunds", ANALYST, None, true).await?;
    let second = h.services.executor.execute("SELECT id FROM refunds", ANALYST, None, true).await?;
    assert_eq!(first.row_count, 0);
    assert_eq!(first.columns, vec!["id"]);
    assert!(!second.cached);
    assert_eq!(h.backend.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cached_rows_are_trimmed_per_caller() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;
    h.seed_grant(VIEWER, "orders", Some(&["id"]), None).await;

    let full = h.services.executor.execute("SELECT * FROM orders", ANALYST, None, true).await?;
    let trimmed = h.services.executor.execute("SELECT * FROM orders", VIEWER, None, true).await?;

    assert_eq!(full.columns, vec!["id", "status", "region"]);
    assert!(trimmed.cached);
    assert_eq!(trimmed.columns, vec!["id"]);
    Ok(())
}

#[tokio::test]
async fn validation_failures_never_reach_the_database() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ADMIN, "orders", None, None).await;

    for sql in ["", "DROP TABLE orders", "SELECT * FROM orders; DELETE FROM orders", "SELECT 1"] {
        let err = h.services.executor.execute(sql, ADMIN, None, true).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)), "{}: {:?}", sql, err);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
    assert_eq!(h.backend.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn any_denied_table_aborts_the_whole_query() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", None, None).await;

    let err = h
        .services
        .executor
        .execute(
            "SELECT o.id, p.salary FROM orders o JOIN payroll p ON p.id = o.id",
            VIEWER,
            None,
            true,
        )
        .await
        .unwrap_err();

    assert_eq!(err, QueryError::PermissionDenied { table: "payroll".to_string() });
    assert_eq!(err.to_json()["table"], "payroll");
    assert_eq!(h.backend.calls(), 0);

    let records = h.audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entry.error_kind.as_deref(), Some("permission"));
    Ok(())
}

#[tokio::test]
async fn statement_timeout_is_a_timeout() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "events", None, None).await;
    h.backend.script("events", Script::StatementTimeout);

    let err = h
        .services
        .executor
        .execute("SELECT * FROM events", ANALYST, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.audit.records().await[0].entry.error_kind.as_deref(), Some("timeout"));
    Ok(())
}

#[tokio::test]
async fn slow_backend_is_cut_off_at_the_deadline() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "events", None, None).await;
    h.backend.script("events", Script::Sleep(Duration::from_secs(10)));

    let started = std::time::Instant::now();
    let err = h
        .services
        .executor
        .execute("SELECT * FROM events", ANALYST, None, true)
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::Timeout { timeout_secs: 1 });
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn database_errors_are_hidden_from_callers() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;
    h.backend.script("orders", Script::Fail("column \"ssn\" does not exist".to_string()));

    let err = h
        .services
        .executor
        .execute("SELECT ssn FROM orders", ANALYST, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Execution(_)));
    assert!(!err.public_message().contains("ssn"));

    // The audit trail keeps the detail
    let records = h.audit.records().await;
    assert!(records[0].entry.error_message.as_deref().unwrap_or("").contains("ssn"));
    Ok(())
}

#[tokio::test]
async fn rate_limit_applies_after_access_control() -> Result<()> {
    let mut config = test_config();
    config.query.rate_limit_per_hour = 2;
    let h = Harness::with_config(config).await;
    h.seed_grant(ANALYST, "orders", None, None).await;

    // Denied queries do not consume the allowance
    assert!(h.services.executor.execute("SELECT * FROM payroll", ANALYST, None, false).await.is_err());

    h.services.executor.execute("SELECT * FROM orders", ANALYST, None, false).await?;
    h.services.executor.execute("SELECT * FROM orders", ANALYST, None, false).await?;
    let err = h
        .services
        .executor
        .execute("SELECT * FROM orders", ANALYST, None, false)
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::RateLimited { limit: 2 });
    assert_eq!(h.backend.calls(), 2);
    assert_eq!(h.audit.len().await, 4);
    Ok(())
}

#[tokio::test]
async fn explicit_limits_are_capped() -> Result<()> {
    let mut config = test_config();
    config.query.max_results = 50;
    let h = Harness::with_config(config).await;
    h.seed_grant(ANALYST, "orders", None, None).await;

    h.services
        .executor
        .execute("SELECT * FROM orders LIMIT 10", ANALYST, None, false)
        .await?;
    h.services
        .executor
        .execute("SELECT * FROM orders LIMIT 5000", ANALYST, None, false)
        .await?;

    let executed = h.backend.executed();
    assert_eq!(executed[0], "SELECT * FROM orders LIMIT 10");
    assert_eq!(executed[1], "SELECT * FROM orders LIMIT 50");
    Ok(())
}

#[tokio::test]
async fn concurrent_invocations_are_independent() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;
    h.seed_grant(VIEWER, "orders", Some(&["id"]), Some("region = 'west'")).await;

    let calls = (0..20).map(|i| {
        let user = if i % 2 == 0 { ANALYST } else { VIEWER };
        let executor = &h.services.executor;
        async move { (user, executor.execute("SELECT * FROM orders", user, None, false).await) }
    });
    for (user, result) in futures::future::join_all(calls).await {
        let result = result?;
        let expected: Vec<&str> = if user == VIEWER { vec!["id"] } else { vec!["id", "status", "region"] };
        assert_eq!(result.columns, expected);
    }
    assert_eq!(h.audit.len().await, 20);
    Ok(())
}

#[tokio::test]
async fn results_serialize_as_plain_json() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(ANALYST, "orders", None, None).await;

    let result = h.services.executor.execute("SELECT * FROM orders", ANALYST, None, true).await?;
    let body: Value = serde_json::to_value(&result)?;
    assert_eq!(body["rows"][0], json!({"id": 1, "status": "open", "region": "west"}));
    assert_eq!(body["row_count"], 2);
    Ok(())
}

#[tokio::test]
async fn cte_inside_a_subquery_does_not_hide_the_outer_table() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", None, None).await;

    let err = h
        .services
        .executor
        .execute(
            "SELECT * FROM payroll WHERE EXISTS (WITH payroll AS (SELECT 1) SELECT * FROM orders)",
            VIEWER,
            None,
            true,
        )
        .await
        .unwrap_err();
    assert_eq!(err, QueryError::PermissionDenied { table: "payroll".to_string() });
    assert_eq!(h.backend.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn row_filtered_table_must_be_read_directly() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", None, Some("region = 'west'")).await;

    for sql in [
        "SELECT * FROM (SELECT * FROM orders) AS o",
        "WITH o AS (SELECT * FROM orders) SELECT * FROM o",
        "SELECT id FROM orders WHERE id IN (SELECT id FROM orders WHERE region = 'east')",
    ] {
        let err = h.services.executor.execute(sql, VIEWER, None, false).await.unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)), "{}: {:?}", sql, err);
    }
    assert_eq!(h.backend.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn hidden_columns_cannot_be_reached_indirectly() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", Some(&["id", "status"]), None).await;
    h.seed_grant(VIEWER, "customers", None, None).await;

    for sql in [
        "SELECT region AS status FROM orders",
        "SELECT id, upper(region) FROM orders",
        "SELECT id FROM orders WHERE region = 'east'",
        "SELECT c.name FROM customers c JOIN orders o ON o.region = c.region",
        "SELECT * FROM (SELECT id, region AS status FROM orders) d",
    ] {
        let err = h.services.executor.execute(sql, VIEWER, None, false).await.unwrap_err();
        assert_eq!(err, QueryError::PermissionDenied { table: "orders".to_string() }, "{}", sql);
    }
    assert_eq!(h.backend.calls(), 0);

    let records = h.audit.records().await;
    assert!(records.iter().all(|r| r.entry.error_kind.as_deref() == Some("permission")));
    Ok(())
}

#[tokio::test]
async fn only_restricted_tables_lose_columns_in_a_join() -> Result<()> {
    let h = Harness::new().await;
    h.seed_grant(VIEWER, "orders", Some(&["id", "status"]), None).await;
    h.seed_grant(VIEWER, "customers", None, None).await;
    h.backend.script(
        "customers",
        Script::Rows(QueryRows {
            columns: vec!["name".to_string(), "status".to_string(), "region".to_string()],
            rows: vec![vec![
                sqlgate::SqlValue::Text("ada".to_string()),
                sqlgate::SqlValue::Text("open".to_string()),
                sqlgate::SqlValue::Text("west".to_string()),
            ]],
        }),
    );

    let result = h
        .services
        .executor
        .execute(
            "SELECT c.name, o.status, o.region FROM customers c JOIN orders o ON o.id = c.order_id",
            VIEWER,
            None,
            false,
        )
        .await?;
    assert_eq!(result.columns, vec!["name", "status"]);
    Ok(())
}
