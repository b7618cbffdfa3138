use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::{redact_url, DatabaseManager};

pub async fn migrate(config: AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let database = DatabaseManager::connect(&config.database).await?;
    let outcome = database.migrate().await;
    database.close().await;
    outcome?;

    output_success(&output_format, "Migrations applied", None)
}

pub async fn health(config: AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let services = connect(config).await?;
    let report = services.health().await;
    services.close().await;

    match output_format {
        OutputFormat::Json => output_json(&report)?,
        OutputFormat::Text => {
            println!("Status:   {}", report.status);
            println!("Database: {}", report.database);
            println!("Cache:    {}", report.cache);
        }
    }

    if !report.is_ok() {
        anyhow::bail!("service degraded");
    }
    Ok(())
}

/// Connection URLs are shown with passwords masked
pub fn show_config(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let database_url = config.database.url.as_deref().map(redact_url);
    let cache_url = config.cache.url.as_deref().map(redact_url);

    match output_format {
        OutputFormat::Json => output_json(&json!({
            "config": config,
            "database_url": database_url,
            "cache_url": cache_url,
        })),
        OutputFormat::Text => {
            println!("Environment:   {:?}", config.environment);
            println!("Database URL:  {}", database_url.as_deref().unwrap_or("(not set)"));
            println!(
                "Pool:          {} + {} overflow, {}s timeout",
                config.database.pool_size, config.database.max_overflow, config.database.pool_timeout_secs
            );
            println!("Database name: {}", config.database.database_name);
            println!(
                "Cache:         {} ({})",
                if config.cache.enabled { "enabled" } else { "disabled" },
                cache_url.as_deref().unwrap_or("no url")
            );
            println!(
                "Cache TTLs:    results {}s, schema {}s, permissions {}s, rate limit {}s",
                config.cache.query_result_ttl_secs,
                config.cache.schema_ttl_secs,
                config.cache.permission_ttl_secs,
                config.cache.rate_limit_ttl_secs
            );
            println!(
                "Queries:       {}s timeout, {} max rows, {} per user per hour",
                config.query.timeout_secs,
                config.query.max_results,
                match config.query.rate_limit() {
                    Some(limit) => limit.to_string(),
                    None => "unlimited".to_string(),
                }
            );
            println!(
                "Audit:         {} ({} day retention)",
                if config.audit.enabled { "enabled" } else { "disabled" },
                config.audit.retention_days
            );
            Ok(())
        }
    }
}
