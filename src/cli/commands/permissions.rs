use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

pub async fn grant(
    config: AppConfig,
    user: i64,
    table: &str,
    columns: Option<Vec<String>>,
    filter: Option<String>,
    database: Option<String>,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let database = database.unwrap_or_else(|| config.database.database_name.clone());
    let services = connect(config).await?;
    let permission = services.admin.grant(user, &database, table, columns, filter).await;
    services.close().await;
    let permission = permission?;

    output_success(
        &output_format,
        &format!(
            "Granted user {} read access to {}.{}",
            user, permission.database_name, permission.table_name
        ),
        Some(json!({ "permission": permission })),
    )
}

pub async fn revoke(
    config: AppConfig,
    user: i64,
    table: &str,
    database: Option<String>,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let database = database.unwrap_or_else(|| config.database.database_name.clone());
    let services = connect(config).await?;
    let removed = services.admin.revoke(user, &database, table).await;
    services.close().await;

    if !removed? {
        return output_error(
            &output_format,
            &format!("User {} had no grant on {}.{}", user, database, table),
            Some("NOT_FOUND"),
        );
    }
    output_success(
        &output_format,
        &format!("Revoked user {} access to {}.{}", user, database, table),
        Some(json!({ "revoked": true })),
    )
}

pub async fn list(config: AppConfig, user: i64, output_format: OutputFormat) -> anyhow::Result<()> {
    let services = connect(config).await?;
    let summary = services.access.permission_summary(user).await;
    services.close().await;
    let summary = summary?;

    if summary.is_empty() {
        return output_empty_collection(&output_format, "permissions", "No grants for this user");
    }

    match output_format {
        OutputFormat::Json => output_json(&json!({ "permissions": summary }))?,
        OutputFormat::Text => {
            println!("{:<15} {:<25} {:<6} {:<7} {}", "DATABASE", "TABLE", "READ", "FILTER", "COLUMNS");
            println!("{}", "-".repeat(80));
            for grant in &summary {
                let columns = grant
                    .allowed_columns
                    .as_ref()
                    .map(|c| c.join(", "))
                    .unwrap_or_else(|| "*".to_string());
                println!(
                    "{:<15} {:<25} {:<6} {:<7} {}",
                    grant.database,
                    grant.table,
                    if grant.can_read { "yes" } else { "no" },
                    if grant.has_row_filter { "yes" } else { "no" },
                    columns
                );
            }
        }
    }
    Ok(())
}
