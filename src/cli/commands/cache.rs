use clap::Subcommand;
use serde_json::json;

use crate::cache::Cache;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum CacheCommands {
    #[command(about = "Drop every cached query result")]
    FlushQueries,

    #[command(about = "Drop a user's cached permission lookups")]
    FlushUser {
        #[arg(help = "User id")]
        user: i64,
    },

    #[command(about = "Drop cached table metadata")]
    FlushSchema {
        #[arg(long, help = "Database name (default: every database)")]
        database: Option<String>,

        #[arg(long, help = "Table name (default: every table)")]
        table: Option<String>,
    },
}

/// Only the cache store is needed here, never the database
pub async fn handle(config: AppConfig, cmd: CacheCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let cache = Cache::connect(&config.cache).await;
    if !cache.is_enabled() {
        return output_error(&output_format, "Cache store is not available", Some("CACHE_DISABLED"));
    }

    let (removed, what) = match cmd {
        CacheCommands::FlushQueries => (cache.invalidate_query_cache().await, "query results".to_string()),
        CacheCommands::FlushUser { user } => (
            cache.invalidate_user_permissions(user).await,
            format!("permission entries for user {}", user),
        ),
        CacheCommands::FlushSchema { database, table } => (
            cache
                .invalidate_schema_cache(database.as_deref(), table.as_deref())
                .await,
            "schema entries".to_string(),
        ),
    };

    output_success(
        &output_format,
        &format!("Removed {} cached {}", removed, what),
        Some(json!({ "removed": removed })),
    )
}
