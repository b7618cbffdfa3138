use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    #[command(about = "Delete history older than the retention horizon")]
    Purge {
        #[arg(long, help = "Retention in days (default: AUDIT_RETENTION_DAYS)")]
        days: Option<u32>,
    },
}

pub async fn handle(config: AppConfig, cmd: AuditCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Purge { days } => {
            let days = days.unwrap_or(config.audit.retention_days);
            let services = connect(config).await?;
            let purged = services.audit.purge_older_than(days).await;
            services.close().await;
            let purged = purged?;

            output_success(
                &output_format,
                &format!("Purged {} history entries older than {} days", purged, days),
                Some(json!({ "purged": purged, "retention_days": days })),
            )
        }
    }
}
