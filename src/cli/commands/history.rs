use clap::Subcommand;
use serde_json::json;

use crate::audit::AuditStatus;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum HistoryCommands {
    #[command(about = "A user's most recent queries")]
    Recent {
        #[arg(help = "User id")]
        user: i64,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long, help = "Only 'success' or 'failed' entries")]
        status: Option<AuditStatus>,
    },

    #[command(about = "Show one history entry")]
    Show {
        #[arg(help = "User id")]
        user: i64,

        #[arg(help = "History entry id")]
        id: i64,
    },

    #[command(about = "Most frequently run successful queries")]
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    #[command(about = "Success rate and timing for a user")]
    Stats {
        #[arg(help = "User id")]
        user: i64,

        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

pub async fn handle(config: AppConfig, cmd: HistoryCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let services = connect(config).await?;
    let outcome = report(&services, cmd, output_format).await;
    services.close().await;
    outcome
}

async fn report(
    services: &crate::services::Services,
    cmd: HistoryCommands,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        HistoryCommands::Recent { user, limit, status } => {
            let records = services.audit.list_recent(user, limit, status).await?;
            if records.is_empty() {
                return output_empty_collection(&output_format, "history", "No queries recorded");
            }
            match output_format {
                OutputFormat::Json => output_json(&json!({ "history": records }))?,
                OutputFormat::Text => {
                    println!("{:<8} {:<17} {:<8} {:>6} {:>10}  {}", "ID", "WHEN", "STATUS", "ROWS", "MS", "QUERY");
                    println!("{}", "-".repeat(100));
                    for record in &records {
                        let entry = &record.entry;
                        println!(
                            "{:<8} {:<17} {:<8} {:>6} {:>10.2}  {}",
                            record.id,
                            entry.created_at.format("%Y-%m-%d %H:%M"),
                            entry.status,
                            entry.row_count,
                            entry.execution_time_ms,
                            truncate(&entry.query_text, 50)
                        );
                    }
                }
            }
        }
        HistoryCommands::Show { user, id } => {
            let Some(record) = services.audit.get(id, user).await? else {
                anyhow::bail!("History entry {} not found for user {}", id, user);
            };
            match output_format {
                OutputFormat::Json => output_json(&record)?,
                OutputFormat::Text => {
                    let entry = &record.entry;
                    println!("ID:       {}", record.id);
                    println!("When:     {}", entry.created_at.to_rfc3339());
                    println!("Status:   {}", entry.status);
                    if let Some(question) = &entry.question {
                        println!("Question: {}", question);
                    }
                    println!("Query:    {}", entry.query_text);
                    println!("Rows:     {}", entry.row_count);
                    println!("Time:     {:.2} ms", entry.execution_time_ms);
                    if let Some(message) = &entry.error_message {
                        println!(
                            "Error:    [{}] {}",
                            entry.error_kind.as_deref().unwrap_or("unknown"),
                            message
                        );
                    }
                }
            }
        }
        HistoryCommands::Popular { limit, days } => {
            let popular = services.audit.list_popular(limit, days).await?;
            if popular.is_empty() {
                return output_empty_collection(&output_format, "popular", "No successful queries in this period");
            }
            match output_format {
                OutputFormat::Json => output_json(&json!({ "popular": popular, "period_days": days }))?,
                OutputFormat::Text => {
                    println!("{:>6} {:>10} {:>10}  {}", "RUNS", "AVG MS", "ROWS", "QUESTION / QUERY");
                    println!("{}", "-".repeat(90));
                    for query in &popular {
                        let label = query.question.as_deref().unwrap_or(&query.query_text);
                        println!(
                            "{:>6} {:>10.2} {:>10}  {}",
                            query.execution_count,
                            query.avg_execution_time_ms,
                            query.total_rows_returned,
                            truncate(label, 60)
                        );
                    }
                }
            }
        }
        HistoryCommands::Stats { user, days } => {
            let stats = services.audit.user_statistics(user, days).await?;
            match output_format {
                OutputFormat::Json => output_json(&stats)?,
                OutputFormat::Text => {
                    println!("User {} over the last {} days", stats.user_id, stats.period_days);
                    println!("Queries:      {}", stats.total_queries);
                    println!("Successful:   {}", stats.successful_queries);
                    println!("Failed:       {}", stats.failed_queries);
                    println!("Success rate: {:.2}%", stats.success_rate);
                    println!("Avg time:     {:.2} ms", stats.avg_execution_time_ms);
                    println!("Rows:         {}", stats.total_rows_returned);
                }
            }
        }
    }
    Ok(())
}
