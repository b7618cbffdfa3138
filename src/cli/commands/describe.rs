use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

pub async fn handle(config: AppConfig, user: i64, table: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let services = connect(config).await?;
    let description = services.describe.describe(user, table).await;
    services.close().await;
    let description = description?;

    match output_format {
        OutputFormat::Json => output_json(&description)?,
        OutputFormat::Text => {
            println!("{}.{}", description.database, description.table);
            println!("{:<4} {:<30} {:<25} {}", "#", "COLUMN", "TYPE", "NULLABLE");
            println!("{}", "-".repeat(70));
            for column in &description.columns {
                println!(
                    "{:<4} {:<30} {:<25} {}",
                    column.ordinal_position,
                    column.name,
                    column.data_type,
                    if column.is_nullable { "yes" } else { "no" }
                );
            }
        }
    }
    Ok(())
}
