use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::types::QueryRequest;
use crate::validator;

pub struct ExecuteRequest {
    pub user: i64,
    pub query: String,
    pub question: Option<String>,
    pub params: Option<String>,
    pub cache_allowed: bool,
}

/// Validator verdict plus the tables and cost estimate, no database needed
pub fn validate(query: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let (ok, reason) = validator::check(query, false);
    let tables: Vec<String> = validator::extract_tables(query).into_iter().collect();
    let cost = validator::estimate_cost(query);

    match output_format {
        OutputFormat::Json => output_json(&json!({
            "ok": ok,
            "reason": reason,
            "tables": tables,
            "cost": cost,
        }))?,
        OutputFormat::Text => {
            match &reason {
                None => println!("✓ Query is valid"),
                Some(reason) => println!("✗ {}", reason),
            }
            if !tables.is_empty() {
                println!("Tables:     {}", tables.join(", "));
            }
            println!(
                "Complexity: {:?} (joins: {}, subqueries: {}, aggregations: {}, order by: {})",
                cost.complexity, cost.has_joins, cost.has_subqueries, cost.has_aggregations, cost.has_order_by
            );
        }
    }

    if !ok {
        anyhow::bail!("query rejected");
    }
    Ok(())
}

pub async fn execute(config: AppConfig, request: ExecuteRequest, output_format: OutputFormat) -> anyhow::Result<()> {
    let params = parse_params(request.params.as_deref())?;
    let services = connect(config).await?;

    let mut query = QueryRequest::new(request.query, request.user).with_cache(request.cache_allowed);
    query.question = request.question;
    query.params = params;

    let outcome = services.executor.execute_request(query).await;
    services.close().await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if let OutputFormat::Json = output_format {
                output_json(&e.to_json())?;
            }
            anyhow::bail!("{}", e.public_message());
        }
    };

    match output_format {
        OutputFormat::Json => output_json(&result)?,
        OutputFormat::Text => {
            println!("{}", result.columns.join(" | "));
            println!("{}", "-".repeat(result.columns.join(" | ").len().max(3)));
            for row in &result.rows {
                let cells: Vec<String> = row
                    .values()
                    .iter()
                    .map(|(_, value)| match value.to_json() {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect();
                println!("{}", cells.join(" | "));
            }
            println!(
                "({} rows, {:.2} ms{})",
                result.row_count,
                result.execution_time_ms,
                if result.cached { ", cached" } else { "" }
            );
        }
    }
    Ok(())
}
