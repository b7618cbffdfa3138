pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "sqlgate - read-only, permission-scoped SQL execution")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create the users, permission and history tables")]
    Migrate,

    #[command(about = "Check a query against the validator without running it")]
    Validate {
        #[arg(help = "Query text")]
        query: String,
    },

    #[command(about = "Run a query through the full pipeline as a user")]
    Execute {
        #[arg(long, help = "Requesting user id")]
        user: i64,

        #[arg(help = "Query text")]
        query: String,

        #[arg(long, help = "Question the query answers, kept in the history")]
        question: Option<String>,

        #[arg(long, help = "Named parameters as a JSON object")]
        params: Option<String>,

        #[arg(long, help = "Bypass the result cache")]
        no_cache: bool,
    },

    #[command(about = "Grant read access to a table")]
    Grant {
        #[arg(help = "User id")]
        user: i64,

        #[arg(help = "Table name")]
        table: String,

        #[arg(long, value_delimiter = ',', help = "Comma-separated visible columns (default: all)")]
        columns: Option<Vec<String>>,

        #[arg(long, help = "Row filter predicate, e.g. \"region = 'west'\"")]
        filter: Option<String>,

        #[arg(long, help = "Database name (default: DATABASE_NAME)")]
        database: Option<String>,
    },

    #[command(about = "Revoke read access to a table")]
    Revoke {
        #[arg(help = "User id")]
        user: i64,

        #[arg(help = "Table name")]
        table: String,

        #[arg(long, help = "Database name (default: DATABASE_NAME)")]
        database: Option<String>,
    },

    #[command(about = "List a user's grants")]
    Permissions {
        #[arg(help = "User id")]
        user: i64,
    },

    #[command(about = "Show the columns of a table visible to a user")]
    Describe {
        #[arg(long, help = "Requesting user id")]
        user: i64,

        #[arg(help = "Table name")]
        table: String,
    },

    #[command(about = "Query history reports")]
    History {
        #[command(subcommand)]
        cmd: commands::history::HistoryCommands,
    },

    #[command(about = "Audit trail maintenance")]
    Audit {
        #[command(subcommand)]
        cmd: commands::audit::AuditCommands,
    },

    #[command(about = "Cache invalidation")]
    Cache {
        #[command(subcommand)]
        cmd: commands::cache::CacheCommands,
    },

    #[command(about = "Check database and cache connectivity")]
    Health,

    #[command(about = "Print the effective configuration")]
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Migrate => commands::system::migrate(config, output_format).await,
        Commands::Validate { query } => commands::query::validate(&query, output_format),
        Commands::Execute {
            user,
            query,
            question,
            params,
            no_cache,
        } => {
            let request = commands::query::ExecuteRequest {
                user,
                query,
                question,
                params,
                cache_allowed: !no_cache,
            };
            commands::query::execute(config, request, output_format).await
        }
        Commands::Grant {
            user,
            table,
            columns,
            filter,
            database,
        } => commands::permissions::grant(config, user, &table, columns, filter, database, output_format).await,
        Commands::Revoke { user, table, database } => {
            commands::permissions::revoke(config, user, &table, database, output_format).await
        }
        Commands::Permissions { user } => commands::permissions::list(config, user, output_format).await,
        Commands::Describe { user, table } => commands::describe::handle(config, user, &table, output_format).await,
        Commands::History { cmd } => commands::history::handle(config, cmd, output_format).await,
        Commands::Audit { cmd } => commands::audit::handle(config, cmd, output_format).await,
        Commands::Cache { cmd } => commands::cache::handle(config, cmd, output_format).await,
        Commands::Health => commands::system::health(config, output_format).await,
        Commands::Config => commands::system::show_config(&config, output_format),
    }
}
