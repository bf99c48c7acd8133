use clap::{Parser, Subcommand};
use fraud_query_agent::{
    config::{Config, SubAgent, CONFIG_PATH_ENV},
    facade::FraudQueryFacade,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fraud-query", version, about = "Ask the fraud table questions in plain language")]
struct Cli {
    /// YAML config file (defaults to $FRAUD_AGENT_CONFIG or configs/config.yaml)
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Config override, e.g. `llm.temperature=0` or `~bigquery.location`
    #[arg(short = 'o', long = "override", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a request into SQL and run it
    Query { text: String },
    /// Translate a request into SQL without running it
    Translate { text: String },
    /// Run SQL as given
    Execute { sql: String },
    /// Fraud counts by dimension, or the overview
    Stats {
        #[arg(long)]
        dimension: Option<String>,
    },
    /// Pattern analysis (demographic, geographic, temporal, company, comprehensive)
    Analyze {
        analysis_type: String,
        #[arg(long)]
        filters: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path, &cli.overrides)?,
        None => Config::load(&cli.overrides)?,
    };
    let table = config.table_for(SubAgent::FraudAgent);

    info!(table = %table, "Fraud query CLI starting");

    let facade = FraudQueryFacade::connect(&config, table).await?;

    let envelope = match cli.command {
        Command::Query { text } => {
            let translation = facade.generate_query(&text).await;
            facade.execute_query(&translation.query_text).await.to_envelope()
        }
        Command::Translate { text } => facade.generate_query(&text).await.to_envelope(),
        Command::Execute { sql } => facade.execute_query(&sql).await.to_envelope(),
        Command::Stats { dimension } => facade.statistics(dimension.as_deref()).await.to_envelope(),
        Command::Analyze {
            analysis_type,
            filters,
        } => facade
            .analyze_patterns(&analysis_type, filters.as_deref())
            .await
            .execution
            .to_envelope(),
    };

    println!("{}", serde_json::to_string_pretty(&envelope)?);

    Ok(())
}
