use fraud_query_agent::{
    api::start_server,
    config::{Config, SubAgent},
    facade::FraudQueryFacade,
    tools::create_fraud_registry,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Fraud Query Agent - API Server");
    info!("Port: {}", api_port);

    let config = Config::load(&[])?;
    let table = config.table_for(SubAgent::FraudAgent);

    let facade = Arc::new(FraudQueryFacade::connect(&config, table).await?);
    let registry = Arc::new(create_fraud_registry(facade));

    info!(tools = ?registry.list(), "Tool registry initialized");

    start_server(registry, api_port).await?;

    Ok(())
}
