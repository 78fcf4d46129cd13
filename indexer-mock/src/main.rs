//! Ordinals Indexer Mock Server
//!
//! A lightweight in-memory stand-in for the ordinals indexer and broadcast
//! API. Designed for wallet testing and development.

use anyhow::{Context, Result};
use std::env;

use indexer_mock::{run_server, MockState};

#[derive(Debug)]
struct Config {
    network: bitcoin::Network,
    server_host: String,
    server_port: u16,
}

impl Config {
    fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let network = match env::var("MOCK_NETWORK")
            .unwrap_or_else(|_| "testnet".to_string())
            .to_lowercase()
            .as_str()
        {
            "mainnet" | "main" => bitcoin::Network::Bitcoin,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Testnet,
        };

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("Invalid SERVER_PORT")?;

        Ok(Self {
            network,
            server_host,
            server_port,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Indexer Mock Server...");

    let config = Config::from_env().context("Failed to load configuration")?;

    log::info!("Network: {:?}", config.network);
    log::info!("Server will listen on {}:{}", config.server_host, config.server_port);

    run_server(
        MockState::shared(config.network),
        config.server_host,
        config.server_port,
    )
    .await
    .context("Server error")?;

    Ok(())
}
