mod api;
mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use mailscan_extraction::{FieldExtractor, GeminiExtractor};
use mailscan_store::LetterStore;

use api::AppState;
use config::Config;

#[derive(Parser)]
#[command(name = "mailscan")]
#[command(about = "Mailscan — letter scanning service backed by Gemini vision")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mailscan HTTP server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show current service status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            run_server(config).await?;
        }
        Commands::Status => {
            let client = reqwest::Client::new();
            match client
                .get(format!("http://localhost:{}/api/status", config.port))
                .send()
                .await
            {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("mailscan is not running on port {}", config.port);
                }
            }
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        db = %config.db_path,
        model = %config.gemini_model,
        "Starting mailscan"
    );

    let store = Arc::new(LetterStore::open(&config.db_path)?);

    let extractor: Option<Arc<dyn FieldExtractor>> = match &config.gemini_api_key {
        Some(key) => {
            info!("Registered Gemini extraction provider");
            Some(Arc::new(GeminiExtractor::new(key, &config.gemini_model)))
        }
        None => {
            warn!("GEMINI_API_KEY not set; scanning disabled until configured");
            None
        }
    };

    let state = Arc::new(AppState {
        store,
        extractor,
        model: config.gemini_model.clone(),
    });

    let app = api::build_router(state).layer(CorsLayer::permissive());
    let addr = format!("{}:{}", config.bind_address, config.port);

    info!(addr = %addr, "HTTP API listening");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
