use anyhow::Result;
use axum::Router;
use clap::Parser;
use rwi_core::SearchConfig;
use server::build_app_with_config;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, env = "RWI_INDEX", default_value = "./index")]
    index: String,
    /// JSON file with search tunables; defaults apply to missing keys
    #[arg(long, env = "RWI_CONFIG")]
    config: Option<String>,
    /// Host to bind
    #[arg(long, env = "RWI_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, env = "RWI_PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SearchConfig::from_file(path)?,
        None => SearchConfig::default(),
    };
    tracing::info!(?config, "search configuration");
    let app: Router = build_app_with_config(args.index.clone(), config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
