use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use album_catalog::grpc::{self, DEFAULT_STORE_PATH, ServerConfig};
use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Album catalog gRPC server
#[derive(Parser, Debug)]
#[command(name = "album-server")]
#[command(about = "Serves the album catalog over plaintext gRPC")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ALBUM_ADDR", default_value = "0.0.0.0:50051")]
    addr: SocketAddr,

    /// JSON record file, rewritten on every successful upload
    #[arg(long, env = "ALBUM_STORE", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Upper bound on any single call, in seconds
    #[arg(long, env = "ALBUM_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = ServerConfig::builder()
        .addr(args.addr)
        .store_path(args.store)
        .request_timeout(Duration::from_secs(args.request_timeout_secs))
        .build();

    if let Err(e) = grpc::start_server(config).await {
        error!(error = %format!("{e:#}"), "Server failed");
        return Err(e);
    }

    Ok(())
}
