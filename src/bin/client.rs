use std::time::Duration;

use album_catalog::client::{AlbumClient, ClientConfig};
use album_catalog::item::Item;
use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TITLES: [&str; 6] = [
    "Blue Train",
    "Giant Steps",
    "Speak No Evil",
    "Weather Report",
    "A Portrait in Jazz",
    "Chet Baker Sings",
];

/// Runs a demonstration of every call pattern against an album catalog server
#[derive(Parser, Debug)]
#[command(name = "album-client")]
struct Args {
    /// Server endpoint
    #[arg(long, env = "ALBUM_ENDPOINT", default_value = "http://localhost:50051")]
    endpoint: String,

    /// Deadline for each call, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ClientConfig::builder()
        .endpoint(args.endpoint)
        .timeout(Duration::from_secs(args.timeout_secs))
        .build();

    let mut client = AlbumClient::connect(config).await?;

    info!("Unary RPC: GetAlbum");
    for title in ["Blue Train", "Not Exist Title"] {
        match client.get_album(title).await? {
            Some(album) => info!(%album, "Album found"),
            None => info!(title, "Album not found"),
        }
    }

    info!("Server streaming RPC: ListAlbums");
    for album in client.list_albums("Miles Davis").await? {
        info!(%album, "Album listed");
    }

    info!("Client streaming RPC: GetTotalAmount");
    let total = client.total_amount(TITLES).await?;
    info!(
        count = total.count,
        total = total.total,
        message = %total.message,
        "Total amount"
    );

    info!("Bidirectional streaming RPC: UploadAndNotify");
    let uploads = vec![
        Item::new("New Album", "New Artist", 10.99),
        Item::new("New Album 2", "New Artist 2", 20.99),
        Item::new("Blue Train", "John Coltrane", 56.99),
        Item::new("Jeru", "Gerry Mulligan", 17.99),
    ];
    for notification in client.upload_and_notify(uploads).await? {
        info!(
            title = %notification.title,
            status = ?notification.status,
            "{}",
            notification.message
        );
    }

    Ok(())
}
