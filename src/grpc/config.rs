use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::DEFAULT_PORT;

/// Record file used when none is configured.
pub const DEFAULT_STORE_PATH: &str = "db/album.json";

/// Per-call bound used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the catalog gRPC server.
#[derive(Debug, Clone, Builder)]
pub struct ServerConfig {
    /// Address to listen on. Plaintext HTTP/2; there is no TLS.
    #[builder(default = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    pub addr: SocketAddr,

    /// JSON record file loaded at startup and rewritten on every successful upload.
    #[builder(into, default = PathBuf::from(DEFAULT_STORE_PATH))]
    pub store_path: PathBuf,

    /// Upper bound on any single call, streams included. A shorter `grpc-timeout` sent by the
    /// client wins.
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
