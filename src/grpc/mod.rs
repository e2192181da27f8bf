//! gRPC surface of the album catalog.

mod config;
mod deadline;
mod server;

pub use config::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_STORE_PATH, ServerConfig};
pub use server::{AlbumServiceImpl, serve, shutdown_signal, start_server};

pub use crate::album_proto::album_service_client::AlbumServiceClient;
pub use crate::album_proto::album_service_server::AlbumServiceServer;
