use std::time::Duration;

use bon::Builder;

/// Configuration for the [`AlbumClient`](super::AlbumClient).
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Server URI, e.g. `http://localhost:50051`. Plaintext only.
    #[builder(into, default = "http://localhost:50051".to_string())]
    pub endpoint: String,

    /// Deadline applied to connecting and to every call, including draining its streams.
    #[builder(default = Duration::from_secs(10))]
    pub timeout: Duration,

    /// Outbound albums buffered while the transport is busy during an upload. Zero is treated
    /// as one.
    #[builder(default = 16)]
    pub upload_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
