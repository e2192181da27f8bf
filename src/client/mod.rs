//! Client driver for the album catalog.
//!
//! [`AlbumClient`] wraps the generated tonic client and issues each of the four call patterns.
//! Every call is bounded by [`ClientConfig::timeout`] and returns a [`ClientError`] instead of
//! terminating the process; retry policy is left to the caller (see
//! [`ClientError::is_retryable`]).
//!
//! # Example
//!
//! ```ignore
//! use album_catalog::client::{AlbumClient, ClientConfig};
//!
//! let config = ClientConfig::builder()
//!     .endpoint("http://localhost:50051")
//!     .build();
//!
//! let mut client = AlbumClient::connect(config).await?;
//!
//! if let Some(album) = client.get_album("Blue Train").await? {
//!     println!("{album}");
//! }
//!
//! let notifications = client
//!     .upload_and_notify(vec![Item::new("Jeru", "Gerry Mulligan", 17.99)])
//!     .await?;
//! ```

mod album_client;
mod config;
mod error;

pub use album_client::{AlbumClient, Notification, TotalAmount};
pub use config::ClientConfig;
pub use error::ClientError;
