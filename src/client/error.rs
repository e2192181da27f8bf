use std::time::Duration;

use thiserror::Error;
use tonic::Code;

/// Errors returned by the [`AlbumClient`](super::AlbumClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint is invalid or the connection could not be established.
    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// The server or the transport failed the call.
    #[error("call failed: {0}")]
    Status(#[from] tonic::Status),

    /// The call did not complete within its deadline.
    #[error("call did not complete within {0:?}")]
    Timeout(Duration),

    /// The request stream was torn down before every message was sent.
    #[error("request stream closed before all messages were sent")]
    SendClosed,

    /// The task draining server notifications ended without reporting.
    #[error("notification receiver stopped unexpectedly")]
    ReceiverLost,
}

impl ClientError {
    /// Whether the failure is transient.
    ///
    /// `GetAlbum` and `ListAlbums` are read-only and safe to retry with backoff when this is true.
    /// `UploadAndNotify` is also safe to resend because titles that already made it are reported
    /// as already existing rather than inserted twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_) | ClientError::Connect { .. } => true,
            ClientError::Status(status) => matches!(
                status.code(),
                Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
            ),
            ClientError::SendClosed | ClientError::ReceiverLost => false,
        }
    }
}
