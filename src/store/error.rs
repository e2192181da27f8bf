use std::path::PathBuf;

/// Failures raised while reading or writing the persisted record snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record file could not be read.
    #[error("failed to read record file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record file could not be written or swapped into place.
    #[error("failed to write record file {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record file is not a valid JSON array of records.
    #[error("record file {} is malformed", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory records could not be encoded.
    #[error("failed to encode records")]
    Encode(#[from] serde_json::Error),

    /// The backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
