//! An album catalog served over gRPC.
//!
//! The catalog is exposed through all four gRPC interaction patterns:
//!
//! | RPC               | Pattern          | Behaviour                                          |
//! |-------------------|------------------|----------------------------------------------------|
//! | `GetAlbum`        | unary            | exact title lookup, a miss is `found = false`      |
//! | `ListAlbums`      | server streaming | every album by an artist, in catalog order         |
//! | `GetTotalAmount`  | client streaming | count of titles sent and sum of matching prices    |
//! | `UploadAndNotify` | bidirectional    | append new titles, one notification per album      |
//!
//! All calls share one [`Catalog`](catalog::Catalog). Reads and the check-then-append of an
//! upload are serialized through a single lock, and every successful upload rewrites the JSON
//! record file.

pub mod catalog;
pub mod client;
pub mod grpc;
pub mod item;
pub mod session;
pub mod state_machine;
pub mod store;

pub mod album_proto {
    include!(concat!(env!("OUT_DIR"), "/album.rs"));
}

/// Port the server listens on and the client dials by default.
pub const DEFAULT_PORT: u16 = 50051;
