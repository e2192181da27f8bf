use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::album_proto::Album;

/// A catalog record.
///
/// The `title` is the identity key. Uniqueness of titles is enforced by the
/// [`Catalog`](crate::catalog::Catalog) when items are uploaded, never by the
/// [`RecordStore`](crate::store::RecordStore) itself, so a hand-edited record file may
/// still contain duplicates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub title: String,
    pub artist: String,
    pub price: f64,
}

impl Item {
    /// Create a new [`Item`].
    pub fn new(title: impl Into<String>, artist: impl Into<String>, price: f64) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            price,
        }
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} by {} ({:.2})", self.title, self.artist, self.price)
    }
}

impl From<Album> for Item {
    fn from(album: Album) -> Self {
        Self {
            title: album.title,
            artist: album.artist,
            price: album.price,
        }
    }
}

impl From<Item> for Album {
    fn from(item: Item) -> Self {
        Self {
            title: item.title,
            artist: item.artist,
            price: item.price,
        }
    }
}
