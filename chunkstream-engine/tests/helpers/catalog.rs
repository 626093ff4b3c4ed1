//! In-memory catalog

use async_trait::async_trait;
use chunkstream_engine::catalog::{Catalog, Track};
use chunkstream_engine::Result;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct StaticCatalog {
    tracks: HashMap<i64, Track>,
}

impl StaticCatalog {
    pub fn with_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        Self {
            tracks: tracks.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_track_by_id(&self, id: i64) -> Result<Option<Track>> {
        Ok(self.tracks.get(&id).cloned())
    }
}
