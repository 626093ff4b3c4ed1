//! Track catalog
//!
//! The engine reads tracks by id and never writes. `SqliteCatalog` is the
//! reference implementation the binary uses; tests supply their own.

use crate::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Catalog entry for a playable file
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: i64,
    pub filepath: PathBuf,
    /// Duration in seconds
    pub duration: f64,
    pub sample_rate: u32,
}

/// Read-only track lookup
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_track_by_id(&self, id: i64) -> Result<Option<Track>>;
}

/// `tracks` table in a SQLite database
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (creating if needed) the database at `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let catalog = Self::from_pool(pool).await?;
        info!("Connected to catalog: {}", path.display());
        Ok(catalog)
    }

    /// Wrap an existing pool, creating the `tracks` table if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                filepath TEXT NOT NULL,
                duration REAL NOT NULL,
                sample_rate INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn get_track_by_id(&self, id: i64) -> Result<Option<Track>> {
        let row = sqlx::query("SELECT id, filepath, duration, sample_rate FROM tracks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Track {
            id: row.get("id"),
            filepath: PathBuf::from(row.get::<String, _>("filepath")),
            duration: row.get("duration"),
            sample_rate: row.get::<i64, _>("sample_rate") as u32,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_catalog() -> SqliteCatalog {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteCatalog::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_track_by_id() {
        let catalog = memory_catalog().await;
        sqlx::query("INSERT INTO tracks (id, filepath, duration, sample_rate) VALUES (?, ?, ?, ?)")
            .bind(3_i64)
            .bind("/music/a.flac")
            .bind(183.5_f64)
            .bind(44_100_i64)
            .execute(catalog.pool())
            .await
            .unwrap();

        let track = catalog.get_track_by_id(3).await.unwrap().unwrap();
        assert_eq!(track.filepath, PathBuf::from("/music/a.flac"));
        assert_eq!(track.duration, 183.5);
        assert_eq!(track.sample_rate, 44_100);
    }

    #[tokio::test]
    async fn test_missing_track_is_none() {
        let catalog = memory_catalog().await;
        assert!(catalog.get_track_by_id(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.db");
        let catalog = SqliteCatalog::connect(&path).await.unwrap();
        assert!(path.exists());
        assert!(catalog.get_track_by_id(1).await.unwrap().is_none());
    }
}
