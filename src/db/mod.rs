//! SQLite storage for the library: connection pool, schema migrations and
//! the repository that maps rows to models.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::media::MediaRepository;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

/// On-disk location named by a `sqlite:` URL, or `None` for in-memory
/// databases.
fn database_file(db_url: &str) -> Option<&Path> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let path = rest.split('?').next().unwrap_or(rest);

    if path.is_empty() || path.contains(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if let Some(path) = database_file(db_url) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            if !path.exists() {
                tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        migrator::Migrator::up(&conn, None)
            .await
            .context("Failed to migrate library database")?;

        info!(
            database = %db_url,
            min_connections,
            max_connections,
            "Library database ready"
        );

        Ok(Self { conn })
    }

    #[must_use]
    pub fn media_repo(&self) -> MediaRepository {
        MediaRepository::new(self.conn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_file() {
        assert_eq!(
            database_file("sqlite:data/mvm.db"),
            Some(Path::new("data/mvm.db"))
        );
        assert_eq!(
            database_file("sqlite:///tmp/mvm.db?mode=rwc"),
            Some(Path::new("/tmp/mvm.db"))
        );
        assert_eq!(database_file("sqlite::memory:"), None);
    }

    #[tokio::test]
    async fn test_creates_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mvm.db");

        let store = Store::new(&format!("sqlite:{}", path.display())).await.unwrap();
        assert!(path.exists());
        assert!(store.media_repo().find_file("nope.mkv").await.unwrap().is_none());
    }
}
