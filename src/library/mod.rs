//! Persistent home of imported files, shows, series and subtitles.
//!
//! Every `get_or_create_*` call is keyed on the entity's unique field and
//! hands out the same shared handle for the same key for the lifetime of the
//! library, so concurrent pipeline stages always lock the same entity.

mod memory;
mod sqlite;

pub use memory::{FileSnapshot, MemoryLibrary, SavedRecord};
pub use sqlite::SqliteLibrary;

use crate::domain::ExternalId;
use crate::models::{FileRef, SeriesRef, ShowRef, Subtitle};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Save rejected: {0}")]
    Rejected(String),
}

/// Anything that can be handed to [`Library::save`].
#[derive(Debug, Clone)]
pub enum Entity {
    File(FileRef),
    Show(ShowRef),
    Series(SeriesRef),
    Subtitle(Subtitle),
}

impl Entity {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Show(_) => "show",
            Self::Series(_) => "series",
            Self::Subtitle(_) => "subtitle",
        }
    }
}

impl From<FileRef> for Entity {
    fn from(file: FileRef) -> Self {
        Self::File(file)
    }
}

impl From<ShowRef> for Entity {
    fn from(show: ShowRef) -> Self {
        Self::Show(show)
    }
}

impl From<SeriesRef> for Entity {
    fn from(series: SeriesRef) -> Self {
        Self::Series(series)
    }
}

impl From<Subtitle> for Entity {
    fn from(subtitle: Subtitle) -> Self {
        Self::Subtitle(subtitle)
    }
}

#[async_trait]
pub trait Library: Send + Sync {
    /// `path` is relative to the library root, with `/` separators.
    async fn get_or_create_file_by_path(&self, path: &str) -> Result<FileRef, LibraryError>;

    async fn get_or_create_show_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<ShowRef, LibraryError>;

    async fn get_or_create_series_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<SeriesRef, LibraryError>;

    /// Parent series of an episode, or `None` for movies and for episodes
    /// whose series is not known yet.
    async fn series_of_episode(&self, episode: &ShowRef) -> Result<Option<SeriesRef>, LibraryError> {
        let series_id = episode.lock().await.episode.and_then(|e| e.series_id);
        match series_id {
            Some(id) => self.get_or_create_series_by_external_id(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, entity: Entity) -> Result<(), LibraryError>;
}
