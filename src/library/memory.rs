use super::{Entity, Library, LibraryError};
use crate::domain::ExternalId;
use crate::models::{FileRef, Series, SeriesRef, Show, ShowRef, Stage, StepStatus, VideoFile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Identity of a saved entity, recorded in save order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SavedRecord {
    File(String),
    Show(ExternalId),
    Series(ExternalId),
    Subtitle(String),
}

/// What a file looked like when it was saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub subtitles: usize,
    pub subtitles_status: StepStatus,
}

/// Library that keeps everything in process memory.
///
/// Used for dry runs and by tests, which inspect [`MemoryLibrary::saved`] to
/// see what the pipeline persisted.
#[derive(Default)]
pub struct MemoryLibrary {
    files: Mutex<HashMap<String, FileRef>>,
    shows: Mutex<HashMap<ExternalId, ShowRef>>,
    series: Mutex<HashMap<ExternalId, SeriesRef>>,
    saved: Mutex<Vec<SavedRecord>>,
    file_snapshots: Mutex<HashMap<String, Vec<FileSnapshot>>>,
    series_snapshots: Mutex<HashMap<ExternalId, Vec<usize>>>,
    fail_saves: AtomicBool,
}

impl MemoryLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `save` fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn saved(&self) -> Vec<SavedRecord> {
        self.saved.lock().await.clone()
    }

    pub async fn save_count(&self, record: &SavedRecord) -> usize {
        self.saved.lock().await.iter().filter(|r| *r == record).count()
    }

    /// Every save of the file at `path`, oldest first.
    pub async fn file_saves(&self, path: &str) -> Vec<FileSnapshot> {
        self.file_snapshots.lock().await.get(path).cloned().unwrap_or_default()
    }

    /// Episode count of the series at each of its saves, oldest first.
    pub async fn series_saves(&self, id: ExternalId) -> Vec<usize> {
        self.series_snapshots.lock().await.get(&id).cloned().unwrap_or_default()
    }

    pub async fn file(&self, path: &str) -> Option<FileRef> {
        self.files.lock().await.get(path).cloned()
    }

    pub async fn show(&self, id: ExternalId) -> Option<ShowRef> {
        self.shows.lock().await.get(&id).cloned()
    }

    pub async fn series(&self, id: ExternalId) -> Option<SeriesRef> {
        self.series.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl Library for MemoryLibrary {
    async fn get_or_create_file_by_path(&self, path: &str) -> Result<FileRef, LibraryError> {
        let mut files = self.files.lock().await;
        Ok(files
            .entry(path.to_string())
            .or_insert_with(|| VideoFile::new(path).into_ref())
            .clone())
    }

    async fn get_or_create_show_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<ShowRef, LibraryError> {
        let mut shows = self.shows.lock().await;
        Ok(shows
            .entry(id)
            .or_insert_with(|| Show::new(id).into_ref())
            .clone())
    }

    async fn get_or_create_series_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<SeriesRef, LibraryError> {
        let mut series = self.series.lock().await;
        Ok(series
            .entry(id)
            .or_insert_with(|| Series::new(id).into_ref())
            .clone())
    }

    async fn save(&self, entity: Entity) -> Result<(), LibraryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LibraryError::Rejected(format!(
                "saving {} is disabled",
                entity.kind()
            )));
        }

        let record = match entity {
            Entity::File(file) => {
                let file = file.lock().await;
                let snapshot = FileSnapshot {
                    subtitles: file.subtitles.len(),
                    subtitles_status: file.status.get(Stage::Subtitles).clone(),
                };
                self.file_snapshots
                    .lock()
                    .await
                    .entry(file.path.clone())
                    .or_default()
                    .push(snapshot);
                SavedRecord::File(file.path.clone())
            }
            Entity::Show(show) => SavedRecord::Show(show.lock().await.external_id()),
            Entity::Series(series) => {
                let series = series.lock().await;
                self.series_snapshots
                    .lock()
                    .await
                    .entry(series.external_id())
                    .or_default()
                    .push(series.episodes.len());
                SavedRecord::Series(series.external_id())
            }
            Entity::Subtitle(subtitle) => SavedRecord::Subtitle(subtitle.filename),
        };
        self.saved.lock().await.push(record);
        Ok(())
    }
}
