use super::{Entity, Library, LibraryError};
use crate::db::{MediaRepository, Store};
use crate::domain::ExternalId;
use crate::models::{FileRef, Series, SeriesRef, Show, ShowRef, VideoFile};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Library backed by SQLite.
///
/// Rows are loaded on first access and cached in identity maps, so each key
/// maps to one handle for the lifetime of the library. Lock order when maps
/// nest is series, then shows, then files.
pub struct SqliteLibrary {
    repo: MediaRepository,
    files: Mutex<HashMap<String, FileRef>>,
    shows: Mutex<HashMap<ExternalId, ShowRef>>,
    series: Mutex<HashMap<ExternalId, SeriesRef>>,
}

impl SqliteLibrary {
    pub async fn open(db_url: &str) -> anyhow::Result<Self> {
        let store = Store::new(db_url).await?;
        Ok(Self::new(&store))
    }

    #[must_use]
    pub fn new(store: &Store) -> Self {
        Self {
            repo: store.media_repo(),
            files: Mutex::new(HashMap::new()),
            shows: Mutex::new(HashMap::new()),
            series: Mutex::new(HashMap::new()),
        }
    }

    async fn load_show(&self, id: ExternalId) -> Result<ShowRef, LibraryError> {
        let show = self.repo.find_show(id).await?.unwrap_or_else(|| Show::new(id));
        let show = show.into_ref();

        for path in self.repo.file_paths_for_show(id).await? {
            let file = self.get_or_create_file_by_path(&path).await?;
            show.lock().await.attach_file(&file);
        }

        Ok(show)
    }
}

#[async_trait]
impl Library for SqliteLibrary {
    async fn get_or_create_file_by_path(&self, path: &str) -> Result<FileRef, LibraryError> {
        let mut files = self.files.lock().await;
        if let Some(file) = files.get(path) {
            return Ok(file.clone());
        }

        let file = match self.repo.find_file(path).await? {
            Some(mut file) => {
                file.subtitles = self.repo.subtitles_for_file(path).await?;
                file
            }
            None => {
                debug!(path = %path, "New video file");
                VideoFile::new(path)
            }
        };

        let file = file.into_ref();
        files.insert(path.to_string(), file.clone());
        Ok(file)
    }

    async fn get_or_create_show_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<ShowRef, LibraryError> {
        let mut shows = self.shows.lock().await;
        if let Some(show) = shows.get(&id) {
            return Ok(show.clone());
        }

        let show = self.load_show(id).await?;
        shows.insert(id, show.clone());
        Ok(show)
    }

    async fn get_or_create_series_by_external_id(
        &self,
        id: ExternalId,
    ) -> Result<SeriesRef, LibraryError> {
        let mut series_map = self.series.lock().await;
        if let Some(series) = series_map.get(&id) {
            return Ok(series.clone());
        }

        let mut series = self
            .repo
            .find_series(id)
            .await?
            .unwrap_or_else(|| Series::new(id));

        for episode_id in self.repo.episode_ids_for_series(id).await? {
            series
                .episodes
                .push(self.get_or_create_show_by_external_id(episode_id).await?);
        }

        let series = series.into_ref();
        series_map.insert(id, series.clone());
        Ok(series)
    }

    async fn save(&self, entity: Entity) -> Result<(), LibraryError> {
        match entity {
            Entity::File(file) => {
                let file = file.lock().await;
                self.repo.upsert_file(&file).await
            }
            Entity::Show(show) => {
                let show = show.lock().await;
                self.repo.upsert_show(&show).await
            }
            Entity::Series(series) => {
                let series = series.lock().await;
                self.repo.upsert_series(&series).await
            }
            Entity::Subtitle(subtitle) => self.repo.upsert_subtitle(&subtitle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemKind;
    use crate::models::{EpisodeData, Language, Stage, Subtitle};
    use std::sync::Arc;

    async fn store(dir: &tempfile::TempDir) -> Store {
        let url = format!("sqlite:{}", dir.path().join("mvm.db").display());
        Store::new(&url).await.unwrap()
    }

    fn id(n: u32) -> ExternalId {
        ExternalId::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_identity_map_returns_same_handle() {
        let library = SqliteLibrary::open("sqlite::memory:").await.unwrap();
        let a = library.get_or_create_file_by_path("m/a.mkv").await.unwrap();
        let b = library.get_or_create_file_by_path("m/a.mkv").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let s1 = library.get_or_create_series_by_external_id(id(5)).await.unwrap();
        let s2 = library.get_or_create_series_by_external_id(id(5)).await.unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn test_saved_rows_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let library = SqliteLibrary::new(&store);

        let file = library.get_or_create_file_by_path("m/a.mkv").await.unwrap();
        {
            let mut f = file.lock().await;
            f.size = 675_840;
            f.fingerprint = u64::MAX - 1;
            f.show_id = Some(id(403_358));
            f.status.succeed(Stage::File);
        }
        library.save(Entity::File(file)).await.unwrap();

        let show = library
            .get_or_create_show_by_external_id(id(403_358))
            .await
            .unwrap();
        {
            let mut s = show.lock().await;
            s.common.title = "Nochnoy dozor".into();
            s.common.year = 2004;
            s.common.rating = 6.5;
            s.common.languages = vec!["ru".parse::<Language>().unwrap()];
            s.status.succeed(Stage::MetadataIdentify);
        }
        library.save(Entity::Show(show)).await.unwrap();

        library
            .save(Entity::Subtitle(Subtitle {
                filename: "m/a.en.5.srt".into(),
                hash: "abc".into(),
                language: "en".parse().unwrap(),
                hearing_impaired: false,
                score: 5,
                format: "srt".into(),
                video_file: "m/a.mkv".into(),
            }))
            .await
            .unwrap();

        // A fresh identity map over the same connection reads the rows back.
        let reopened = SqliteLibrary::new(&store);
        let show = reopened
            .get_or_create_show_by_external_id(id(403_358))
            .await
            .unwrap();
        let show = show.lock().await;
        assert_eq!(show.common.title, "Nochnoy dozor");
        assert_eq!(show.common.year, 2004);
        assert_eq!(show.common.languages, vec!["ru".parse::<Language>().unwrap()]);
        assert!(show.status.get(Stage::MetadataIdentify).is_success());
        assert_eq!(show.files.len(), 1);

        let file = show.files[0].lock().await;
        assert_eq!(file.size, 675_840);
        assert_eq!(file.fingerprint, u64::MAX - 1);
        assert_eq!(file.subtitles.len(), 1);
        assert_eq!(file.subtitles[0].language.iso1(), "en");
    }

    #[tokio::test]
    async fn test_series_loads_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let library = SqliteLibrary::new(&store);

        for (n, ep) in [(11, 2), (10, 1)] {
            let show = library.get_or_create_show_by_external_id(id(n)).await.unwrap();
            show.lock().await.episode = Some(EpisodeData {
                season: 1,
                episode: ep,
                series_id: Some(id(77)),
            });
            library.save(Entity::Show(show)).await.unwrap();
        }

        let reopened = SqliteLibrary::new(&store);
        let series = reopened
            .get_or_create_series_by_external_id(id(77))
            .await
            .unwrap();
        let series = series.lock().await;
        assert_eq!(series.episodes.len(), 2);
        assert_eq!(series.episodes[0].lock().await.external_id(), id(10));
    }

    #[tokio::test]
    async fn test_episode_without_series_keeps_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let library = SqliteLibrary::new(&store);

        let show = library.get_or_create_show_by_external_id(id(12)).await.unwrap();
        {
            let mut s = show.lock().await;
            s.kind = ItemKind::Episode;
            s.episode = Some(EpisodeData {
                season: 3,
                episode: 7,
                series_id: None,
            });
        }
        library.save(Entity::Show(show)).await.unwrap();

        let reopened = SqliteLibrary::new(&store);
        let show = reopened.get_or_create_show_by_external_id(id(12)).await.unwrap();
        assert!(reopened.series_of_episode(&show).await.unwrap().is_none());
        let data = show.lock().await.episode.unwrap();
        assert_eq!((data.season, data.episode, data.series_id), (3, 7, None));
    }
}
