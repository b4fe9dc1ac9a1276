//! End-to-end runs of the import pipeline against in-process fakes.

use async_trait::async_trait;
use mvm::clients::imdb::ShortItem;
use mvm::clients::{
    ClientError, FingerprintLookup, ItemData, MetadataSource, MovieMatch, SubtitleHandle,
    SubtitleProvider, SubtitleQuery,
};
use mvm::config::Config;
use mvm::domain::{ExternalId, ItemKind};
use mvm::importer::{Clients, ImportContext, ImportError, fingerprint};
use mvm::library::{MemoryLibrary, SavedRecord};
use mvm::models::{Language, Stage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

fn id(n: u32) -> ExternalId {
    ExternalId::new(n).unwrap()
}

#[derive(Default)]
struct FakeFingerprints {
    matches: HashMap<u64, MovieMatch>,
    batches: Mutex<Vec<usize>>,
    fail: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl FingerprintLookup for FakeFingerprints {
    async fn best_movies_by_hashes(
        &self,
        hashes: &[u64],
    ) -> Result<Vec<Option<MovieMatch>>, ClientError> {
        self.batches.lock().unwrap().push(hashes.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ClientError::ServiceStatus("503 Service Unavailable".to_string()));
        }
        Ok(hashes.iter().map(|h| self.matches.get(h).cloned()).collect())
    }
}

#[derive(Default)]
struct FakeMetadata {
    items: HashMap<u32, ItemData>,
    calls: Mutex<HashMap<u32, usize>>,
}

impl FakeMetadata {
    fn calls(&self, id: u32) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn item(&self, id: ExternalId) -> Result<ItemData, ClientError> {
        *self.calls.lock().unwrap().entry(id.value()).or_default() += 1;
        tokio::task::yield_now().await;
        self.items
            .get(&id.value())
            .cloned()
            .ok_or(ClientError::Status(reqwest::StatusCode::NOT_FOUND))
    }
}

#[derive(Default)]
struct FakeSubtitles {
    per_language: usize,
    /// Every result reports the same download count.
    same_downloads: bool,
    fail_downloads: bool,
    queries: Mutex<Vec<SubtitleQuery>>,
    batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl SubtitleProvider for FakeSubtitles {
    async fn search(
        &self,
        query: &SubtitleQuery,
        language: Language,
        limit: usize,
    ) -> Result<Vec<SubtitleHandle>, ClientError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok((0..self.per_language.min(limit))
            .map(|i| SubtitleHandle {
                id: format!("{language}-{i}"),
                hash: format!("hash-{language}-{i}"),
                language,
                hearing_impaired: false,
                downloads: if self.same_downloads { 1000 } else { 1000 + i as u64 },
                format: "srt".to_string(),
            })
            .collect())
    }

    async fn download(&self, handles: &[SubtitleHandle]) -> Result<Vec<Vec<u8>>, ClientError> {
        self.batches.lock().unwrap().push(handles.len());
        // Long enough that a file released before its downloads shows up
        // in the library without them.
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_downloads {
            return Err(ClientError::Fault {
                code: 407,
                message: "Download limit reached".to_string(),
            });
        }
        Ok(handles
            .iter()
            .map(|h| format!("1\n00:00:01,000 --> 00:00:02,000\n{}\n", h.id).into_bytes())
            .collect())
    }
}

fn movie(n: u32, title: &str, year: i32) -> ItemData {
    ItemData {
        id: n,
        kind: Some(ItemKind::Movie),
        title: title.to_string(),
        year,
        ..ItemData::default()
    }
}

fn episode(n: u32, series: u32, season: u32, number: u32) -> ItemData {
    ItemData {
        id: n,
        kind: Some(ItemKind::Episode),
        title: format!("Episode {number}"),
        year: 2011,
        season_number: season,
        episode_number: number,
        series: Some(ShortItem {
            id: series,
            title: "The Walking Dead".to_string(),
            year: 2010,
        }),
        ..ItemData::default()
    }
}

fn series(n: u32, title: &str) -> ItemData {
    ItemData {
        id: n,
        kind: Some(ItemKind::Series),
        title: title.to_string(),
        year: 2010,
        ..ItemData::default()
    }
}

fn match_for(n: u32, title: &str) -> MovieMatch {
    MovieMatch {
        imdb_id: format!("{n:07}"),
        title: title.to_string(),
        year: None,
    }
}

/// Writes a video file whose content depends on `seed`, so each one gets a
/// distinct fingerprint.
fn write_video(root: &Path, relative: &str, seed: u8) -> (PathBuf, u64) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let content: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8 ^ seed).collect();
    std::fs::write(&path, content).unwrap();
    let hash = fingerprint(&path).unwrap();
    (path, hash)
}

fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.file_root = root.display().to_string();
    config.importer.buffer_size = 4;
    config
}

struct Run {
    ctx: Arc<ImportContext>,
    errors: JoinHandle<Vec<ImportError>>,
}

fn start(
    config: Config,
    library: Arc<MemoryLibrary>,
    fingerprints: Arc<FakeFingerprints>,
    metadata: Arc<FakeMetadata>,
    subtitles: Arc<FakeSubtitles>,
) -> Run {
    let clients = Clients {
        fingerprints,
        metadata,
        subtitles,
    };
    let (ctx, mut rx) = ImportContext::new(config, library, clients);
    let errors = tokio::spawn(async move {
        let mut errors = Vec::new();
        while let Some(err) = rx.recv().await {
            errors.push(err);
        }
        errors
    });
    Run { ctx, errors }
}

impl Run {
    async fn finish(self) -> Vec<ImportError> {
        drop(self.ctx);
        self.errors.await.unwrap()
    }
}

#[tokio::test]
async fn test_identifies_night_watch() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "movies/Night Watch.avi", 0);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(403_358, "Nochnoy dozor"))]),
        ..FakeFingerprints::default()
    });
    let mut item = movie(403_358, "Nochnoy dozor", 2004);
    item.rating = 6.5;
    item.votes = 51_000;
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(403_358, item)]),
        ..FakeMetadata::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let run = start(
        config_for(dir.path()),
        library.clone(),
        fingerprints,
        metadata,
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![path]).await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.files_probed, 1);
    assert_eq!(report.files_identified, 1);
    assert_eq!(report.shows_processed, 1);
    assert_eq!(report.series_created, 0);
    assert!(report.files_with_errors.is_empty());

    let show = library.show(id(403_358)).await.unwrap();
    let show = show.lock().await;
    assert_eq!(show.common.title, "Nochnoy dozor");
    assert_eq!(show.common.year, 2004);
    assert!((show.common.rating - 6.5).abs() < 0.01);
    assert_eq!(show.kind, ItemKind::Movie);
    assert!(show.status.get(Stage::MetadataIdentify).is_success());
    assert_eq!(show.files.len(), 1);

    let file = library.file("movies/Night Watch.avi").await.unwrap();
    let file = file.lock().await;
    assert_eq!(file.fingerprint, hash);
    assert_eq!(file.size, 200 * 1024);
    assert_eq!(file.show_id, Some(id(403_358)));
    assert!(file.status.get(Stage::File).is_success());
    assert!(file.status.get(Stage::FingerprintIdentify).is_success());
    assert!(file.status.get(Stage::MetadataIdentify).is_success());

    assert_eq!(library.save_count(&SavedRecord::Show(id(403_358))).await, 1);
}

#[tokio::test]
async fn test_series_fetched_and_emitted_once() {
    let dir = tempfile::tempdir().unwrap();
    let (movie_path, movie_hash) = write_video(dir.path(), "Night Watch.avi", 1);
    let (ep1_path, ep1_hash) = write_video(dir.path(), "twd/s01e01.mkv", 2);
    let (ep2_path, ep2_hash) = write_video(dir.path(), "twd/s01e02.mkv", 3);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([
            (movie_hash, match_for(403_358, "Nochnoy dozor")),
            (ep1_hash, match_for(1_910_272, "Days Gone Bye")),
            (ep2_hash, match_for(1_910_273, "Guts")),
        ]),
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([
            (403_358, movie(403_358, "Nochnoy dozor", 2004)),
            (1_910_272, episode(1_910_272, 1_520_211, 1, 1)),
            (1_910_273, episode(1_910_273, 1_520_211, 1, 2)),
            (1_520_211, series(1_520_211, "The Walking Dead")),
        ]),
        ..FakeMetadata::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let run = start(
        config_for(dir.path()),
        library.clone(),
        fingerprints,
        metadata.clone(),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run
        .ctx
        .import(vec![movie_path, ep1_path, ep2_path])
        .await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.files_identified, 3);
    assert_eq!(report.shows_processed, 3);
    assert_eq!(report.series_created, 1);
    assert_eq!(metadata.calls(1_520_211), 1);
    assert_eq!(
        library
            .save_count(&SavedRecord::Series(id(1_520_211)))
            .await,
        1
    );
    // Emitted by the episode that created it, so at least that one is in.
    let episodes_at_save = library.series_saves(id(1_520_211)).await;
    assert_eq!(episodes_at_save.len(), 1);
    assert!(episodes_at_save[0] >= 1, "{episodes_at_save:?}");

    let series = library.series(id(1_520_211)).await.unwrap();
    let series = series.lock().await;
    assert_eq!(series.common.title, "The Walking Dead");
    assert!(series.status.get(Stage::MetadataIdentify).is_success());
    assert_eq!(series.episodes.len(), 2);

    let ep = library.show(id(1_910_273)).await.unwrap();
    let ep = ep.lock().await;
    assert_eq!(ep.kind, ItemKind::Episode);
    let data = ep.episode.unwrap();
    assert_eq!((data.season, data.episode), (1, 2));
    assert_eq!(data.series_id, Some(id(1_520_211)));
}

#[tokio::test]
async fn test_episode_without_series_keeps_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "special.mkv", 10);

    let mut item = episode(2_000_001, 1, 0, 4);
    item.series = None;
    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(2_000_001, "Special"))]),
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(2_000_001, item)]),
        ..FakeMetadata::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let run = start(
        config_for(dir.path()),
        library.clone(),
        fingerprints,
        metadata,
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![path]).await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.series_created, 0);
    let show = library.show(id(2_000_001)).await.unwrap();
    let show = show.lock().await;
    assert_eq!(show.kind, ItemKind::Episode);
    let data = show.episode.unwrap();
    assert_eq!((data.season, data.episode, data.series_id), (0, 4, None));
}

#[tokio::test]
async fn test_paths_through_parent_dirs_inside_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("tv")).unwrap();
    write_video(dir.path(), "movies/x.avi", 11);

    let library = Arc::new(MemoryLibrary::new());
    let run = start(
        config_for(dir.path()),
        library.clone(),
        Arc::new(FakeFingerprints::default()),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run
        .ctx
        .import(vec![dir.path().join("tv").join("..").join("movies")])
        .await;
    run.finish().await;

    assert_eq!(report.invalid_paths, 0);
    assert_eq!(report.files_probed, 1);
    let file = library.file("movies/x.avi").await.unwrap();
    assert!(file.lock().await.status.get(Stage::File).is_success());
}

#[tokio::test]
async fn test_every_file_reaches_the_aggregator_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut matches = HashMap::new();
    for seed in 0..25u8 {
        let (_, hash) = write_video(dir.path(), &format!("library/file{seed:02}.mkv"), seed);
        if seed % 2 == 0 {
            matches.insert(hash, match_for(1000 + u32::from(seed), "Some Movie"));
        }
    }
    // Not a video, skipped by the walker.
    std::fs::write(dir.path().join("library/notes.txt"), "hello").unwrap();

    let items = (0..25u32)
        .filter(|n| n % 2 == 0)
        .map(|n| (1000 + n, movie(1000 + n, "Some Movie", 2000)))
        .collect();
    let fingerprints = Arc::new(FakeFingerprints {
        matches,
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items,
        ..FakeMetadata::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.osdb.max_requests = 3;
    config.importer.osdb.max_per_request = 4;

    let run = start(
        config,
        library.clone(),
        fingerprints.clone(),
        metadata,
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![dir.path().join("library")]).await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.files_probed, 25);
    assert_eq!(report.files_identified, 13);
    assert_eq!(report.files_with_errors.len(), 12);

    let batches = fingerprints.batches.lock().unwrap().clone();
    assert!(batches.iter().all(|&size| (1..=4).contains(&size)));
    assert_eq!(batches.iter().sum::<usize>(), 25);

    for seed in 0..25u8 {
        let path = format!("library/file{seed:02}.mkv");
        let saves = library.save_count(&SavedRecord::File(path.clone())).await;
        // Identified files are saved again once their subtitles are done.
        let expected = if seed % 2 == 0 { 2 } else { 1 };
        assert_eq!(saves, expected, "{path}");

        let file = library.file(&path).await.unwrap();
        let file = file.lock().await;
        if seed % 2 == 1 {
            assert_eq!(
                file.status.get(Stage::FingerprintIdentify).message(),
                Some("can't identify show: show not found")
            );
        }
    }
}

#[tokio::test]
async fn test_failed_lookup_marks_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (a, _) = write_video(dir.path(), "a.mkv", 1);
    let (b, _) = write_video(dir.path(), "b.mkv", 2);

    let fingerprints = Arc::new(FakeFingerprints {
        fail: true,
        ..FakeFingerprints::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.osdb.max_requests = 1;

    let run = start(
        config,
        library.clone(),
        fingerprints.clone(),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![a, b]).await;
    run.finish().await;

    assert_eq!(*fingerprints.batches.lock().unwrap(), vec![2]);
    assert_eq!(report.files_with_errors.len(), 2);
    for file in &report.files_with_errors {
        assert!(file.lock().await.status.get(Stage::FingerprintIdentify).is_error());
    }
}

#[tokio::test]
async fn test_invalid_and_unreadable_paths() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let (outside_path, _) = write_video(outside.path(), "elsewhere.mkv", 1);
    let missing = root.path().join("missing.mkv");

    let library = Arc::new(MemoryLibrary::new());
    let run = start(
        config_for(root.path()),
        library.clone(),
        Arc::new(FakeFingerprints::default()),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![outside_path, missing]).await;
    run.finish().await;

    assert_eq!(report.invalid_paths, 1);
    assert_eq!(report.files_probed, 1);
    assert_eq!(report.files_with_errors.len(), 1);

    let file = library.file("missing.mkv").await.unwrap();
    let message = file
        .lock()
        .await
        .status
        .get(Stage::File)
        .message()
        .unwrap()
        .to_string();
    assert!(message.starts_with("unable to get file size"), "{message}");
}

#[tokio::test]
async fn test_subtitles_downloaded_before_file_is_done() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "movies/Night Watch.avi", 0);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(403_358, "Nochnoy dozor"))]),
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(403_358, movie(403_358, "Nochnoy dozor", 2004))]),
        ..FakeMetadata::default()
    });
    let subtitles = Arc::new(FakeSubtitles {
        per_language: 2,
        ..FakeSubtitles::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.subtitles.languages = vec!["en".parse().unwrap(), "bg".parse().unwrap()];
    config.importer.osdb.max_subtitles_per_request = 3;

    let run = start(
        config,
        library.clone(),
        fingerprints,
        metadata,
        subtitles.clone(),
    );
    let report = run.ctx.import(vec![path]).await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.subtitles_downloaded, 4);
    let batches = subtitles.batches.lock().unwrap().clone();
    assert!(batches.iter().all(|&size| size <= 3));
    assert_eq!(batches.iter().sum::<usize>(), 4);

    let queries = subtitles.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 2);
    assert!(
        queries
            .iter()
            .all(|q| matches!(q, SubtitleQuery::Fingerprint { hash: h, .. } if *h == hash))
    );

    let file = library.file("movies/Night Watch.avi").await.unwrap();
    let file = file.lock().await;
    assert_eq!(file.subtitles.len(), 4);
    assert!(file.status.get(Stage::Subtitles).is_success());

    // The save after the subtitle stage already holds every download.
    let saves = library.file_saves(&file.path).await;
    assert_eq!(saves.len(), 2);
    let finished: Vec<_> = saves
        .iter()
        .filter(|s| s.subtitles_status.is_success())
        .collect();
    assert!(!finished.is_empty());
    assert!(finished.iter().all(|s| s.subtitles == 4), "{saves:?}");

    let subtitle = dir.path().join("movies/Night Watch.en.999999000.srt");
    let content = std::fs::read_to_string(subtitle).unwrap();
    assert!(content.contains("en-0"));
    assert!(
        library
            .saved()
            .await
            .contains(&SavedRecord::Subtitle("movies/Night Watch.bg.999998999.srt".to_string()))
    );
}

#[tokio::test]
async fn test_download_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "a.mkv", 4);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(42, "Answer"))]),
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(42, movie(42, "Answer", 1999))]),
        ..FakeMetadata::default()
    });
    let subtitles = Arc::new(FakeSubtitles {
        per_language: 1,
        fail_downloads: true,
        ..FakeSubtitles::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.subtitles.languages = vec!["en".parse().unwrap()];

    let run = start(config, library.clone(), fingerprints, metadata, subtitles);
    let report = run.ctx.import(vec![path]).await;
    run.finish().await;

    assert_eq!(report.subtitles_downloaded, 0);
    let file = library.file("a.mkv").await.unwrap();
    let file = file.lock().await;
    let message = file.status.get(Stage::Subtitles).message().unwrap();
    assert!(message.contains("Download limit reached"), "{message}");

    let saves = library.file_saves("a.mkv").await;
    assert_eq!(saves.len(), 2);
    assert!(saves.iter().any(|s| s.subtitles_status.is_error()), "{saves:?}");
    assert!(!saves.iter().any(|s| s.subtitles_status.is_success()), "{saves:?}");
}

#[tokio::test]
async fn test_same_named_subtitles_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "a.mkv", 9);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(42, "Answer"))]),
        ..FakeFingerprints::default()
    });
    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(42, movie(42, "Answer", 1999))]),
        ..FakeMetadata::default()
    });
    let subtitles = Arc::new(FakeSubtitles {
        per_language: 2,
        same_downloads: true,
        ..FakeSubtitles::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.subtitles.languages = vec!["en".parse().unwrap()];
    config.importer.subtitles.max_requests = 2;
    config.importer.osdb.max_subtitles_per_request = 1;

    let run = start(config, library.clone(), fingerprints, metadata, subtitles);
    let report = run.ctx.import(vec![path]).await;
    assert!(run.finish().await.is_empty());

    assert_eq!(report.subtitles_downloaded, 2);
    let file = library.file("a.mkv").await.unwrap();
    let file = file.lock().await;
    assert!(file.status.get(Stage::Subtitles).is_success());

    let mut names: Vec<_> = file.subtitles.iter().map(|s| s.filename.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["a.en.999999000.srt", "a.en.999999001.srt"]);

    let first = std::fs::read_to_string(dir.path().join(&names[0])).unwrap();
    let second = std::fs::read_to_string(dir.path().join(&names[1])).unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_metadata_failure_still_finishes_show() {
    let dir = tempfile::tempdir().unwrap();
    let (path, hash) = write_video(dir.path(), "unknown.mkv", 5);

    let fingerprints = Arc::new(FakeFingerprints {
        matches: HashMap::from([(hash, match_for(77, "Lost"))]),
        ..FakeFingerprints::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let run = start(
        config_for(dir.path()),
        library.clone(),
        fingerprints,
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![path]).await;
    run.finish().await;

    assert_eq!(report.shows_processed, 1);
    let show = library.show(id(77)).await.unwrap();
    let show = show.lock().await;
    assert!(show.status.get(Stage::MetadataIdentify).is_error());
    // Title from the fingerprint match survives.
    assert_eq!(show.common.title, "Lost");
    assert_eq!(library.save_count(&SavedRecord::Show(id(77))).await, 1);
}

#[tokio::test]
async fn test_save_failures_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_video(dir.path(), "a.mkv", 6);

    let library = Arc::new(MemoryLibrary::new());
    library.set_fail_saves(true);

    let run = start(
        config_for(dir.path()),
        library.clone(),
        Arc::new(FakeFingerprints::default()),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );
    run.ctx.import(vec![path]).await;
    let errors = run.finish().await;

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ImportError::Persistence { kind: "file", .. }
    ));
}

#[tokio::test]
async fn test_stop_cancels_import() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for seed in 0..20u8 {
        paths.push(write_video(dir.path(), &format!("f{seed}.mkv"), seed).0);
    }

    let fingerprints = Arc::new(FakeFingerprints {
        delay: Some(Duration::from_millis(200)),
        ..FakeFingerprints::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let mut config = config_for(dir.path());
    config.importer.osdb.max_requests = 1;
    config.importer.osdb.max_per_request = 1;
    config.importer.buffer_size = 1;

    let run = start(
        config,
        library,
        fingerprints.clone(),
        Arc::new(FakeMetadata::default()),
        Arc::new(FakeSubtitles::default()),
    );

    let import = tokio::spawn({
        let ctx = run.ctx.clone();
        async move { ctx.import(paths).await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    run.ctx.stop().unwrap();
    assert!(matches!(run.ctx.stop(), Err(ImportError::AlreadyStopped)));
    assert!(run.ctx.is_stopped());

    let report = tokio::time::timeout(Duration::from_secs(5), import)
        .await
        .expect("import did not return after stop")
        .unwrap();
    assert!(report.files_identified == 0);
    assert!(fingerprints.batches.lock().unwrap().len() < 20);
    run.finish().await;
}

#[tokio::test]
async fn test_repair_loop_attaches_and_skips() {
    let dir = tempfile::tempdir().unwrap();
    let (a, _) = write_video(dir.path(), "a.mkv", 7);
    let (b, _) = write_video(dir.path(), "b.mkv", 8);

    let metadata = Arc::new(FakeMetadata {
        items: HashMap::from([(403_358, movie(403_358, "Nochnoy dozor", 2004))]),
        ..FakeMetadata::default()
    });
    let library = Arc::new(MemoryLibrary::new());

    let run = start(
        config_for(dir.path()),
        library.clone(),
        Arc::new(FakeFingerprints::default()),
        metadata.clone(),
        Arc::new(FakeSubtitles::default()),
    );
    let report = run.ctx.import(vec![a, b]).await;
    assert_eq!(report.files_with_errors.len(), 2);

    let files = vec![
        library.file("a.mkv").await.unwrap(),
        library.file("b.mkv").await.unwrap(),
    ];
    let mut input = std::io::Cursor::new("garbage\ntt0403358\nf\n");
    let mut output = Vec::new();
    mvm::cli::fix_file_errors(&run.ctx, &files, &mut input, &mut output)
        .await
        .unwrap();
    assert!(run.finish().await.is_empty());

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("2 of the files have errors"));
    assert!(output.contains("unable to read imdb id"));
    assert!(output.contains("adding show with imdb id tt0403358"));

    let show = library.show(id(403_358)).await.unwrap();
    assert_eq!(show.lock().await.common.title, "Nochnoy dozor");
    assert_eq!(metadata.calls(403_358), 1);
    assert_eq!(library.save_count(&SavedRecord::Show(id(403_358))).await, 1);

    let a = files[0].lock().await;
    assert_eq!(a.show_id, Some(id(403_358)));
    assert!(a.status.get(Stage::FingerprintIdentify).is_success());
    assert!(a.status.get(Stage::MetadataIdentify).is_success());

    let b = files[1].lock().await;
    assert_eq!(
        *b.status.get(Stage::FingerprintIdentify),
        mvm::models::StepStatus::Skipped
    );
    assert_eq!(library.save_count(&SavedRecord::File("b.mkv".into())).await, 2);
}
