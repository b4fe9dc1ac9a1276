//! The import pipeline.
//!
//! ```text
//! walker -> prober -> identify -+-> file sink + error list
//!                               |
//!                               +-> metadata -+-> show sink -> subtitles -> file sink
//!                                             +-> series sink
//! ```
//!
//! Every arrow is a bounded channel. Each stage is a pool of workers that
//! exits once its input closes or the context is stopped; a stage's output
//! closes when the last of its workers is gone.

mod batch;
mod error;
mod identify;
mod metadata;
mod prober;
mod sink;
mod subtitles;
mod walker;

use batch::Batch;
pub use error::{ImportError, ItemError};
pub use prober::{fingerprint, fingerprint_reader};

use crate::clients::{FingerprintLookup, MetadataSource, SubtitleProvider};
use crate::config::Config;
use crate::library::{Entity, Library};
use crate::models::{FileRef, ShowRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Receiver shared by all workers of one stage.
pub(crate) type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub(crate) fn shared<T>(rx: mpsc::Receiver<T>) -> SharedReceiver<T> {
    Arc::new(Mutex::new(rx))
}

/// A show together with the file it was identified from.
#[derive(Debug, Clone)]
pub struct ShowWithFile {
    pub show: ShowRef,
    pub file: FileRef,
}

/// The external services the pipeline talks to.
#[derive(Clone)]
pub struct Clients {
    pub fingerprints: Arc<dyn FingerprintLookup>,
    pub metadata: Arc<dyn MetadataSource>,
    pub subtitles: Arc<dyn SubtitleProvider>,
}

#[derive(Debug, Default)]
struct Counters {
    files_probed: AtomicUsize,
    files_identified: AtomicUsize,
    shows_processed: AtomicUsize,
    series_created: AtomicUsize,
    subtitles_downloaded: AtomicUsize,
    invalid_paths: AtomicUsize,
}

/// Outcome of [`ImportContext::import`].
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub files_probed: usize,
    pub files_identified: usize,
    pub shows_processed: usize,
    pub series_created: usize,
    pub subtitles_downloaded: usize,
    pub invalid_paths: usize,
    /// Files whose `file` or `fingerprint_identify` stage failed.
    pub files_with_errors: Vec<FileRef>,
}

/// State shared by every stage of one import.
pub struct ImportContext {
    config: Config,
    root: PathBuf,
    library: Arc<dyn Library>,
    clients: Clients,
    cancel: CancellationToken,
    stopped: AtomicBool,
    errors: mpsc::Sender<ImportError>,
    counters: Counters,
}

impl ImportContext {
    /// Returns the context and the receiving end of its fatal error channel.
    /// The channel is bounded; the caller must keep draining it.
    #[must_use]
    pub fn new(
        config: Config,
        library: Arc<dyn Library>,
        clients: Clients,
    ) -> (Arc<Self>, mpsc::Receiver<ImportError>) {
        let (errors, errors_rx) = mpsc::channel(config.importer.buffer_size.max(1));
        let root = prober::normalize(Path::new(&config.file_root))
            .unwrap_or_else(|_| PathBuf::from(&config.file_root));

        let ctx = Arc::new(Self {
            config,
            root,
            library,
            clients,
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            errors,
            counters: Counters::default(),
        });
        (ctx, errors_rx)
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    /// Absolute library root every file path is stored relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops every stage. Workers finish the item in hand and exit.
    pub fn stop(&self) -> Result<(), ImportError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(ImportError::AlreadyStopped);
        }
        info!(event = "import_stopped", "Stopping import");
        self.cancel.cancel();
        Ok(())
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Receives the next item unless the import is stopped first.
    pub(crate) async fn recv<T>(&self, rx: &SharedReceiver<T>) -> Option<T> {
        let mut rx = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            rx = rx.lock() => rx,
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            item = rx.recv() => item,
        }
    }

    pub(crate) async fn recv_one<T>(&self, rx: &mut mpsc::Receiver<T>) -> Option<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            item = rx.recv() => item,
        }
    }

    /// Sends downstream; `false` once stopped or when downstream is gone.
    pub(crate) async fn send<T>(&self, tx: &mpsc::Sender<T>, item: T) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        }
    }

    pub(crate) async fn report_error(&self, err: ImportError) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            sent = self.errors.send(err) => {
                if let Err(mpsc::error::SendError(err)) = sent {
                    error!(error = %err, "Error channel closed");
                }
            }
        }
    }

    /// Saves one entity, reporting failure on the error channel.
    pub(crate) async fn save(&self, entity: Entity) {
        let kind = entity.kind();
        if let Err(source) = self.library.save(entity).await {
            self.report_error(ImportError::Persistence { kind, source })
                .await;
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, files_with_errors: Vec<FileRef>) -> ImportReport {
        let c = &self.counters;
        ImportReport {
            files_probed: c.files_probed.load(Ordering::Relaxed),
            files_identified: c.files_identified.load(Ordering::Relaxed),
            shows_processed: c.shows_processed.load(Ordering::Relaxed),
            series_created: c.series_created.load(Ordering::Relaxed),
            subtitles_downloaded: c.subtitles_downloaded.load(Ordering::Relaxed),
            invalid_paths: c.invalid_paths.load(Ordering::Relaxed),
            files_with_errors,
        }
    }

    /// Imports every video file under `paths` and returns once all stages
    /// have finished or the import was stopped.
    pub async fn import(self: &Arc<Self>, paths: Vec<PathBuf>) -> ImportReport {
        let started = Instant::now();
        let buffer = self.config.importer.buffer_size.max(1);
        info!(event = "import_started", paths = paths.len(), "Starting import");

        let (paths_tx, paths_rx) = mpsc::channel(buffer);
        let (files_tx, files_rx) = mpsc::channel(buffer);
        let (pairs_tx, pairs_rx) = mpsc::channel(buffer);
        let (done_tx, done_rx) = mpsc::channel(buffer);

        let walker = walker::spawn(self.clone(), paths, paths_tx);
        let prober = tokio::spawn(prober::run(self.clone(), paths_rx, files_tx));
        let identify = tokio::spawn(identify::run(self.clone(), files_rx, pairs_tx, done_tx));
        let shows = tokio::spawn({
            let ctx = self.clone();
            async move { ctx.process_shows(pairs_rx).await }
        });

        let files_with_errors = sink::collect_files(self, done_rx).await;

        for (stage, handle) in [("walker", walker), ("prober", prober), ("identify", identify)] {
            if let Err(e) = handle.await {
                error!(stage, error = %e, "Stage task failed");
            }
        }
        if let Err(e) = shows.await {
            error!(stage = "shows", error = %e, "Stage task failed");
        }

        let report = self.snapshot(files_with_errors);
        info!(
            event = "import_finished",
            files_probed = report.files_probed,
            files_identified = report.files_identified,
            shows_processed = report.shows_processed,
            series_created = report.series_created,
            subtitles_downloaded = report.subtitles_downloaded,
            invalid_paths = report.invalid_paths,
            files_with_errors = report.files_with_errors.len(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Import finished"
        );
        report
    }

    /// Fetches metadata and subtitles for identified shows and saves them.
    /// Also the entry point for shows matched by hand.
    pub async fn process_shows(self: &Arc<Self>, shows: mpsc::Receiver<ShowWithFile>) {
        let buffer = self.config.importer.buffer_size.max(1);

        let (pairs_tx, pairs_rx) = mpsc::channel(buffer);
        let (series_tx, series_rx) = mpsc::channel(buffer);
        let (subs_tx, subs_rx) = mpsc::channel(buffer);
        let (files_tx, files_rx) = mpsc::channel(buffer);

        let metadata = tokio::spawn(metadata::run(self.clone(), shows, pairs_tx, series_tx));
        let series = tokio::spawn(sink::save_all(self.clone(), series_rx));
        let show_sink = tokio::spawn(sink::save_shows_and_forward(self.clone(), pairs_rx, subs_tx));
        let subtitles = tokio::spawn(subtitles::run(self.clone(), subs_rx, files_tx));

        sink::save_all(self.clone(), files_rx).await;

        for (stage, handle) in [
            ("metadata", metadata),
            ("series_sink", series),
            ("show_sink", show_sink),
            ("subtitles", subtitles),
        ] {
            if let Err(e) = handle.await {
                error!(stage, error = %e, "Stage task failed");
            }
        }
    }
}
