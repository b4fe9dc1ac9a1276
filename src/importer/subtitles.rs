use super::{Batch, ImportContext, ItemError, SharedReceiver, ShowWithFile, shared};
use crate::clients::{SubtitleHandle, SubtitleQuery};
use crate::constants::subtitles::SCORE_CEILING;
use crate::library::Entity;
use crate::models::{FileRef, Stage, Subtitle};
use crate::parser::template::SubtitleName;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

struct Pending {
    count: usize,
    file: FileRef,
}

/// Per-file count of subtitle searches and downloads still in flight.
///
/// A file is handed back exactly once, by the [`PendingTracker::release`]
/// call that brings its count to zero.
#[derive(Default)]
pub(crate) struct PendingTracker {
    files: Mutex<HashMap<String, Pending>>,
}

impl PendingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str, file: &FileRef) {
        let mut files = self.files.lock().await;
        files
            .entry(key.to_string())
            .or_insert_with(|| Pending {
                count: 0,
                file: file.clone(),
            })
            .count += 1;
    }

    /// Returns the file once nothing is pending for it any more.
    pub async fn release(&self, key: &str) -> Option<FileRef> {
        let mut files = self.files.lock().await;
        let pending = files.get_mut(key)?;
        pending.count = pending.count.saturating_sub(1);
        if pending.count > 0 {
            return None;
        }
        files.remove(key).map(|p| p.file)
    }

    #[cfg(test)]
    async fn pending(&self, key: &str) -> usize {
        self.files.lock().await.get(key).map_or(0, |p| p.count)
    }

    #[cfg(test)]
    async fn is_empty(&self) -> bool {
        self.files.lock().await.is_empty()
    }
}

/// A search result waiting to be downloaded.
struct Hit {
    key: String,
    file: FileRef,
    handle: SubtitleHandle,
}

pub(super) async fn run(
    ctx: Arc<ImportContext>,
    pairs: mpsc::Receiver<ShowWithFile>,
    done: mpsc::Sender<FileRef>,
) {
    let settings = &ctx.config().importer.subtitles;
    let workers = settings.max_requests.max(1);
    let (hits_tx, hits_rx) = mpsc::channel(ctx.config().importer.buffer_size.max(1));
    let tracker = Arc::new(PendingTracker::new());
    let pairs = shared(pairs);
    let hits = shared(hits_rx);
    debug!(stage = "subtitles", workers, "Stage started");

    let mut handles = Vec::with_capacity(workers * 2);
    for worker_id in 0..workers {
        handles.push(tokio::spawn(search_worker(
            ctx.clone(),
            worker_id,
            pairs.clone(),
            tracker.clone(),
            hits_tx.clone(),
            done.clone(),
        )));
        handles.push(tokio::spawn(download_worker(
            ctx.clone(),
            worker_id,
            hits.clone(),
            tracker.clone(),
            done.clone(),
        )));
    }
    drop(hits_tx);
    drop(done);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(stage = "subtitles", error = %e, "Worker failed");
        }
    }
    debug!(stage = "subtitles", "Stage finished");
}

async fn search_worker(
    ctx: Arc<ImportContext>,
    worker_id: usize,
    pairs: SharedReceiver<ShowWithFile>,
    tracker: Arc<PendingTracker>,
    hits: mpsc::Sender<Hit>,
    done: mpsc::Sender<FileRef>,
) {
    let settings = &ctx.config().importer.subtitles;

    while let Some(pair) = ctx.recv(&pairs).await {
        let key = pair.file.lock().await.path.clone();
        tracker.acquire(&key, &pair.file).await;

        let query = query_for(&pair).await;
        debug!(path = %key, ?query, "Searching subtitles");

        let searches = settings.languages.iter().map(|language| {
            ctx.clients
                .subtitles
                .search(&query, *language, settings.subtitles_per_language)
        });

        let mut stopped = false;
        for result in join_all(searches).await {
            match result {
                Ok(found) => {
                    for handle in found {
                        tracker.acquire(&key, &pair.file).await;
                        let hit = Hit {
                            key: key.clone(),
                            file: pair.file.clone(),
                            handle,
                        };
                        if !ctx.send(&hits, hit).await {
                            stopped = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %key, error = %e, "Subtitle search failed");
                    pair.file
                        .lock()
                        .await
                        .status
                        .fail(Stage::Subtitles, ItemError::SubtitleSearch(e));
                }
            }
            if stopped {
                break;
            }
        }

        if stopped {
            break;
        }
        if !release(&ctx, &tracker, &key, &done).await {
            break;
        }
    }
    debug!(stage = "subtitles", worker_id, role = "search", "Worker finished");
}

/// The most specific query the file and show support.
async fn query_for(pair: &ShowWithFile) -> SubtitleQuery {
    let (hash, size, file_name, probed) = {
        let file = pair.file.lock().await;
        (
            file.fingerprint,
            file.size,
            file.file_name().to_string(),
            file.status.get(Stage::File).is_success(),
        )
    };
    if probed && hash != 0 {
        return SubtitleQuery::Fingerprint { hash, size };
    }

    let show = pair.show.lock().await;
    if show.status.get(Stage::MetadataIdentify).is_success() {
        return SubtitleQuery::ExternalId(show.external_id());
    }
    if let Some(episode) = show.episode
        && !show.common.title.is_empty()
    {
        return SubtitleQuery::Episode {
            title: show.common.title.clone(),
            season: episode.season,
            episode: episode.episode,
        };
    }
    SubtitleQuery::FileName(file_name)
}

/// Drops one pending unit for `key` and forwards the file when it was the
/// last. Returns `false` once downstream is gone.
async fn release(
    ctx: &ImportContext,
    tracker: &PendingTracker,
    key: &str,
    done: &mpsc::Sender<FileRef>,
) -> bool {
    let Some(file) = tracker.release(key).await else {
        return true;
    };

    {
        let mut guard = file.lock().await;
        if !guard.status.get(Stage::Subtitles).is_error() {
            guard.status.succeed(Stage::Subtitles);
        }
        debug!(path = %guard.path, subtitles = guard.subtitles.len(), "Subtitles finished");
    }
    ctx.send(done, file).await
}

async fn download_worker(
    ctx: Arc<ImportContext>,
    worker_id: usize,
    hits: SharedReceiver<Hit>,
    tracker: Arc<PendingTracker>,
    done: mpsc::Sender<FileRef>,
) {
    let capacity = ctx.config().importer.osdb.max_subtitles_per_request;

    while let Some(first) = ctx.recv(&hits).await {
        let mut batch = Batch::new(capacity);
        let mut full = batch.push(first);

        // Top the batch up with whatever is already queued.
        {
            let mut rx = hits.lock().await;
            while full.is_none() {
                let Ok(hit) = rx.try_recv() else {
                    break;
                };
                full = batch.push(hit);
            }
        }

        let items = full.or_else(|| batch.take()).unwrap_or_default();
        download_batch(&ctx, worker_id, &items).await;

        for hit in &items {
            if !release(&ctx, &tracker, &hit.key, &done).await {
                return;
            }
        }
    }
    debug!(stage = "subtitles", worker_id, role = "download", "Worker finished");
}

async fn download_batch(ctx: &ImportContext, worker_id: usize, items: &[Hit]) {
    let handles: Vec<SubtitleHandle> = items.iter().map(|hit| hit.handle.clone()).collect();
    debug!(worker_id, batch_size = handles.len(), "Downloading subtitles");

    let contents = match ctx.clients.subtitles.download(&handles).await {
        Ok(contents) if contents.len() == items.len() => contents,
        Ok(contents) => {
            let message = format!(
                "got {} subtitles for {} requested",
                contents.len(),
                items.len()
            );
            fail_all(items, &message).await;
            return;
        }
        Err(e) => {
            warn!(worker_id, batch_size = items.len(), error = %e, "Subtitle download failed");
            fail_all(items, &e.to_string()).await;
            return;
        }
    };

    for (hit, content) in items.iter().zip(contents) {
        store(ctx, hit, content).await;
    }
}

async fn fail_all(items: &[Hit], message: &str) {
    for hit in items {
        hit.file.lock().await.status.fail(
            Stage::Subtitles,
            ItemError::SubtitleDownload(message.to_string()),
        );
    }
}

/// Picks a filename for `hit` and records the subtitle on its file before
/// anything is written, so concurrent downloads for one file never claim the
/// same name. A name held by a different subtitle moves this one to the next
/// score. `None` when every candidate name is taken.
async fn claim(ctx: &ImportContext, hit: &Hit) -> Option<(Subtitle, bool)> {
    let handle = &hit.handle;
    let template = &ctx.config().importer.subtitles.filename;
    let mut file = hit.file.lock().await;
    let stem = file.path_without_extension().to_string();
    let base = SCORE_CEILING.saturating_sub(handle.downloads);

    // One more candidate than there are subtitles always leaves a free name
    // when the template uses the score.
    let candidates = u64::try_from(file.subtitles.len()).unwrap_or(u64::MAX);
    let (filename, score) = (0..=candidates)
        .map(|offset| base.saturating_add(offset))
        .map(|score| {
            let filename = template.render(&SubtitleName {
                path: &stem,
                language: handle.language.iso1(),
                score,
                format: &handle.format,
            });
            (filename, score)
        })
        .find(|(filename, _)| {
            file.subtitles
                .iter()
                .all(|s| s.filename != *filename || s.hash == handle.hash)
        })?;

    let subtitle = Subtitle {
        filename,
        hash: handle.hash.clone(),
        language: handle.language,
        hearing_impaired: handle.hearing_impaired,
        score,
        format: handle.format.clone(),
        video_file: hit.key.clone(),
    };
    let existing = file
        .subtitles
        .iter_mut()
        .find(|s| s.filename == subtitle.filename);
    let inserted = existing.is_none();
    match existing {
        Some(existing) => existing.clone_from(&subtitle),
        None => file.subtitles.push(subtitle.clone()),
    }
    Some((subtitle, inserted))
}

/// Writes one subtitle next to its video and registers it.
async fn store(ctx: &ImportContext, hit: &Hit, content: Vec<u8>) {
    let Some((subtitle, inserted)) = claim(ctx, hit).await else {
        let mut file = hit.file.lock().await;
        warn!(path = %file.path, subtitle = %hit.handle.id, "No free subtitle filename");
        let path = file.path_without_extension().to_string();
        file.status.fail(
            Stage::Subtitles,
            ItemError::SubtitleSave {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "filename taken by another subtitle",
                ),
            },
        );
        return;
    };
    let filename = subtitle.filename.clone();

    if let Err(source) = tokio::fs::write(ctx.root().join(&filename), content).await {
        warn!(path = %filename, error = %source, "Can't write subtitle");
        let mut file = hit.file.lock().await;
        if inserted {
            file.subtitles.retain(|s| s.filename != filename);
        }
        file.status.fail(
            Stage::Subtitles,
            ItemError::SubtitleSave {
                path: filename,
                source,
            },
        );
        return;
    }

    let language = subtitle.language;
    ctx.save(Entity::Subtitle(subtitle)).await;
    ImportContext::bump(&ctx.counters.subtitles_downloaded);
    info!(path = %filename, language = %language, "Saved subtitle");
}
