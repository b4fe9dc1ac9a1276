use super::{ImportContext, ItemError, SharedReceiver, ShowWithFile, shared};
use crate::domain::{ExternalId, ItemKind};
use crate::models::{EpisodeData, SeriesRef, ShowRef, Stage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Series seen during this run, keyed by external ID. Holding the lock while
/// a series is created and fetched keeps it to one fetch per run.
type SeriesCache = Arc<Mutex<HashMap<ExternalId, SeriesRef>>>;

pub(super) async fn run(
    ctx: Arc<ImportContext>,
    shows: mpsc::Receiver<ShowWithFile>,
    pairs: mpsc::Sender<ShowWithFile>,
    series: mpsc::Sender<SeriesRef>,
) {
    let shows = shared(shows);
    let cache = SeriesCache::default();
    let workers = ctx.config().importer.imdb.max_requests.max(1);
    debug!(stage = "metadata_identify", workers, "Stage started");

    let handles: Vec<_> = (0..workers)
        .map(|worker_id| {
            tokio::spawn(worker(
                ctx.clone(),
                worker_id,
                shows.clone(),
                cache.clone(),
                pairs.clone(),
                series.clone(),
            ))
        })
        .collect();
    drop(pairs);
    drop(series);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(stage = "metadata_identify", error = %e, "Worker failed");
        }
    }
    debug!(stage = "metadata_identify", "Stage finished");
}

async fn worker(
    ctx: Arc<ImportContext>,
    worker_id: usize,
    shows: SharedReceiver<ShowWithFile>,
    cache: SeriesCache,
    pairs: mpsc::Sender<ShowWithFile>,
    series_out: mpsc::Sender<SeriesRef>,
) {
    while let Some(pair) = ctx.recv(&shows).await {
        let created = process(&ctx, &pair, &cache).await;
        ImportContext::bump(&ctx.counters.shows_processed);

        if !ctx.send(&pairs, pair).await {
            break;
        }
        if let Some(series) = created {
            ImportContext::bump(&ctx.counters.series_created);
            if !ctx.send(&series_out, series).await {
                break;
            }
        }
    }
    debug!(stage = "metadata_identify", worker_id, "Worker finished");
}

/// Fills in the show and, for episodes, its series. Returns the series if
/// this call is the one that put it in the cache.
async fn process(ctx: &ImportContext, pair: &ShowWithFile, cache: &SeriesCache) -> Option<SeriesRef> {
    let id = pair.show.lock().await.external_id();

    let item = match ctx.clients.metadata.item(id).await {
        Ok(item) => item,
        Err(e) => {
            warn!(show_id = %id, error = %e, "Can't fetch show metadata");
            let message = ItemError::MetadataFetch(e.to_string()).to_string();
            pair.show
                .lock()
                .await
                .status
                .fail(Stage::MetadataIdentify, &message);
            pair.file
                .lock()
                .await
                .status
                .fail(Stage::MetadataIdentify, &message);
            return None;
        }
    };

    let series_id = {
        let mut show = pair.show.lock().await;
        show.common = item.common(id);
        show.release_date = item.release_date();
        show.tagline.clone_from(&item.tagline);
        show.kind = item.kind.unwrap_or_default();
        show.episode = (show.kind == ItemKind::Episode).then(|| EpisodeData {
            season: item.season_number,
            episode: item.episode_number,
            series_id: item.series_id(),
        });
        let series_id = show.episode.and_then(|e| e.series_id);
        show.status.succeed(Stage::MetadataIdentify);
        info!(show_id = %id, title = %show.common.title, kind = %show.kind, "Fetched show metadata");
        series_id
    };
    pair.file.lock().await.status.succeed(Stage::MetadataIdentify);

    let series_id = series_id?;
    let (series, created) = cached_series(ctx, cache, series_id, &pair.show).await?;

    let mut guard = series.lock().await;
    if !guard.episodes.iter().any(|e| Arc::ptr_eq(e, &pair.show)) {
        guard.episodes.push(pair.show.clone());
    }
    drop(guard);

    created.then_some(series)
}

/// The series for `id`, and whether this call created the cache entry.
async fn cached_series(
    ctx: &ImportContext,
    cache: &SeriesCache,
    id: ExternalId,
    episode: &ShowRef,
) -> Option<(SeriesRef, bool)> {
    let mut cache = cache.lock().await;
    if let Some(series) = cache.get(&id) {
        return Some((series.clone(), false));
    }

    let series = match ctx.library().get_or_create_series_by_external_id(id).await {
        Ok(series) => series,
        Err(e) => {
            warn!(series_id = %id, error = %e, "Can't get series from library");
            episode.lock().await.status.fail(
                Stage::MetadataIdentify,
                ItemError::MetadataFetch(format!("unable to get series from library: {e}")),
            );
            return None;
        }
    };

    match ctx.clients.metadata.item(id).await {
        Ok(item) => {
            let mut guard = series.lock().await;
            guard.common = item.common(id);
            guard.status.succeed(Stage::MetadataIdentify);
            info!(series_id = %id, title = %guard.common.title, "Fetched series metadata");
        }
        Err(e) => {
            warn!(series_id = %id, error = %e, "Can't fetch series metadata");
            series
                .lock()
                .await
                .status
                .fail(Stage::MetadataIdentify, ItemError::MetadataFetch(e.to_string()));
        }
    }

    cache.insert(id, series.clone());
    Some((series, true))
}
