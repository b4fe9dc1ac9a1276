use super::{Batch, ImportContext, ItemError, SharedReceiver, ShowWithFile, shared};
use crate::clients::MovieMatch;
use crate::domain::ExternalId;
use crate::models::{FileRef, Stage, StepStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(super) async fn run(
    ctx: Arc<ImportContext>,
    files: mpsc::Receiver<FileRef>,
    pairs: mpsc::Sender<ShowWithFile>,
    done: mpsc::Sender<FileRef>,
) {
    let files = shared(files);
    let workers = ctx.config().importer.osdb.max_requests.max(1);
    debug!(stage = "fingerprint_identify", workers, "Stage started");

    let handles: Vec<_> = (0..workers)
        .map(|worker_id| {
            tokio::spawn(worker(
                ctx.clone(),
                worker_id,
                files.clone(),
                pairs.clone(),
                done.clone(),
            ))
        })
        .collect();
    drop(pairs);
    drop(done);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(stage = "fingerprint_identify", error = %e, "Worker failed");
        }
    }
    debug!(stage = "fingerprint_identify", "Stage finished");
}

async fn worker(
    ctx: Arc<ImportContext>,
    worker_id: usize,
    files: SharedReceiver<FileRef>,
    pairs: mpsc::Sender<ShowWithFile>,
    done: mpsc::Sender<FileRef>,
) {
    let mut batch = Batch::new(ctx.config().importer.osdb.max_per_request);

    while let Some(file) = ctx.recv(&files).await {
        if !needs_lookup(&file).await {
            if !ctx.send(&done, file).await {
                return;
            }
            continue;
        }

        if let Some(full) = batch.push(file)
            && !identify_batch(&ctx, worker_id, full, &pairs, &done).await
        {
            return;
        }
    }

    if !ctx.is_stopped()
        && let Some(rest) = batch.take()
    {
        identify_batch(&ctx, worker_id, rest, &pairs, &done).await;
    }
    debug!(stage = "fingerprint_identify", worker_id, "Worker finished");
}

/// Files without a fingerprint, and files the operator chose to skip, go
/// straight to the aggregator.
async fn needs_lookup(file: &FileRef) -> bool {
    let file = file.lock().await;
    file.status.get(Stage::File).is_success()
        && *file.status.get(Stage::FingerprintIdentify) != StepStatus::Skipped
}

/// Returns `false` once downstream is gone.
async fn identify_batch(
    ctx: &ImportContext,
    worker_id: usize,
    files: Vec<FileRef>,
    pairs: &mpsc::Sender<ShowWithFile>,
    done: &mpsc::Sender<FileRef>,
) -> bool {
    let mut hashes = Vec::with_capacity(files.len());
    for file in &files {
        hashes.push(file.lock().await.fingerprint);
    }

    debug!(worker_id, batch_size = files.len(), "Looking up fingerprints");
    let matches = match ctx.clients.fingerprints.best_movies_by_hashes(&hashes).await {
        Ok(matches) if matches.len() == files.len() => matches,
        Ok(matches) => {
            let message = format!(
                "lookup returned {} results for {} files",
                matches.len(),
                files.len()
            );
            return fail_batch(ctx, files, &message, done).await;
        }
        Err(e) => {
            warn!(worker_id, batch_size = files.len(), error = %e, "Fingerprint lookup failed");
            return fail_batch(ctx, files, &e.to_string(), done).await;
        }
    };

    for (file, found) in files.into_iter().zip(matches) {
        if let Some(show) = identify(ctx, &file, found).await {
            ImportContext::bump(&ctx.counters.files_identified);
            let pair = ShowWithFile {
                show,
                file: file.clone(),
            };
            if !ctx.send(pairs, pair).await {
                return false;
            }
        }

        if !ctx.send(done, file).await {
            return false;
        }
    }
    true
}

async fn fail_batch(
    ctx: &ImportContext,
    files: Vec<FileRef>,
    message: &str,
    done: &mpsc::Sender<FileRef>,
) -> bool {
    for file in files {
        file.lock().await.status.fail(
            Stage::FingerprintIdentify,
            ItemError::Identify(message.to_string()),
        );
        if !ctx.send(done, file).await {
            return false;
        }
    }
    true
}

/// Attaches `file` to the show `found` points at. On failure the error is
/// recorded on the file and `None` returned.
async fn identify(
    ctx: &ImportContext,
    file: &FileRef,
    found: Option<MovieMatch>,
) -> Option<crate::models::ShowRef> {
    let result = match found {
        None => Err(ItemError::Identify("show not found".to_string())),
        Some(found) => match found.imdb_id.parse::<ExternalId>() {
            Err(e) => Err(ItemError::Identify(e.to_string())),
            Ok(id) => ctx
                .library()
                .get_or_create_show_by_external_id(id)
                .await
                .map(|show| (id, show, found))
                .map_err(|e| ItemError::Identify(e.to_string())),
        },
    };

    let mut guard = file.lock().await;
    match result {
        Ok((id, show, found)) => {
            {
                let mut show_guard = show.lock().await;
                show_guard.attach_file(file);
                if show_guard.common.title.is_empty() {
                    show_guard.common.title = found.title;
                }
                if show_guard.common.year == 0 {
                    show_guard.common.year = found.year.unwrap_or_default();
                }
            }
            guard.show_id = Some(id);
            guard.status.succeed(Stage::FingerprintIdentify);
            info!(path = %guard.path, show_id = %id, "Identified file");
            Some(show)
        }
        Err(e) => {
            warn!(path = %guard.path, error = %e, "Can't identify file");
            guard.status.fail(Stage::FingerprintIdentify, e);
            None
        }
    }
}
