use super::{ImportContext, ShowWithFile};
use crate::library::Entity;
use crate::models::{FileRef, Stage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Saves everything received until the channel closes.
pub(super) async fn save_all<T: Into<Entity> + Send>(
    ctx: Arc<ImportContext>,
    mut items: mpsc::Receiver<T>,
) {
    let mut saved = 0usize;
    while let Some(item) = ctx.recv_one(&mut items).await {
        ctx.save(item.into()).await;
        saved += 1;
    }
    debug!(stage = "sink", saved, "Sink drained");
}

/// Saves each show and passes the pair on to the subtitle stage.
pub(super) async fn save_shows_and_forward(
    ctx: Arc<ImportContext>,
    mut pairs: mpsc::Receiver<ShowWithFile>,
    out: mpsc::Sender<ShowWithFile>,
) {
    while let Some(pair) = ctx.recv_one(&mut pairs).await {
        ctx.save(Entity::Show(pair.show.clone())).await;
        if !ctx.send(&out, pair).await {
            break;
        }
    }
}

/// Saves every identified file and returns the ones the operator has to
/// look at: those whose probe or fingerprint lookup failed.
pub(super) async fn collect_files(
    ctx: &ImportContext,
    mut files: mpsc::Receiver<FileRef>,
) -> Vec<FileRef> {
    let mut with_errors = Vec::new();

    while let Some(file) = ctx.recv_one(&mut files).await {
        let failed = {
            let guard = file.lock().await;
            let failed = guard.status.get(Stage::File).is_error()
                || guard.status.get(Stage::FingerprintIdentify).is_error();
            if failed {
                warn!(path = %guard.path, "File needs attention");
            }
            failed
        };

        ctx.save(Entity::File(file.clone())).await;
        if failed {
            with_errors.push(file);
        }
    }

    with_errors
}
