use super::ImportContext;
use crate::constants::VIDEO_EXTENSIONS;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(super) fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Expands directories into the video files below them. Plain files are
/// passed through whatever their extension.
pub(super) fn spawn(
    ctx: Arc<ImportContext>,
    paths: Vec<PathBuf>,
    tx: mpsc::Sender<PathBuf>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        debug!(stage = "walker", "Stage started");
        let mut sent = 0usize;

        'paths: for path in paths {
            if !path.is_dir() {
                if ctx.is_stopped() || tx.blocking_send(path).is_err() {
                    break;
                }
                sent += 1;
                continue;
            }

            let entries = walkdir::WalkDir::new(&path).follow_links(false).into_iter();
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };

                if !entry.file_type().is_file() || !is_video(entry.path()) {
                    continue;
                }

                if ctx.is_stopped() || tx.blocking_send(entry.into_path()).is_err() {
                    break 'paths;
                }
                sent += 1;
            }
        }

        debug!(stage = "walker", files = sent, "Stage finished");
    })
}
