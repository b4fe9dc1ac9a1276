use super::{ImportContext, ImportError, ItemError, SharedReceiver, shared};
use crate::constants::fingerprint::CHUNK_SIZE;
use crate::models::{FileRef, Stage};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Content fingerprint of the file at `path`.
///
/// The sum of the little-endian 64-bit words of the first and last 64 KiB,
/// plus the file size, all wrapping. Files shorter than 128 KiB only
/// contribute their head.
pub fn fingerprint(path: &Path) -> io::Result<u64> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    fingerprint_reader(&mut file, size)
}

/// [`fingerprint`] over any seekable reader of `size` bytes.
pub fn fingerprint_reader<R: Read + Seek>(reader: &mut R, size: u64) -> io::Result<u64> {
    let mut buf = vec![0u8; usize::try_from(CHUNK_SIZE.min(size)).unwrap_or(0)];

    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut buf)?;
    let mut sum = sum_words(&buf);

    if size >= 2 * CHUNK_SIZE {
        reader.seek(SeekFrom::Start(size - CHUNK_SIZE))?;
        reader.read_exact(&mut buf)?;
        sum = sum.wrapping_add(sum_words(&buf));
    }

    Ok(sum.wrapping_add(size))
}

/// Trailing bytes that do not fill a word are ignored.
fn sum_words(buf: &[u8]) -> u64 {
    buf.chunks_exact(8).fold(0u64, |acc, word| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(word);
        acc.wrapping_add(u64::from_le_bytes(bytes))
    })
}

/// Absolute form of `path` with `.` and `..` resolved lexically. A `..` at
/// the filesystem root stays at the root.
pub(super) fn normalize(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// `path` relative to `root`, `/`-separated. The root itself and anything
/// outside it are rejected.
pub(super) fn relative_path(root: &Path, path: &Path) -> Result<String, ItemError> {
    let invalid = || ItemError::InvalidPath(path.display().to_string());

    let absolute = normalize(path).map_err(|_| invalid())?;
    let relative = absolute.strip_prefix(root).map_err(|_| invalid())?;

    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().ok_or_else(invalid),
            _ => Err(invalid()),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

pub(super) async fn run(
    ctx: Arc<ImportContext>,
    paths: mpsc::Receiver<PathBuf>,
    files: mpsc::Sender<FileRef>,
) {
    let paths = shared(paths);
    let workers = ctx.config().importer.probe_workers.max(1);
    debug!(stage = "prober", workers, "Stage started");

    let handles: Vec<_> = (0..workers)
        .map(|worker_id| tokio::spawn(worker(ctx.clone(), worker_id, paths.clone(), files.clone())))
        .collect();
    drop(files);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(stage = "prober", error = %e, "Worker failed");
        }
    }
    debug!(stage = "prober", "Stage finished");
}

async fn worker(
    ctx: Arc<ImportContext>,
    worker_id: usize,
    paths: SharedReceiver<PathBuf>,
    files: mpsc::Sender<FileRef>,
) {
    while let Some(path) = ctx.recv(&paths).await {
        let Some(file) = probe(&ctx, &path).await else {
            continue;
        };

        ImportContext::bump(&ctx.counters.files_probed);
        if !ctx.send(&files, file).await {
            break;
        }
    }
    debug!(stage = "prober", worker_id, "Worker finished");
}

/// `None` when no record could be made for `path`.
async fn probe(ctx: &ImportContext, path: &Path) -> Option<FileRef> {
    let relative = match relative_path(ctx.root(), path) {
        Ok(relative) => relative,
        Err(e) => {
            warn!(path = %path.display(), root = %ctx.root().display(), error = %e, "Skipping file");
            ImportContext::bump(&ctx.counters.invalid_paths);
            return None;
        }
    };

    let file = match ctx.library().get_or_create_file_by_path(&relative).await {
        Ok(file) => file,
        Err(source) => {
            ctx.report_error(ImportError::Library {
                key: relative,
                source,
            })
            .await;
            return None;
        }
    };

    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(path = %relative, error = %e, "Can't stat file");
            file.lock()
                .await
                .status
                .fail(Stage::File, ItemError::FileStat(e));
            return Some(file);
        }
    };

    let owned = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || fingerprint(&owned))
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)));

    {
        let mut guard = file.lock().await;
        guard.size = size;
        match hash {
            Ok(hash) => {
                guard.fingerprint = hash;
                guard.status.succeed(Stage::File);
                debug!(path = %relative, size, fingerprint = %guard.fingerprint_hex(), "Probed file");
            }
            Err(e) => {
                warn!(path = %relative, error = %e, "Can't fingerprint file");
                guard.status.fail(Stage::File, ItemError::Hash(e));
            }
        }
    }

    Some(file)
}
