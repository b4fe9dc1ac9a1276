use crate::clients::ClientError;
use crate::library::LibraryError;
use thiserror::Error;

/// Per-item failure. Rendered into the item's stage status; never stops the
/// pipeline.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unable to get file size: {0}")]
    FileStat(std::io::Error),

    #[error("unable to compute fingerprint: {0}")]
    Hash(std::io::Error),

    #[error("can't identify show: {0}")]
    Identify(String),

    #[error("error getting metadata: {0}")]
    MetadataFetch(String),

    #[error("subtitle search failed: {0}")]
    SubtitleSearch(ClientError),

    #[error("subtitle download failed: {0}")]
    SubtitleDownload(String),

    #[error("can't save subtitle {path}: {source}")]
    SubtitleSave {
        path: String,
        source: std::io::Error,
    },
}

/// Failure that needs an operator's attention, reported on the context's
/// error channel.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("can't save {kind}: {source}")]
    Persistence {
        kind: &'static str,
        #[source]
        source: LibraryError,
    },

    #[error("library lookup failed for {key}: {source}")]
    Library {
        key: String,
        #[source]
        source: LibraryError,
    },

    #[error("import has already been stopped")]
    AlreadyStopped,
}
