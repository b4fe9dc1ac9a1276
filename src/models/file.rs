use super::status::StageStatus;
use super::subtitle::Subtitle;
use crate::domain::ExternalId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to a [`VideoFile`]; the mutex is the per-entity lock.
pub type FileRef = Arc<Mutex<VideoFile>>;

/// A video file on disk, identified by its path relative to the library root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoFile {
    pub path: String,

    pub size: u64,

    /// Content fingerprint used for lookups in the subtitle service.
    pub fingerprint: u64,

    /// Show this file was identified as, if any.
    pub show_id: Option<ExternalId>,

    pub status: StageStatus,

    pub subtitles: Vec<Subtitle>,
}

impl VideoFile {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn into_ref(self) -> FileRef {
        Arc::new(Mutex::new(self))
    }

    /// File name without its directory.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The relative path with its extension stripped.
    #[must_use]
    pub fn path_without_extension(&self) -> &str {
        let name_start = self.path.rfind('/').map_or(0, |i| i + 1);
        match self.path[name_start..].rfind('.') {
            Some(0) | None => &self.path,
            Some(dot) => &self.path[..name_start + dot],
        }
    }

    /// Fingerprint formatted the way the subtitle service expects it.
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        format!("{:016x}", self.fingerprint)
    }
}
