use super::language::Language;
use serde::{Deserialize, Serialize};

/// A downloaded subtitle, written next to the video file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    /// Destination path on disk; unique.
    pub filename: String,

    /// Content hash reported by the subtitle service.
    pub hash: String,

    pub language: Language,

    pub hearing_impaired: bool,

    /// Lower is better.
    pub score: u64,

    /// File format, e.g. `srt`.
    pub format: String,

    /// Relative path of the owning [`super::VideoFile`].
    pub video_file: String,
}
