pub mod file;
pub mod language;
pub mod show;
pub mod status;
pub mod subtitle;

pub use file::{FileRef, VideoFile};
pub use language::{Language, LanguageError, parse_languages};
pub use show::{CommonData, EpisodeData, Series, SeriesRef, Show, ShowRef};
pub use status::{Stage, StageStatus, StepStatus};
pub use subtitle::Subtitle;
