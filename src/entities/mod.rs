pub mod prelude;

pub mod series;
pub mod shows;
pub mod subtitles;
pub mod video_files;
