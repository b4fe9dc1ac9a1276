pub use super::series::Entity as Series;
pub use super::shows::Entity as Shows;
pub use super::subtitles::Entity as Subtitles;
pub use super::video_files::Entity as VideoFiles;
