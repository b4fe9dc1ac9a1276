pub mod template;

pub use template::{FilenameTemplate, SubtitleName, TemplateError};
