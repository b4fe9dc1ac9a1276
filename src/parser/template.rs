use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

const PLACEHOLDERS: &[&str] = &["{Path}", "{Language}", "{Score}", "{Format}"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {0} in filename template")]
    UnknownPlaceholder(String),

    #[error("filename template must contain {{Path}}")]
    MissingPath,
}

/// Values substituted into a [`FilenameTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct SubtitleName<'a> {
    /// Video file path with its extension stripped.
    pub path: &'a str,
    pub language: &'a str,
    pub score: u64,
    pub format: &'a str,
}

/// Destination filename pattern for downloaded subtitles, e.g.
/// `{Path}.{Language}.{Score}.{Format}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilenameTemplate(String);

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("Invalid regex"))
}

impl FilenameTemplate {
    pub fn parse(format: &str) -> Result<Self, TemplateError> {
        for m in placeholder_regex().find_iter(format) {
            if !PLACEHOLDERS.contains(&m.as_str()) {
                return Err(TemplateError::UnknownPlaceholder(m.as_str().to_string()));
            }
        }

        if !format.contains("{Path}") {
            return Err(TemplateError::MissingPath);
        }

        Ok(Self(format.to_string()))
    }

    #[must_use]
    pub fn render(&self, name: &SubtitleName<'_>) -> String {
        self.0
            .replace("{Path}", name.path)
            .replace("{Language}", name.language)
            .replace("{Score}", &name.score.to_string())
            .replace("{Format}", name.format)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self(crate::constants::subtitles::DEFAULT_FILENAME.to_string())
    }
}

impl FromStr for FilenameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FilenameTemplate {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FilenameTemplate> for String {
    fn from(template: FilenameTemplate) -> Self {
        template.0
    }
}

impl fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
