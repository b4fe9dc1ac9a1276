use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One phase of the import pipeline. Every entity keeps a status per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    File,
    FingerprintIdentify,
    MetadataIdentify,
    Subtitles,
}

impl Stage {
    pub const ALL: [Self; 4] = [
        Self::File,
        Self::FingerprintIdentify,
        Self::MetadataIdentify,
        Self::Subtitles,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::FingerprintIdentify => "fingerprint_identify",
            Self::MetadataIdentify => "metadata_identify",
            Self::Subtitles => "subtitles",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum StepStatus {
    /// Not imported yet.
    #[default]
    Incomplete,
    /// Skipped by operator action.
    Skipped,
    Success,
    Error(String),
}

impl StepStatus {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete"),
            Self::Skipped => f.write_str("skipped"),
            Self::Success => f.write_str("success"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Stage → status map. A stage that never ran has no entry and reads as
/// [`StepStatus::Incomplete`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageStatus(BTreeMap<Stage, StepStatus>);

static INCOMPLETE: StepStatus = StepStatus::Incomplete;

impl StageStatus {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn get(&self, stage: Stage) -> &StepStatus {
        self.0.get(&stage).unwrap_or(&INCOMPLETE)
    }

    #[must_use]
    pub fn has_run(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    pub fn set(&mut self, stage: Stage, status: StepStatus) {
        self.0.insert(stage, status);
    }

    pub fn succeed(&mut self, stage: Stage) {
        self.set(stage, StepStatus::Success);
    }

    pub fn skip(&mut self, stage: Stage) {
        self.set(stage, StepStatus::Skipped);
    }

    pub fn fail(&mut self, stage: Stage, message: impl fmt::Display) {
        self.set(stage, StepStatus::Error(message.to_string()));
    }

    /// Stages that ended in an error, with their messages.
    pub fn errors(&self) -> impl Iterator<Item = (Stage, &str)> {
        self.0
            .iter()
            .filter_map(|(stage, status)| status.message().map(|m| (*stage, m)))
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}
