use super::file::FileRef;
use super::language::Language;
use super::status::StageStatus;
use crate::domain::{ExternalId, ItemKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type ShowRef = Arc<Mutex<Show>>;
pub type SeriesRef = Arc<Mutex<Series>>;

/// Fields shared by movies, episodes and series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonData {
    pub external_id: ExternalId,
    pub title: String,
    pub year: i32,
    /// Region or language → title.
    pub other_titles: BTreeMap<String, String>,
    pub duration: Duration,
    pub plot: String,
    pub plot_medium: String,
    pub plot_long: String,
    pub poster_url: String,
    /// 0–10.
    pub rating: f32,
    pub votes: u32,
    pub languages: Vec<Language>,
}

impl CommonData {
    #[must_use]
    pub const fn new(external_id: ExternalId) -> Self {
        Self {
            external_id,
            title: String::new(),
            year: 0,
            other_titles: BTreeMap::new(),
            duration: Duration::ZERO,
            plot: String::new(),
            plot_medium: String::new(),
            plot_long: String::new(),
            poster_url: String::new(),
            rating: 0.0,
            votes: 0,
            languages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeData {
    pub season: u32,
    pub episode: u32,
    /// Parent series, when the metadata names one.
    pub series_id: Option<ExternalId>,
}

/// A movie or a single episode of a series.
#[derive(Debug, Clone)]
pub struct Show {
    pub common: CommonData,
    pub kind: ItemKind,
    pub release_date: Option<NaiveDate>,
    /// Movies only.
    pub tagline: String,
    /// Episodes only.
    pub episode: Option<EpisodeData>,
    pub files: Vec<FileRef>,
    pub status: StageStatus,
}

impl Show {
    #[must_use]
    pub const fn new(external_id: ExternalId) -> Self {
        Self {
            common: CommonData::new(external_id),
            kind: ItemKind::Movie,
            release_date: None,
            tagline: String::new(),
            episode: None,
            files: Vec::new(),
            status: StageStatus::new(),
        }
    }

    #[must_use]
    pub fn into_ref(self) -> ShowRef {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub const fn external_id(&self) -> ExternalId {
        self.common.external_id
    }

    /// Adds a file unless that exact handle is already attached.
    pub fn attach_file(&mut self, file: &FileRef) {
        if !self.files.iter().any(|f| Arc::ptr_eq(f, file)) {
            self.files.push(file.clone());
        }
    }
}

/// A series; its episodes are [`Show`]s, in the order they were discovered.
#[derive(Debug, Clone)]
pub struct Series {
    pub common: CommonData,
    pub episodes: Vec<ShowRef>,
    pub status: StageStatus,
}

impl Series {
    #[must_use]
    pub const fn new(external_id: ExternalId) -> Self {
        Self {
            common: CommonData::new(external_id),
            episodes: Vec::new(),
            status: StageStatus::new(),
        }
    }

    #[must_use]
    pub fn into_ref(self) -> SeriesRef {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub const fn external_id(&self) -> ExternalId {
        self.common.external_id
    }
}
