//! Clients for the external services the importer talks to, and the traits
//! the pipeline sees them through.

pub mod imdb;
pub mod opensubtitles;
pub mod xmlrpc;

pub use imdb::{ImdbClient, ItemData};
pub use opensubtitles::OpenSubtitlesClient;

use crate::domain::ExternalId;
use crate::models::Language;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("XML-RPC fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("Service returned status {0:?}")]
    ServiceStatus(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Can't decompress subtitle: {0}")]
    Decompress(#[from] std::io::Error),
}

/// Best guess of the subtitle service for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieMatch {
    /// Movie database ID as sent by the service, e.g. `"0403358"`.
    pub imdb_id: String,
    pub title: String,
    pub year: Option<i32>,
}

/// How to look up subtitles for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleQuery {
    Fingerprint { hash: u64, size: u64 },
    FileName(String),
    ExternalId(ExternalId),
    Episode {
        title: String,
        season: u32,
        episode: u32,
    },
}

/// A subtitle found by a search, not downloaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleHandle {
    /// Service-side ID used to download the file.
    pub id: String,
    pub hash: String,
    pub language: Language,
    pub hearing_impaired: bool,
    /// Popularity; more is better.
    pub downloads: u64,
    /// File extension, e.g. `srt`.
    pub format: String,
}

#[async_trait]
pub trait FingerprintLookup: Send + Sync {
    /// One entry per input hash, in the same order.
    async fn best_movies_by_hashes(
        &self,
        hashes: &[u64],
    ) -> Result<Vec<Option<MovieMatch>>, ClientError>;
}

#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    async fn search(
        &self,
        query: &SubtitleQuery,
        language: Language,
        limit: usize,
    ) -> Result<Vec<SubtitleHandle>, ClientError>;

    /// Subtitle contents, in the same order as `handles`.
    async fn download(&self, handles: &[SubtitleHandle]) -> Result<Vec<Vec<u8>>, ClientError>;
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn item(&self, id: ExternalId) -> Result<ItemData, ClientError>;
}
