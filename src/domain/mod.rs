//! Domain primitives shared by the library, the clients and the importer.
//!
//! Identifiers are newtypes so an external metadata ID can never be mixed up
//! with a row count, a season number or a fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a movie, episode or series in the external movie database.
///
/// Always non-zero. It renders as a bare number; [`ExternalId::imdb_tag`]
/// renders the `tt`-prefixed form used by the movie database's URLs.
///
/// # Examples
///
/// ```rust
/// use mvm::domain::ExternalId;
///
/// let id: ExternalId = "tt0403358".parse().unwrap();
/// assert_eq!(id.value(), 403_358);
/// assert_eq!(id.imdb_tag(), "tt0403358");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ExternalId(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalIdError {
    #[error("external ID must be non-zero")]
    Zero,

    #[error("can't parse external ID from {0:?}")]
    Malformed(String),
}

impl ExternalId {
    /// Returns `None` for zero, which is never a valid ID.
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The `tt0000000` form, zero-padded to at least seven digits.
    #[must_use]
    pub fn imdb_tag(&self) -> String {
        format!("tt{:07}", self.0)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ExternalId> for u32 {
    fn from(id: ExternalId) -> Self {
        id.0
    }
}

impl TryFrom<u32> for ExternalId {
    type Error = ExternalIdError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::new(id).ok_or(ExternalIdError::Zero)
    }
}

impl TryFrom<i32> for ExternalId {
    type Error = ExternalIdError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        let id = u32::try_from(id).map_err(|_| ExternalIdError::Malformed(id.to_string()))?;
        Self::try_from(id)
    }
}

impl FromStr for ExternalId {
    type Err = ExternalIdError;

    /// Accepts `403358`, `tt0403358` and movie-database URLs such as
    /// `https://www.imdb.com/title/tt0403358/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let digits = last.strip_prefix("tt").unwrap_or(last);

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExternalIdError::Malformed(s.to_string()));
        }

        let id: u32 = digits
            .parse()
            .map_err(|_| ExternalIdError::Malformed(s.to_string()))?;
        Self::try_from(id)
    }
}

/// What kind of record an external ID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Movie,
    Series,
    Episode,
}

impl ItemKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
            Self::Episode => "episode",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
