use super::{ClientError, MetadataSource};
use crate::config::ImdbConfig;
use crate::domain::{ExternalId, ItemKind};
use crate::models::{CommonData, Language};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Parent reference carried by episodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShortItem {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i32,
}

/// Full record returned by the movie database API for one ID.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ItemData {
    pub id: u32,

    /// `None` when the API could not tell what the item is.
    #[serde(rename = "type", deserialize_with = "deserialize_kind")]
    pub kind: Option<ItemKind>,

    pub title: String,
    pub year: i32,
    pub other_titles: BTreeMap<String, String>,

    /// Nanoseconds.
    pub duration: u64,

    pub plot: String,
    pub plot_medium: String,
    pub plot_long: String,
    pub poster_url: String,
    pub rating: f32,
    pub votes: u32,
    pub languages: Vec<String>,

    /// RFC 3339 timestamp; movies and episodes only.
    pub release_date: Option<String>,

    pub tagline: String,

    pub season_number: u32,
    pub episode_number: u32,
    pub series: Option<ShortItem>,
}

/// The API sends the kind either as a name or as its numeric code
/// (0 unknown, 1 movie, 2 series, 3 episode).
fn deserialize_kind<'de, D>(deserializer: D) -> Result<Option<ItemKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Code(u8),
        Name(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Code(1)) => Some(ItemKind::Movie),
        Some(Raw::Code(2)) => Some(ItemKind::Series),
        Some(Raw::Code(3)) => Some(ItemKind::Episode),
        Some(Raw::Name(name)) => match name.to_ascii_lowercase().as_str() {
            "movie" => Some(ItemKind::Movie),
            "series" => Some(ItemKind::Series),
            "episode" => Some(ItemKind::Episode),
            _ => None,
        },
        _ => None,
    })
}

impl ItemData {
    /// Fields shared by every kind of item, keyed by `id`.
    #[must_use]
    pub fn common(&self, id: ExternalId) -> CommonData {
        let languages = self
            .languages
            .iter()
            .filter_map(|code| match code.parse::<Language>() {
                Ok(language) => Some(language),
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping language");
                    None
                }
            })
            .collect();

        CommonData {
            external_id: id,
            title: self.title.clone(),
            year: self.year,
            other_titles: self.other_titles.clone(),
            duration: Duration::from_nanos(self.duration),
            plot: self.plot.clone(),
            plot_medium: self.plot_medium.clone(),
            plot_long: self.plot_long.clone(),
            poster_url: self.poster_url.clone(),
            rating: self.rating,
            votes: self.votes,
            languages,
        }
    }

    /// The zero timestamp (year 1) means the date is unknown.
    #[must_use]
    pub fn release_date(&self) -> Option<NaiveDate> {
        let raw = self.release_date.as_deref()?;
        let date = NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()?;
        (date > NaiveDate::from_ymd_opt(1, 1, 1)?).then_some(date)
    }

    #[must_use]
    pub fn series_id(&self) -> Option<ExternalId> {
        self.series.as_ref().and_then(|s| ExternalId::new(s.id))
    }
}

/// Client for the JSON front end of the movie database.
pub struct ImdbClient {
    client: Client,
    base_url: String,
}

impl ImdbClient {
    pub fn new(config: &ImdbConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent("mvm/0.1")
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for ImdbClient {
    async fn item(&self, id: ExternalId) -> Result<ItemData, ClientError> {
        let url = format!("{}/item?id={}", self.base_url, id.value());

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }

        let body = response.text().await?;
        let item: ItemData = serde_json::from_str(&body)?;
        debug!(id = %id, title = %item.title, "Fetched item");
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_movie() {
        let json = r#"{
            "id": 403358,
            "type": 1,
            "title": "Nochnoy dozor",
            "year": 2004,
            "other_titles": {"USA": "Night Watch"},
            "duration": 6840000000000,
            "plot": "A fantasy-thriller.",
            "poster_url": "http://example.com/p.jpg",
            "rating": 6.5,
            "votes": 51000,
            "languages": ["ru", "de"],
            "release_date": "2004-07-08T00:00:00Z",
            "tagline": "All that stands between light and darkness is the Night Watch.",
            "series": null
        }"#;

        let item: ItemData = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, Some(ItemKind::Movie));

        let id = ExternalId::new(403_358).unwrap();
        let common = item.common(id);
        assert_eq!(common.title, "Nochnoy dozor");
        assert_eq!(common.duration, Duration::from_secs(114 * 60));
        assert_eq!(common.languages.len(), 2);
        assert!((common.rating - 6.5).abs() < f32::EPSILON);
        assert_eq!(common.other_titles["USA"], "Night Watch");
        assert_eq!(item.release_date(), NaiveDate::from_ymd_opt(2004, 7, 8));
        assert!(item.series_id().is_none());
    }

    #[test]
    fn test_parse_episode() {
        let json = r#"{
            "id": 1910272,
            "type": "episode",
            "title": "Pilot",
            "year": 2011,
            "season_number": 1,
            "episode_number": 1,
            "release_date": "0001-01-01T00:00:00Z",
            "series": {"id": 1520211, "title": "The Walking Dead", "type": 2, "year": 2010}
        }"#;

        let item: ItemData = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, Some(ItemKind::Episode));
        assert_eq!(item.season_number, 1);
        assert_eq!(item.series_id(), ExternalId::new(1_520_211));
        assert_eq!(item.release_date(), None);
    }

    #[test]
    fn test_unknown_kind() {
        let item: ItemData = serde_json::from_str(r#"{"id": 5, "type": 0}"#).unwrap();
        assert_eq!(item.kind, None);
        let item: ItemData = serde_json::from_str(r#"{"id": 5}"#).unwrap();
        assert_eq!(item.kind, None);
    }
}
