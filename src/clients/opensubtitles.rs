use super::xmlrpc::{self, Value};
use super::{
    ClientError, FingerprintLookup, MovieMatch, SubtitleHandle, SubtitleProvider, SubtitleQuery,
};
use crate::config::OsdbConfig;
use crate::models::Language;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// XML-RPC client for opensubtitles.org.
///
/// Logs in on first use and keeps the session token for later calls.
pub struct OpenSubtitlesClient {
    client: Client,
    config: OsdbConfig,
    token: Mutex<Option<String>>,
}

impl OpenSubtitlesClient {
    pub fn new(config: OsdbConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, ClientError> {
        let body = xmlrpc::encode_call(method, params);

        let response = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }

        let text = response.text().await?;
        let value = xmlrpc::decode_response(&text)?;
        check_status(&value)?;
        Ok(value)
    }

    async fn token(&self) -> Result<String, ClientError> {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .call(
                "LogIn",
                &[
                    Value::from(self.config.username.as_str()),
                    Value::from(self.config.password.as_str()),
                    Value::from(self.config.language.as_str()),
                    Value::from(self.config.user_agent.as_str()),
                ],
            )
            .await
            .map_err(|e| ClientError::Login(e.to_string()))?;

        let new_token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Login("no token in response".to_string()))?
            .to_string();

        info!(
            anonymous = self.config.username.is_empty(),
            "Logged in to opensubtitles.org"
        );
        *token = Some(new_token.clone());
        Ok(new_token)
    }
}

/// Every response carries a `status` like `"200 OK"`.
fn check_status(response: &Value) -> Result<(), ClientError> {
    match response.get("status").and_then(Value::as_str) {
        Some(status) if !status.starts_with("200") => {
            Err(ClientError::ServiceStatus(status.to_string()))
        }
        _ => Ok(()),
    }
}

fn field(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Picks the most seen movie for each hash.
fn best_matches(data: &Value, hashes: &[String]) -> Vec<Option<MovieMatch>> {
    hashes
        .iter()
        .map(|hash| {
            data.get(hash)
                .and_then(Value::as_array)?
                .iter()
                .max_by_key(|entry| entry.get("SeenCount").and_then(Value::as_i64).unwrap_or(0))
                .map(|entry| MovieMatch {
                    imdb_id: field(entry, "MovieImdbID"),
                    title: field(entry, "MovieName"),
                    year: entry
                        .get("MovieYear")
                        .and_then(Value::as_i64)
                        .and_then(|y| i32::try_from(y).ok()),
                })
        })
        .collect()
}

fn criteria(query: &SubtitleQuery, language: Language) -> Value {
    let mut criteria = BTreeMap::new();
    criteria.insert("sublanguageid".to_string(), Value::from(language.iso2()));

    match query {
        SubtitleQuery::Fingerprint { hash, size } => {
            criteria.insert("moviehash".to_string(), Value::from(format!("{hash:016x}")));
            criteria.insert("moviebytesize".to_string(), Value::from(size.to_string()));
        }
        SubtitleQuery::FileName(tag) => {
            criteria.insert("tag".to_string(), Value::from(tag.as_str()));
        }
        SubtitleQuery::ExternalId(id) => {
            criteria.insert("imdbid".to_string(), Value::from(format!("{:07}", id.value())));
        }
        SubtitleQuery::Episode {
            title,
            season,
            episode,
        } => {
            criteria.insert("query".to_string(), Value::from(title.as_str()));
            criteria.insert("season".to_string(), Value::from(season.to_string()));
            criteria.insert("episode".to_string(), Value::from(episode.to_string()));
        }
    }

    Value::Struct(criteria)
}

/// `data` is an array of hits, or `false` when nothing matched.
fn parse_handles(data: Option<&Value>, language: Language, limit: usize) -> Vec<SubtitleHandle> {
    let Some(entries) = data.and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| entry.get("IDSubtitleFile").is_some())
        .take(limit)
        .map(|entry| SubtitleHandle {
            id: field(entry, "IDSubtitleFile"),
            hash: field(entry, "SubHash"),
            language: field(entry, "SubLanguageID").parse().unwrap_or(language),
            hearing_impaired: entry.get("SubHearingImpaired").and_then(Value::as_i64) == Some(1),
            downloads: entry
                .get("SubDownloadsCnt")
                .and_then(Value::as_i64)
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0),
            format: field(entry, "SubFormat"),
        })
        .collect()
}

/// Subtitle bodies arrive gzipped and base64 encoded.
fn decode_subtitle(data: &Value) -> Result<Vec<u8>, ClientError> {
    let compressed = match data {
        Value::Base64(bytes) => bytes.clone(),
        Value::String(text) => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| ClientError::Decode(format!("bad base64: {e}")))?
        }
        other => {
            return Err(ClientError::Decode(format!(
                "unexpected subtitle payload {other:?}"
            )));
        }
    };

    let mut content = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut content)?;
    Ok(content)
}

#[async_trait]
impl FingerprintLookup for OpenSubtitlesClient {
    async fn best_movies_by_hashes(
        &self,
        hashes: &[u64],
    ) -> Result<Vec<Option<MovieMatch>>, ClientError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.token().await?;
        let hex: Vec<String> = hashes.iter().map(|h| format!("{h:016x}")).collect();

        let response = self
            .call(
                "CheckMovieHash2",
                &[
                    Value::from(token),
                    Value::Array(hex.iter().map(|h| Value::from(h.as_str())).collect()),
                ],
            )
            .await?;

        let data = response.get("data").cloned().unwrap_or(Value::Nil);
        let matches = best_matches(&data, &hex);
        debug!(
            requested = hashes.len(),
            found = matches.iter().flatten().count(),
            "Checked movie hashes"
        );
        Ok(matches)
    }
}

#[async_trait]
impl SubtitleProvider for OpenSubtitlesClient {
    async fn search(
        &self,
        query: &SubtitleQuery,
        language: Language,
        limit: usize,
    ) -> Result<Vec<SubtitleHandle>, ClientError> {
        let token = self.token().await?;

        let mut options = BTreeMap::new();
        options.insert(
            "limit".to_string(),
            Value::Int(i64::try_from(limit).unwrap_or(i64::MAX)),
        );

        let response = self
            .call(
                "SearchSubtitles",
                &[
                    Value::from(token),
                    Value::Array(vec![criteria(query, language)]),
                    Value::Struct(options),
                ],
            )
            .await?;

        Ok(parse_handles(response.get("data"), language, limit))
    }

    async fn download(&self, handles: &[SubtitleHandle]) -> Result<Vec<Vec<u8>>, ClientError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let token = self.token().await?;
        let ids: Vec<Value> = handles.iter().map(|h| Value::from(h.id.as_str())).collect();

        let response = self
            .call("DownloadSubtitles", &[Value::from(token), Value::Array(ids)])
            .await?;

        let mut by_id = HashMap::new();
        for entry in response
            .get("data")
            .and_then(Value::as_array)
            .unwrap_or_default()
        {
            if let Some(data) = entry.get("data") {
                by_id.insert(field(entry, "idsubtitlefile"), data);
            }
        }

        handles
            .iter()
            .map(|handle| {
                let data = by_id.get(&handle.id).ok_or_else(|| {
                    ClientError::Decode(format!("subtitle {} missing from download", handle.id))
                })?;
                decode_subtitle(data)
            })
            .collect()
    }
}
