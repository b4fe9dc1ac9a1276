use crate::constants::osdb::{MAX_MOVIES_PER_REQUEST, MAX_SUBTITLES_PER_REQUEST};
use crate::models::Language;
use crate::parser::template::FilenameTemplate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory every imported file path is stored relative to.
    pub file_root: String,

    pub general: GeneralConfig,

    pub importer: ImporterConfig,

    pub library: LibraryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_root: ".".to_string(),
            general: GeneralConfig::default(),
            importer: ImporterConfig::default(),
            library: LibraryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    /// Number of tokio worker threads (default: 0)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Capacity of every queue between pipeline stages.
    pub buffer_size: usize,

    /// Files fingerprinted concurrently.
    pub probe_workers: usize,

    pub osdb: OsdbConfig,

    pub imdb: ImdbConfig,

    pub subtitles: SubtitlesConfig,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            probe_workers: 4,
            osdb: OsdbConfig::default(),
            imdb: ImdbConfig::default(),
            subtitles: SubtitlesConfig::default(),
        }
    }
}

/// opensubtitles.org XML-RPC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdbConfig {
    pub url: String,

    /// Leave blank to log in anonymously.
    pub username: String,

    pub password: String,

    pub user_agent: String,

    /// Language of the service's messages.
    pub language: String,

    /// Maximum number of parallel requests.
    pub max_requests: usize,

    /// Maximum number of hashes per lookup; the service caps this at 200.
    pub max_per_request: usize,

    /// Maximum number of subtitles per download call; the service caps this at 20.
    pub max_subtitles_per_request: usize,

    pub request_timeout_seconds: u64,
}

impl Default for OsdbConfig {
    fn default() -> Self {
        Self {
            url: crate::constants::osdb::DEFAULT_URL.to_string(),
            username: String::new(),
            password: String::new(),
            user_agent: "TemporaryUserAgent".to_string(),
            language: "en".to_string(),
            max_requests: 3,
            max_per_request: MAX_MOVIES_PER_REQUEST,
            max_subtitles_per_request: MAX_SUBTITLES_PER_REQUEST,
            request_timeout_seconds: 30,
        }
    }
}

/// Movie database JSON API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImdbConfig {
    pub url: String,

    /// Maximum number of parallel requests.
    pub max_requests: usize,

    pub request_timeout_seconds: u64,
}

impl Default for ImdbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8085".to_string(),
            max_requests: 8,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitlesConfig {
    /// Languages to download, e.g. `["en", "bg"]`. Empty disables subtitles.
    pub languages: Vec<Language>,

    pub filename: FilenameTemplate,

    pub subtitles_per_language: usize,

    /// Maximum number of parallel searches.
    pub max_requests: usize,
}

impl Default for SubtitlesConfig {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            filename: FilenameTemplate::default(),
            subtitles_per_language: 2,
            max_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub database_path: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/mvm.db".to_string(),
        }
    }
}

impl Config {
    /// Loads `explicit` if given, otherwise the first config file found in
    /// the usual places, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from: {}", path.display());
            return Self::load_from_path(path);
        }

        for path in &Self::config_paths() {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![Self::default_config_path()];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mvm").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".mvm").join("config.toml"));
        }

        paths
    }

    #[must_use]
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("mvm.toml")
    }

    /// Writes the default config to `path` unless a file already exists there.
    pub fn create_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            Ok(false)
        } else {
            Self::default().save_to_path(path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let importer = &self.importer;

        if importer.buffer_size == 0 {
            anyhow::bail!("importer.buffer_size must be > 0");
        }

        if importer.probe_workers == 0 {
            anyhow::bail!("importer.probe_workers must be > 0");
        }

        if importer.osdb.max_requests == 0
            || importer.imdb.max_requests == 0
            || importer.subtitles.max_requests == 0
        {
            anyhow::bail!("max_requests must be > 0 for osdb, imdb and subtitles");
        }

        if !(1..=MAX_MOVIES_PER_REQUEST).contains(&importer.osdb.max_per_request) {
            anyhow::bail!(
                "importer.osdb.max_per_request must be between 1 and {MAX_MOVIES_PER_REQUEST}"
            );
        }

        if !(1..=MAX_SUBTITLES_PER_REQUEST).contains(&importer.osdb.max_subtitles_per_request) {
            anyhow::bail!(
                "importer.osdb.max_subtitles_per_request must be between 1 and {MAX_SUBTITLES_PER_REQUEST}"
            );
        }

        if !importer.subtitles.languages.is_empty() && importer.subtitles.subtitles_per_language == 0
        {
            anyhow::bail!("importer.subtitles.subtitles_per_language must be > 0");
        }

        url::Url::parse(&importer.osdb.url).context("Invalid importer.osdb.url")?;
        url::Url::parse(&importer.imdb.url).context("Invalid importer.imdb.url")?;

        Ok(())
    }
}
