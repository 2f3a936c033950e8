//! Run configuration, persisted as TOML.
//!
//! Every field has a default, so an absent or partial `hercule.toml` is
//! valid. Graph store credentials may also come from `NEO4J_URI`,
//! `NEO4J_USER` and `NEO4J_PASSWORD`, which take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::extract::{AGGREGATE_REGION_CODES, FieldMap, feed};
use crate::graph::{COMPOUND_PALLIATES_DISEASE, COMPOUND_TREATS_DISEASE};
use crate::sync::{RetryPolicy, SyncMode};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "hercule.toml";

pub const DEFAULT_REFERENCE_URL: &str =
    "https://github.com/hetio/hetionet/raw/main/hetnet/tsv/hetionet-v1.0-edges.sif.gz";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerculeConfig {
    /// Root of the artifact cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Disease registry file or directory.
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    /// Oldest year a record may have to be selected.
    #[serde(default = "default_min_year")]
    pub min_year: i32,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub outbreak: OutbreakSettings,
    #[serde(default)]
    pub reference: ReferenceSettings,
    #[serde(default)]
    pub graph: GraphSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_registry() -> PathBuf {
    PathBuf::from("dictionary")
}

fn default_min_year() -> i32 {
    2015
}

impl Default for HerculeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry: default_registry(),
            min_year: default_min_year(),
            feed: FeedSettings::default(),
            outbreak: OutbreakSettings::default(),
            reference: ReferenceSettings::default(),
            graph: GraphSettings::default(),
        }
    }
}

/// Indicator feed endpoint and field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_entity_field")]
    pub entity_field: String,
    #[serde(default = "default_time_field")]
    pub time_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
}

fn default_feed_url() -> String {
    feed::DEFAULT_BASE_URL.to_string()
}

fn default_feed_timeout() -> u64 {
    15
}

fn default_entity_field() -> String {
    FieldMap::default().entity
}

fn default_time_field() -> String {
    FieldMap::default().time
}

fn default_value_field() -> String {
    FieldMap::default().value
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: default_feed_url(),
            timeout_secs: default_feed_timeout(),
            entity_field: default_entity_field(),
            time_field: default_time_field(),
            value_field: default_value_field(),
        }
    }
}

impl FeedSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn field_map(&self) -> FieldMap {
        FieldMap {
            entity: self.entity_field.clone(),
            time: self.time_field.clone(),
            value: self.value_field.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutbreakSettings {
    /// Entity codes never treated as outbreak subjects.
    #[serde(default = "default_excluded")]
    pub excluded_codes: Vec<String>,
}

fn default_excluded() -> Vec<String> {
    AGGREGATE_REGION_CODES.iter().map(|c| c.to_string()).collect()
}

impl Default for OutbreakSettings {
    fn default() -> Self {
        Self {
            excluded_codes: default_excluded(),
        }
    }
}

/// Biomedical reference graph location and relation whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSettings {
    #[serde(default = "default_reference_path")]
    pub path: PathBuf,
    /// Fetched into `path` when the file is missing. Empty disables download.
    #[serde(default = "default_reference_url")]
    pub download_url: String,
    #[serde(default = "default_relations")]
    pub relations: Vec<String>,
}

fn default_reference_path() -> PathBuf {
    PathBuf::from("data/reference/hetionet-v1.0-edges.sif.gz")
}

fn default_reference_url() -> String {
    DEFAULT_REFERENCE_URL.to_string()
}

fn default_relations() -> Vec<String> {
    vec![
        COMPOUND_TREATS_DISEASE.to_string(),
        COMPOUND_PALLIATES_DISEASE.to_string(),
    ]
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            path: default_reference_path(),
            download_url: default_reference_url(),
            relations: default_relations(),
        }
    }
}

/// Graph store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_graph_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_graph_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            uri: None,
            user: None,
            password: None,
            database: default_database(),
            mode: SyncMode::default(),
            timeout_secs: default_graph_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Resolved graph store credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct GraphCredentials {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl GraphSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Replace connection fields with values from `lookup` where present.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(uri) = non_empty("NEO4J_URI") {
            self.uri = Some(uri);
        }
        if let Some(user) = non_empty("NEO4J_USER") {
            self.user = Some(user);
        }
        if let Some(password) = non_empty("NEO4J_PASSWORD") {
            self.password = Some(password);
        }
    }

    /// All three connection fields, or an error naming the missing ones.
    pub fn credentials(&self) -> ConfigResult<GraphCredentials> {
        match (&self.uri, &self.user, &self.password) {
            (Some(uri), Some(user), Some(password)) => Ok(GraphCredentials {
                uri: uri.clone(),
                user: user.clone(),
                password: password.clone(),
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("NEO4J_URI", self.uri.is_none()),
                    ("NEO4J_USER", self.user.is_none()),
                    ("NEO4J_PASSWORD", self.password.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(ConfigError::MissingCredentials {
                    missing: missing.join(", "),
                })
            }
        }
    }
}

impl HerculeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    pub fn from_toml(content: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigParse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, `hercule.toml` in the
    /// working directory is used if present, otherwise defaults. Environment
    /// credentials are applied last.
    pub fn resolve(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::load(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.graph.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Persist as pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigSerialize {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ConfigWrite {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })
    }
}
