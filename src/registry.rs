//! Disease registry: which indicators to scan and how to judge them.
//!
//! The registry is a JSON array of descriptors:
//!
//! ```json
//! [{"who_code": "MALARIA_EST_CASES", "biological_name": "Malaria",
//!   "hetionet_id": "Disease::DOID:12365", "outbreak_threshold": 1000}]
//! ```
//!
//! A directory may be given instead of a file; every `*.json` file in it is
//! loaded in file-name order and the arrays are concatenated.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::graph::NamespacedId;

/// Knowledge-base id used when a disease has no mapping.
pub const UNMAPPED_KB_ID: &str = "N/A";

pub const DEFAULT_OUTBREAK_THRESHOLD: i64 = 1000;

/// One monitored disease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseConfig {
    /// Indicator code in the surveillance feed.
    #[serde(rename = "who_code")]
    pub feed_code: String,
    #[serde(rename = "biological_name")]
    pub display_name: String,
    /// Identifier in the biomedical reference graph.
    #[serde(rename = "hetionet_id", default = "default_kb_id")]
    pub kb_id: String,
    #[serde(default = "default_threshold")]
    pub outbreak_threshold: i64,
}

fn default_kb_id() -> String {
    UNMAPPED_KB_ID.to_string()
}

fn default_threshold() -> i64 {
    DEFAULT_OUTBREAK_THRESHOLD
}

impl DiseaseConfig {
    pub fn kb_node(&self) -> NamespacedId {
        NamespacedId::new(self.kb_id.clone())
    }

    pub fn is_mapped(&self) -> bool {
        self.kb_id != UNMAPPED_KB_ID
    }
}

/// Loaded disease descriptors, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiseaseRegistry {
    diseases: Vec<DiseaseConfig>,
}

impl DiseaseRegistry {
    pub fn new(diseases: Vec<DiseaseConfig>) -> Self {
        Self { diseases }
    }

    /// Load from a JSON file or a directory of JSON files.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let files = if path.is_dir() {
            json_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut diseases = Vec::new();
        for file in &files {
            diseases.extend(parse_file(file)?);
        }
        tracing::info!(
            path = %path.display(),
            files = files.len(),
            diseases = diseases.len(),
            "disease registry loaded"
        );
        Ok(Self { diseases })
    }

    /// Parse a registry from a JSON string.
    pub fn from_json(json: &str, origin: &str) -> ConfigResult<Self> {
        parse(json, origin).map(Self::new)
    }

    pub fn diseases(&self) -> &[DiseaseConfig] {
        &self.diseases
    }

    pub fn len(&self) -> usize {
        self.diseases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diseases.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiseaseConfig> {
        self.diseases.iter()
    }
}

impl<'a> IntoIterator for &'a DiseaseRegistry {
    type Item = &'a DiseaseConfig;
    type IntoIter = std::slice::Iter<'a, DiseaseConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.diseases.iter()
    }
}

fn json_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::RegistryRead {
        path: dir.display().to_string(),
        source: e,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn parse_file(path: &Path) -> ConfigResult<Vec<DiseaseConfig>> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RegistryRead {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(&content, &path.display().to_string())
}

fn parse(json: &str, origin: &str) -> ConfigResult<Vec<DiseaseConfig>> {
    let diseases: Vec<DiseaseConfig> =
        serde_json::from_str(json).map_err(|e| ConfigError::RegistryParse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
    if let Some(bad) = diseases
        .iter()
        .find(|d| d.feed_code.trim().is_empty() || d.display_name.trim().is_empty())
    {
        return Err(ConfigError::RegistryParse {
            path: origin.to_string(),
            message: format!(
                "empty who_code or biological_name in entry {:?}",
                bad.display_name
            ),
        });
    }
    Ok(diseases)
}
