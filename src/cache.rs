//! Date-scoped artifact cache.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! raw/<run_date>/<disease>.json             latest-record snapshot per disease
//! triples/<run_date>/<disease>_triples.json surveillance triples per disease
//! fused/<run_date>/fused_triples.json       fused set (inspection only)
//! ```
//!
//! The presence of any file under `triples/<run_date>/` marks the whole run
//! as cached: extraction is skipped entirely. There is no per-disease
//! validity check, so a partially failed run looks complete once one disease
//! has written its triples.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::error::{CacheError, CacheResult, ConfigError};
use crate::extract::latest::LatestRecord;
use crate::graph::Triple;

/// Calendar date a run is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunDate(NaiveDate);

impl RunDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Today's date in the local timezone.
    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for RunDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for RunDate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| ConfigError::InvalidRunDate {
                value: s.to_string(),
            })
    }
}

/// Top-level artifact directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    /// Latest-record snapshots.
    Raw,
    /// Per-disease surveillance triples. The only category read back.
    Triples,
    /// Fused triple set of a run.
    Fused,
}

impl ArtifactCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactCategory::Raw => "raw",
            ArtifactCategory::Triples => "triples",
            ArtifactCategory::Fused => "fused",
        }
    }
}

/// What is being persisted, resolved by the caller.
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    /// Tabular rows, written as `{"Country", "Year", "Cases"}` objects.
    Tabular(&'a [LatestRecord]),
    /// Triples, written as `[subject, predicate, object]` arrays.
    Triples(&'a [Triple]),
}

impl Artifact<'_> {
    fn len(&self) -> usize {
        match self {
            Artifact::Tabular(rows) => rows.len(),
            Artifact::Triples(triples) => triples.len(),
        }
    }
}

#[derive(Serialize)]
struct TabularRow<'a> {
    #[serde(rename = "Country")]
    country: &'a str,
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Cases")]
    cases: Option<f64>,
}

/// Artifacts present for one run date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub raw: Vec<PathBuf>,
    pub triples: Vec<PathBuf>,
}

impl CacheStatus {
    /// Whether a run for this date would be served from cache.
    pub fn is_complete(&self) -> bool {
        !self.triples.is_empty()
    }
}

static UNSAFE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+").expect("static regex is valid"));

/// Make a logical name safe as a file stem.
///
/// Lowercases, collapses runs of characters outside `[a-z0-9_-]` into one
/// underscore, and strips leading/trailing underscores.
pub fn sanitize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = UNSAFE_RUN.replace_all(&lowered, "_");
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Filesystem cache of run artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    base_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/<category>/<run_date>/`
    pub fn dir_for(&self, category: ArtifactCategory, run_date: RunDate) -> PathBuf {
        self.base_dir
            .join(category.dir_name())
            .join(run_date.to_string())
    }

    /// Path an artifact with this logical name would be written to.
    pub fn path_for(
        &self,
        category: ArtifactCategory,
        run_date: RunDate,
        logical_name: &str,
    ) -> PathBuf {
        self.dir_for(category, run_date)
            .join(format!("{}.json", sanitize_name(logical_name)))
    }

    /// True if at least one triple artifact exists for the date.
    pub fn has_cached_run(&self, run_date: RunDate) -> bool {
        self.list_json(ArtifactCategory::Triples, run_date)
            .map(|files| !files.is_empty())
            .unwrap_or(false)
    }

    /// Load and concatenate every triple artifact for the date, in file-name
    /// order. `None` if there are none.
    pub fn load_cached_triples(&self, run_date: RunDate) -> CacheResult<Option<Vec<Triple>>> {
        let files = self.list_json(ArtifactCategory::Triples, run_date)?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut triples = Vec::new();
        for path in &files {
            let bytes = std::fs::read(path).map_err(|e| CacheError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            let batch: Vec<Triple> =
                serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            triples.extend(batch);
        }
        Ok(Some(triples))
    }

    /// Write an artifact as a pretty-printed JSON array and return its path.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so readers never observe a half-written artifact.
    pub fn persist(
        &self,
        artifact: Artifact<'_>,
        logical_name: &str,
        run_date: RunDate,
        category: ArtifactCategory,
    ) -> CacheResult<PathBuf> {
        let dir = self.dir_for(category, run_date);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = self.path_for(category, run_date, logical_name);

        let serialized = match artifact {
            Artifact::Tabular(rows) => {
                let rows: Vec<TabularRow<'_>> = rows
                    .iter()
                    .map(|r| TabularRow {
                        country: &r.entity_code,
                        year: r.year,
                        cases: r.case_count,
                    })
                    .collect();
                serde_json::to_vec_pretty(&rows)
            }
            Artifact::Triples(triples) => serde_json::to_vec_pretty(triples),
        }
        .map_err(|e| CacheError::Serialization {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, &serialized).map_err(|e| CacheError::Io {
            path: staging.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&staging, &path).map_err(|e| CacheError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), entries = artifact.len(), "artifact persisted");
        Ok(path)
    }

    /// Remove every artifact of a category for the date and return how many
    /// files were deleted. A missing directory counts as already empty.
    pub fn discard(&self, category: ArtifactCategory, run_date: RunDate) -> CacheResult<usize> {
        let files = self.list_json(category, run_date)?;
        for path in &files {
            std::fs::remove_file(path).map_err(|e| CacheError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        if !files.is_empty() {
            tracing::debug!(
                category = category.dir_name(),
                run_date = %run_date,
                removed = files.len(),
                "artifacts discarded"
            );
        }
        Ok(files.len())
    }

    /// Raw and triple artifacts present for a date.
    pub fn status(&self, run_date: RunDate) -> CacheResult<CacheStatus> {
        Ok(CacheStatus {
            raw: self.list_json(ArtifactCategory::Raw, run_date)?,
            triples: self.list_json(ArtifactCategory::Triples, run_date)?,
        })
    }

    /// Sorted `.json` files in a category directory; empty if it is missing.
    fn list_json(&self, category: ArtifactCategory, run_date: RunDate) -> CacheResult<Vec<PathBuf>> {
        let dir = self.dir_for(category, run_date);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CacheError::Io {
                    path: dir.display().to_string(),
                    source: e,
                });
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }
}
