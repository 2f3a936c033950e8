//! Graph learner boundary.
//!
//! Link prediction itself runs offline. This module defines the seam the
//! pipeline calls after fusion, plus a file-backed implementation that reads
//! the predictions such a job produced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LearnerError, LearnerResult};
use crate::graph::NamespacedId;
use crate::graph::fusion::FusedTripleSet;

/// A candidate edge with the model's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEdge {
    pub subject: NamespacedId,
    pub object: NamespacedId,
    pub score: f64,
}

/// Produces scored candidate edges for a finalized triple set.
pub trait GraphLearner {
    fn predict(&self, fused: &FusedTripleSet) -> LearnerResult<Vec<ScoredEdge>>;
}

/// Predictions written to disk as a JSON array of `{subject, object, score}`.
#[derive(Debug, Clone)]
pub struct PredictionFile {
    path: PathBuf,
}

impl PredictionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every edge in the file.
    pub fn read(&self) -> LearnerResult<Vec<ScoredEdge>> {
        let bytes = std::fs::read(&self.path).map_err(|e| LearnerError::Read {
            path: self.path.display().to_string(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| LearnerError::Parse {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }
}

impl GraphLearner for PredictionFile {
    /// Every edge in the file, unfiltered. Edges whose endpoints the store
    /// lacks are skipped by the match-only upsert.
    fn predict(&self, fused: &FusedTripleSet) -> LearnerResult<Vec<ScoredEdge>> {
        let edges = self.read()?;
        tracing::debug!(
            edges = edges.len(),
            fused = fused.len(),
            path = %self.path.display(),
            "predictions loaded"
        );
        Ok(edges)
    }
}
