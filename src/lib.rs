// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # hercule
//!
//! Turns epidemiological indicator feeds into a small knowledge graph.
//!
//! ## Architecture
//!
//! - **Registry** (`registry`): monitored diseases, their feed codes and thresholds
//! - **Extraction** (`extract`): feed rows → latest record per country → outbreak triples
//! - **Cache** (`cache`): date-keyed artifacts; a cached run skips extraction
//! - **Fusion** (`graph`): outbreak triples joined with drug–disease relations
//!   from a Hetionet edge list
//! - **Sync** (`sync`): idempotent upserts into Neo4j over the HTTP Query API
//! - **Learner** (`learner`): scored candidate edges, uploaded match-only
//!
//! ## Library usage
//!
//! ```no_run
//! use hercule::cache::{ArtifactCache, RunDate};
//! use hercule::extract::GhoClient;
//! use hercule::graph::reference::SifFile;
//! use hercule::pipeline::{Pipeline, RunOptions};
//! use hercule::registry::DiseaseRegistry;
//!
//! let registry = DiseaseRegistry::load("dictionary".as_ref()).unwrap();
//! let pipeline = Pipeline::new(
//!     registry,
//!     GhoClient::default(),
//!     ArtifactCache::new("data"),
//!     SifFile::new("data/reference/hetionet-v1.0-edges.sif.gz"),
//! );
//! let report = pipeline.run(RunOptions::new(RunDate::today())).unwrap();
//! println!("{} fused triples", report.fused_triples);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod learner;
pub mod pipeline;
pub mod registry;
pub mod sync;
