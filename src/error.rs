//! Rich diagnostic error types for the hercule pipeline.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Which of these abort a
//! run and which are absorbed at a component boundary is decided by the
//! pipeline, not by the error type itself.

use miette::Diagnostic;
use thiserror::Error;

use crate::sync::SyncPhase;

/// Top-level error type for a hercule run.
#[derive(Debug, Error, Diagnostic)]
pub enum HerculeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fusion(#[from] FusionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learner(#[from] LearnerError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read disease registry: {path}")]
    #[diagnostic(
        code(hercule::config::registry_read),
        help(
            "Pass the registry location with --registry or set `registry` in hercule.toml. \
             It may be a JSON file or a directory of JSON files."
        )
    )]
    RegistryRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse disease registry {path}: {message}")]
    #[diagnostic(
        code(hercule::config::registry_parse),
        help(
            "The registry must be a JSON array of objects with at least \
             `who_code` and `biological_name`."
        )
    )]
    RegistryParse { path: String, message: String },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(hercule::config::read),
        help("Ensure the config file exists and is readable, or omit --config to use defaults.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(hercule::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    ConfigParse { path: String, message: String },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(hercule::config::write),
        help("Check that the target directory is writable.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config for {path}: {message}")]
    #[diagnostic(code(hercule::config::serialize))]
    ConfigSerialize { path: String, message: String },

    #[error("graph store credentials missing: {missing}")]
    #[diagnostic(
        code(hercule::config::credentials),
        help(
            "Set NEO4J_URI, NEO4J_USER and NEO4J_PASSWORD, fill the [graph] table \
             in hercule.toml, or run with --dry-run to skip the graph store."
        )
    )]
    MissingCredentials { missing: String },

    #[error("invalid run date \"{value}\"")]
    #[diagnostic(
        code(hercule::config::run_date),
        help("Run dates use the ISO format YYYY-MM-DD, e.g. 2024-03-01.")
    )]
    InvalidRunDate { value: String },
}

// ---------------------------------------------------------------------------
// Feed errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FeedError {
    #[error("indicator request to {url} failed: {message}")]
    #[diagnostic(
        code(hercule::feed::request),
        help("Check network connectivity and the [feed] base_url setting.")
    )]
    Request { url: String, message: String },

    #[error("indicator endpoint {url} answered HTTP {status}")]
    #[diagnostic(
        code(hercule::feed::status),
        help("Verify the indicator code in the disease registry exists upstream.")
    )]
    Status { url: String, status: u16 },

    #[error("indicator response from {url} was not valid JSON: {message}")]
    #[diagnostic(
        code(hercule::feed::body),
        help("The feed returned an unexpected body. It will be treated as empty.")
    )]
    Body { url: String, message: String },
}

// ---------------------------------------------------------------------------
// Cache errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache I/O error at {path}")]
    #[diagnostic(
        code(hercule::cache::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache artifact {path} could not be (de)serialized: {message}")]
    #[diagnostic(
        code(hercule::cache::serde),
        help(
            "The artifact is not a JSON array of the expected shape. \
             Delete it or rerun with --force-refresh to rebuild the day's cache."
        )
    )]
    Serialization { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Fusion errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FusionError {
    #[error("reference graph not found at {path}")]
    #[diagnostic(
        code(hercule::fusion::missing),
        help(
            "Download the Hetionet edge list (hetionet-v1.0-edges.sif.gz) to this path, \
             or set [reference] download_url so it can be fetched automatically."
        )
    )]
    ReferenceMissing { path: String },

    #[error("failed to download reference graph from {url}: {message}")]
    #[diagnostic(
        code(hercule::fusion::download),
        help("Check network connectivity or place the file manually at [reference] path.")
    )]
    Download { url: String, message: String },

    #[error("failed to read reference graph: {path}")]
    #[diagnostic(
        code(hercule::fusion::io),
        help("Ensure the reference file is readable and, if gzipped, not truncated.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed reference edge at line {line}: {content}")]
    #[diagnostic(
        code(hercule::fusion::malformed),
        help("Each line must be `source<TAB>metaedge<TAB>target`.")
    )]
    MalformedEdge { line: usize, content: String },

    #[error("reference graph {path} contains no edges")]
    #[diagnostic(
        code(hercule::fusion::empty),
        help("The file parsed but held no triples. Re-download it.")
    )]
    Empty { path: String },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("graph store rejected the request during {phase}: HTTP {status}: {message}")]
    #[diagnostic(
        code(hercule::sync::rejected),
        help(
            "Check the credentials and that the APOC plugin is installed. \
             Cached artifacts for this run date remain valid; rerun to retry."
        )
    )]
    Rejected {
        phase: SyncPhase,
        status: u16,
        message: String,
    },

    #[error("graph store unreachable during {phase} after {attempts} attempt(s): {message}")]
    #[diagnostic(
        code(hercule::sync::transport),
        help("Check network connectivity and [graph] uri. Increase max_retries for flaky links.")
    )]
    Transport {
        phase: SyncPhase,
        attempts: u32,
        message: String,
    },

    #[error("graph store query failed during {phase}: {code}: {message}")]
    #[diagnostic(
        code(hercule::sync::query),
        help("The statement was accepted over HTTP but the database reported an error.")
    )]
    Query {
        phase: SyncPhase,
        code: String,
        message: String,
    },

    #[error("unexpected graph store response during {phase}: {message}")]
    #[diagnostic(
        code(hercule::sync::response),
        help("The Query API answered with a body this client does not understand.")
    )]
    Response { phase: SyncPhase, message: String },
}

// ---------------------------------------------------------------------------
// Learner errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearnerError {
    #[error("failed to read predictions: {path}")]
    #[diagnostic(
        code(hercule::learner::read),
        help("Point --predictions at the JSON file written by the training job.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse predictions {path}: {message}")]
    #[diagnostic(
        code(hercule::learner::parse),
        help("Predictions must be a JSON array of {{\"subject\", \"object\", \"score\"}} objects.")
    )]
    Parse { path: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type FeedResult<T> = std::result::Result<T, FeedError>;
pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type FusionResult<T> = std::result::Result<T, FusionError>;
pub type SyncResult<T> = std::result::Result<T, SyncError>;
pub type LearnerResult<T> = std::result::Result<T, LearnerError>;

/// Convenience alias for functions returning hercule results.
pub type HerculeResult<T> = std::result::Result<T, HerculeError>;
