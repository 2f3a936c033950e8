//! Run orchestration: registry → extraction → cache → fusion → sync.
//!
//! A run is keyed by its [`RunDate`]. If surveillance triples for that date
//! are already cached, extraction is skipped and no feed request is made. A
//! fresh extraction first discards whatever triple files the date holds.
//! Otherwise every registered disease is processed in turn; a failing feed
//! or cache write only affects that disease. Fusion and synchronization
//! failures end the run.

pub mod context;

pub use context::RunContext;

use crate::cache::{Artifact, ArtifactCache, ArtifactCategory, RunDate};
use crate::config::HerculeConfig;
use crate::error::HerculeResult;
use crate::extract::{
    AGGREGATE_REGION_CODES, FieldMap, GhoClient, IndicatorFeed, OutbreakRule, select_latest,
};
use crate::extract::normalize::normalize_rows;
use crate::graph::Triple;
use crate::graph::fusion::{FusedTripleSet, KnowledgeFuser};
use crate::graph::reference::{ReferenceSource, SifFile};
use crate::learner::GraphLearner;
use crate::registry::{DiseaseConfig, DiseaseRegistry};
use crate::sync::{GraphSyncClient, HttpTransport, SyncMode};

/// Logical name of the fused artifact.
pub const FUSED_ARTIFACT: &str = "fused_triples";

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub run_date: RunDate,
    /// Ignore cached triples and extract again.
    pub force_refresh: bool,
    /// Stop after fusion; nothing is sent to the graph store.
    pub dry_run: bool,
    pub min_year: i32,
    pub sync_mode: SyncMode,
}

impl RunOptions {
    pub fn new(run_date: RunDate) -> Self {
        Self {
            run_date,
            force_refresh: false,
            dry_run: false,
            min_year: 2015,
            sync_mode: SyncMode::default(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Fused triples were written to the graph store.
    Synced,
    /// Fusion completed; the graph store was not contacted.
    DryRun,
    /// No disease produced an outbreak triple; fusion was not attempted.
    NoSurveillance,
}

/// Counts describing a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_date: RunDate,
    pub from_cache: bool,
    pub diseases_scanned: usize,
    pub feed_fetches: usize,
    pub surveillance_triples: usize,
    pub biomedical_triples: usize,
    pub fused_triples: usize,
    pub predictions_uploaded: usize,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn new(run_date: RunDate) -> Self {
        Self {
            run_date,
            from_cache: false,
            diseases_scanned: 0,
            feed_fetches: 0,
            surveillance_triples: 0,
            biomedical_triples: 0,
            fused_triples: 0,
            predictions_uploaded: 0,
            outcome: RunOutcome::NoSurveillance,
        }
    }
}

/// The assembled pipeline.
pub struct Pipeline {
    registry: DiseaseRegistry,
    feed: Box<dyn IndicatorFeed>,
    fields: FieldMap,
    excluded: Vec<String>,
    cache: ArtifactCache,
    reference: Box<dyn ReferenceSource>,
    fuser: KnowledgeFuser,
    sync: Option<GraphSyncClient>,
    learner: Option<Box<dyn GraphLearner>>,
}

impl Pipeline {
    /// Pipeline with default field names, exclusions and relation whitelist,
    /// and no graph store.
    pub fn new(
        registry: DiseaseRegistry,
        feed: impl IndicatorFeed + 'static,
        cache: ArtifactCache,
        reference: impl ReferenceSource + 'static,
    ) -> Self {
        Self {
            registry,
            feed: Box::new(feed),
            fields: FieldMap::default(),
            excluded: AGGREGATE_REGION_CODES.iter().map(|c| c.to_string()).collect(),
            cache,
            reference: Box::new(reference),
            fuser: KnowledgeFuser::default(),
            sync: None,
            learner: None,
        }
    }

    /// Assemble the production pipeline from configuration.
    ///
    /// Graph store credentials are required unless `dry_run` is set; they
    /// are checked here so a misconfigured run fails before any fetch.
    pub fn from_config(
        config: &HerculeConfig,
        registry: DiseaseRegistry,
        dry_run: bool,
    ) -> HerculeResult<Self> {
        let feed = GhoClient::new(config.feed.base_url.clone(), config.feed.timeout());
        let mut reference = SifFile::new(config.reference.path.clone());
        if !config.reference.download_url.is_empty() {
            reference = reference.with_download(config.reference.download_url.clone());
        }

        let mut pipeline = Self::new(
            registry,
            feed,
            ArtifactCache::new(config.data_dir.clone()),
            reference,
        )
        .with_fields(config.feed.field_map())
        .with_exclusions(config.outbreak.excluded_codes.clone())
        .with_fuser(KnowledgeFuser::new(config.reference.relations.clone()));

        if !dry_run {
            pipeline = pipeline.with_sync(sync_client(config)?);
        }
        Ok(pipeline)
    }

    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_exclusions(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_fuser(mut self, fuser: KnowledgeFuser) -> Self {
        self.fuser = fuser;
        self
    }

    pub fn with_sync(mut self, client: GraphSyncClient) -> Self {
        self.sync = Some(client);
        self
    }

    pub fn with_learner(mut self, learner: impl GraphLearner + 'static) -> Self {
        self.learner = Some(Box::new(learner));
        self
    }

    pub fn registry(&self) -> &DiseaseRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Execute one run.
    pub fn run(&self, options: RunOptions) -> HerculeResult<RunReport> {
        let ctx = RunContext::new(options.run_date);
        let mut report = RunReport::new(options.run_date);
        report.diseases_scanned = self.registry.len();

        tracing::info!(
            parent: ctx.span(),
            diseases = self.registry.len(),
            force_refresh = options.force_refresh,
            dry_run = options.dry_run,
            "starting surveillance run"
        );

        let cached = if options.force_refresh {
            None
        } else {
            self.cache.load_cached_triples(options.run_date)?
        };

        let surveillance = match cached {
            Some(triples) => {
                tracing::info!(
                    parent: ctx.span(),
                    triples = triples.len(),
                    "cached surveillance triples found, skipping extraction"
                );
                report.from_cache = true;
                triples
            }
            None => {
                // The day's triples are replaced wholesale, so a disease that
                // no longer qualifies leaves no file behind.
                let stale = self
                    .cache
                    .discard(ArtifactCategory::Triples, options.run_date)?;
                if stale > 0 {
                    tracing::info!(parent: ctx.span(), stale, "discarded cached triples");
                }
                self.extract_all(&ctx, &options, &mut report)
            }
        };
        report.surveillance_triples = surveillance.len();

        if surveillance.is_empty() {
            tracing::warn!(
                parent: ctx.span(),
                "no surveillance triples extracted, halting before fusion"
            );
            report.outcome = RunOutcome::NoSurveillance;
            return Ok(report);
        }

        let fused = self.fuser.fuse(&ctx, self.reference.as_ref(), surveillance)?;
        report.biomedical_triples = fused.biomedical().len();
        report.fused_triples = fused.len();
        tracing::info!(
            parent: ctx.span(),
            surveillance = fused.surveillance().len(),
            biomedical = fused.biomedical().len(),
            total = fused.len(),
            "fusion complete"
        );
        if let Err(e) = self.cache.persist(
            Artifact::Triples(fused.triples()),
            FUSED_ARTIFACT,
            options.run_date,
            ArtifactCategory::Fused,
        ) {
            tracing::error!(parent: ctx.span(), error = %e, "failed to persist fused triples");
        }

        let client = match (&self.sync, options.dry_run) {
            (Some(client), false) => client,
            (None, false) => {
                tracing::warn!(parent: ctx.span(), "no graph store configured, skipping sync");
                report.outcome = RunOutcome::DryRun;
                return Ok(report);
            }
            (_, true) => {
                tracing::info!(parent: ctx.span(), "dry run, graph store not contacted");
                report.outcome = RunOutcome::DryRun;
                return Ok(report);
            }
        };

        client.upload_triples(&ctx, fused.triples(), options.sync_mode)?;
        report.outcome = RunOutcome::Synced;

        if let Some(learner) = &self.learner {
            report.predictions_uploaded =
                self.upload_predictions(&ctx, client, learner.as_ref(), &fused)?;
        }

        tracing::info!(
            parent: ctx.span(),
            fused = report.fused_triples,
            predictions = report.predictions_uploaded,
            "run complete"
        );
        Ok(report)
    }

    fn upload_predictions(
        &self,
        ctx: &RunContext,
        client: &GraphSyncClient,
        learner: &dyn GraphLearner,
        fused: &FusedTripleSet,
    ) -> HerculeResult<usize> {
        let edges = learner.predict(fused)?;
        client.upload_predictions(ctx, &edges)?;
        Ok(edges.len())
    }

    /// Extract, classify and persist every registered disease.
    fn extract_all(
        &self,
        ctx: &RunContext,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Vec<Triple> {
        let mut surveillance = Vec::new();
        for disease in &self.registry {
            report.feed_fetches += 1;
            surveillance.extend(self.extract_disease(ctx, options, disease));
        }
        tracing::info!(
            parent: ctx.span(),
            triples = surveillance.len(),
            "total surveillance links extracted"
        );
        surveillance
    }

    fn extract_disease(
        &self,
        ctx: &RunContext,
        options: &RunOptions,
        disease: &DiseaseConfig,
    ) -> Vec<Triple> {
        let span = ctx.disease_span(&disease.display_name);

        let rows = self.feed.fetch(&disease.feed_code);
        let records = normalize_rows(&rows, &self.fields);
        let latest = select_latest(&records, options.min_year);
        let rule =
            OutbreakRule::with_exclusions(disease.outbreak_threshold, self.excluded.iter().cloned());
        let triples = rule.build(&latest, &disease.kb_node());

        if !disease.is_mapped() {
            tracing::warn!(parent: &span, feed_code = %disease.feed_code, "disease has no knowledge-base id");
        }

        if let Err(e) = self.cache.persist(
            Artifact::Tabular(&latest),
            &disease.display_name,
            options.run_date,
            ArtifactCategory::Raw,
        ) {
            tracing::error!(parent: &span, error = %e, "failed to persist latest records");
        }

        if !triples.is_empty() {
            if let Err(e) = self.cache.persist(
                Artifact::Triples(&triples),
                &format!("{}_triples", disease.display_name),
                options.run_date,
                ArtifactCategory::Triples,
            ) {
                tracing::error!(parent: &span, error = %e, "failed to persist triples, keeping them in memory");
            }
        }

        tracing::info!(
            parent: &span,
            rows = rows.len(),
            entities = latest.len(),
            hotspots = triples.len(),
            kb_id = %disease.kb_id,
            "disease scanned"
        );
        triples
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("diseases", &self.registry.len())
            .field("cache", &self.cache)
            .field("fuser", &self.fuser)
            .field("sync", &self.sync.is_some())
            .field("learner", &self.learner.is_some())
            .finish()
    }
}

/// Build the HTTP-backed sync client; fails if credentials are missing.
pub fn sync_client(config: &HerculeConfig) -> HerculeResult<GraphSyncClient> {
    let creds = config.graph.credentials()?;
    let transport = HttpTransport::new(
        &creds.uri,
        &config.graph.database,
        &creds.user,
        &creds.password,
        config.graph.timeout(),
    )
    .with_retry(config.graph.retry_policy());
    Ok(GraphSyncClient::new(transport))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::{Value, json};

    use super::*;
    use crate::graph::reference::ReferenceGraph;

    #[derive(Clone, Default)]
    struct StubFeed {
        calls: Rc<Cell<usize>>,
    }

    impl IndicatorFeed for StubFeed {
        fn fetch(&self, indicator_code: &str) -> Vec<Value> {
            self.calls.set(self.calls.get() + 1);
            match indicator_code {
                "MALARIA_EST_CASES" => vec![
                    json!({"SpatialDim": "KE", "TimeDim": 2019, "NumericValue": 1500}),
                    json!({"SpatialDim": "KE", "TimeDim": 2020, "NumericValue": 2200}),
                    json!({"SpatialDim": "GLOBAL", "TimeDim": 2020, "NumericValue": 500000}),
                ],
                _ => Vec::new(),
            }
        }
    }

    fn registry() -> DiseaseRegistry {
        DiseaseRegistry::from_json(
            r#"[
                {"who_code": "MALARIA_EST_CASES", "biological_name": "Malaria",
                 "hetionet_id": "Disease::DOID:12365"},
                {"who_code": "WHS3_48", "biological_name": "Cholera",
                 "hetionet_id": "Disease::DOID:1498"}
            ]"#,
            "inline",
        )
        .unwrap()
    }

    fn reference() -> ReferenceGraph {
        ReferenceGraph::from_labeled([("Compound::DB00608", "CtD", "Disease::DOID:12365")])
    }

    fn date() -> RunDate {
        "2024-03-01".parse().unwrap()
    }

    #[test]
    fn extraction_persists_and_fuses() {
        let dir = tempfile::TempDir::new().unwrap();
        let feed = StubFeed::default();
        let cache = ArtifactCache::new(dir.path());
        let pipeline = Pipeline::new(registry(), feed.clone(), cache, reference());

        let report = pipeline.run(RunOptions::new(date())).unwrap();
        assert_eq!(feed.calls.get(), 2);
        assert!(!report.from_cache);
        assert_eq!(report.diseases_scanned, 2);
        assert_eq!(report.feed_fetches, 2);
        assert_eq!(report.surveillance_triples, 1);
        assert_eq!(report.biomedical_triples, 1);
        assert_eq!(report.fused_triples, 2);
        assert_eq!(report.outcome, RunOutcome::DryRun);

        let status = pipeline.cache().status(date()).unwrap();
        assert_eq!(status.raw.len(), 2);
        // Cholera produced nothing, so only Malaria's triples are written.
        assert_eq!(status.triples.len(), 1);
        assert!(
            pipeline
                .cache()
                .path_for(ArtifactCategory::Fused, date(), FUSED_ARTIFACT)
                .is_file()
        );
    }

    #[test]
    fn force_refresh_ignores_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let feed = StubFeed::default();
        let cache = ArtifactCache::new(dir.path());
        let pipeline = Pipeline::new(registry(), feed.clone(), cache, reference());
        pipeline.run(RunOptions::new(date())).unwrap();

        let mut options = RunOptions::new(date());
        options.force_refresh = true;
        let report = pipeline.run(options).unwrap();
        assert!(!report.from_cache);
        assert_eq!(feed.calls.get(), 4);
    }

    #[test]
    fn no_surveillance_halts_before_fusion() {
        struct Unreachable;
        impl ReferenceSource for Unreachable {
            fn load(&self) -> crate::error::FusionResult<ReferenceGraph> {
                panic!("reference must not be loaded without surveillance triples");
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let registry = DiseaseRegistry::from_json(
            r#"[{"who_code": "WHS3_48", "biological_name": "Cholera"}]"#,
            "inline",
        )
        .unwrap();
        let cache = ArtifactCache::new(dir.path());
        let pipeline = Pipeline::new(registry, StubFeed::default(), cache, Unreachable);
        let report = pipeline.run(RunOptions::new(date())).unwrap();
        assert_eq!(report.outcome, RunOutcome::NoSurveillance);
        assert_eq!(report.fused_triples, 0);
    }

    #[test]
    fn sync_requires_credentials_unless_dry_run() {
        let config = HerculeConfig::default();
        assert!(Pipeline::from_config(&config, registry(), true).is_ok());
        let err = Pipeline::from_config(&config, registry(), false).unwrap_err();
        assert!(matches!(
            err,
            crate::error::HerculeError::Config(crate::error::ConfigError::MissingCredentials { .. })
        ));
    }
}
