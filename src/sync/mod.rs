//! Idempotent synchronization of triples into the graph store.
//!
//! Factual triples are merged: nodes are `MERGE`d as `:Resource {id}` with
//! their namespace added as a label, relationships are merged by type. Running
//! the same upload twice leaves the store unchanged. Predicted edges take a
//! match-only path: they never create nodes, so an edge whose endpoints are
//! absent is silently dropped by the store.

pub mod transport;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::SyncResult;
use crate::graph::Triple;
use crate::learner::ScoredEdge;
use crate::pipeline::RunContext;

pub use transport::{GraphTransport, HttpTransport, RetryPolicy, Statement, Transaction};

/// Relationship type used for predicted edges.
pub const PREDICTED_RELATION: &str = "PREDICTED_RELATION";

const CLEAR_STATEMENT: &str = "MATCH (n) DETACH DELETE n";

const UPSERT_STATEMENT: &str = "\
UNWIND $batches AS item
MERGE (s:Resource {id: item.s_id})
WITH s, item
CALL apoc.create.addLabels(s, [item.s_label]) YIELD node AS s_node
MERGE (o:Resource {id: item.o_id})
WITH s_node, o, item
CALL apoc.create.addLabels(o, [item.o_label]) YIELD node AS o_node
WITH s_node, o_node, item
CALL apoc.merge.relationship(s_node, item.rel, {}, {}, o_node, {}) YIELD rel
RETURN count(rel) AS merged";

const PREDICTION_STATEMENT: &str = "\
UNWIND $predictions AS p
MATCH (s:Resource {id: p.s_id})
MATCH (o:Resource {id: p.o_id})
MERGE (s)-[r:PREDICTED_RELATION]->(o)
SET r.confidence = p.score
RETURN count(r) AS merged";

/// Where an upload currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    /// Deleting every node and relationship (full refresh only).
    Clearing,
    BatchUpserting,
    Committing,
    PredictionUpserting,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Clearing => "clearing",
            SyncPhase::BatchUpserting => "batch upserting",
            SyncPhase::Committing => "committing",
            SyncPhase::PredictionUpserting => "prediction upserting",
            SyncPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How factual triples are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Upsert on top of whatever the store holds.
    Merge,
    /// Clear the store and upsert, atomically.
    #[default]
    FullRefresh,
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Items sent in the batch.
    pub items: usize,
    /// Whether the store was cleared first.
    pub cleared: bool,
    pub phase: SyncPhase,
}

#[derive(Debug, Serialize, PartialEq)]
struct UpsertItem<'a> {
    s_id: &'a str,
    s_label: &'a str,
    rel: String,
    o_id: &'a str,
    o_label: &'a str,
}

impl<'a> From<&'a Triple> for UpsertItem<'a> {
    fn from(t: &'a Triple) -> Self {
        Self {
            s_id: t.subject.as_str(),
            s_label: t.subject.node_label(),
            rel: t.relationship_type(),
            o_id: t.object.as_str(),
            o_label: t.object.node_label(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct PredictionItem<'a> {
    s_id: &'a str,
    o_id: &'a str,
    score: f64,
}

/// Round to four decimal places.
pub fn round_confidence(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Batched upsert statement for a set of triples.
pub fn upsert_statement(triples: &[Triple]) -> Statement {
    let items: Vec<UpsertItem<'_>> = triples.iter().map(UpsertItem::from).collect();
    Statement::new(UPSERT_STATEMENT, json!({ "batches": items }))
}

/// Match-only statement for predicted edges.
pub fn prediction_statement(edges: &[ScoredEdge]) -> Statement {
    let items: Vec<PredictionItem<'_>> = edges
        .iter()
        .map(|e| PredictionItem {
            s_id: e.subject.as_str(),
            o_id: e.object.as_str(),
            score: round_confidence(e.score),
        })
        .collect();
    Statement::new(PREDICTION_STATEMENT, json!({ "predictions": items }))
}

/// Client that writes triples and predictions through a [`GraphTransport`].
pub struct GraphSyncClient {
    transport: Box<dyn GraphTransport>,
}

impl GraphSyncClient {
    pub fn new(transport: impl GraphTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Upsert factual triples.
    ///
    /// In [`SyncMode::FullRefresh`] the clear and the upsert share one
    /// explicit transaction. Any failure after it is opened rolls it back,
    /// so the store keeps its previous contents.
    pub fn upload_triples(
        &self,
        ctx: &RunContext,
        triples: &[Triple],
        mode: SyncMode,
    ) -> SyncResult<SyncReport> {
        match mode {
            SyncMode::Merge => {
                if triples.is_empty() {
                    tracing::info!(parent: ctx.span(), "no triples to upload");
                    return Ok(SyncReport {
                        mode,
                        items: 0,
                        cleared: false,
                        phase: SyncPhase::Done,
                    });
                }
                tracing::info!(
                    parent: ctx.span(),
                    phase = %SyncPhase::BatchUpserting,
                    items = triples.len(),
                    "upserting triples"
                );
                self.transport
                    .run(SyncPhase::BatchUpserting, &upsert_statement(triples))?;
            }
            SyncMode::FullRefresh => {
                tracing::info!(parent: ctx.span(), phase = %SyncPhase::Clearing, "clearing graph store");
                let tx = self
                    .transport
                    .begin(SyncPhase::Clearing, &Statement::bare(CLEAR_STATEMENT))?;

                if !triples.is_empty() {
                    tracing::info!(
                        parent: ctx.span(),
                        phase = %SyncPhase::BatchUpserting,
                        items = triples.len(),
                        "upserting triples"
                    );
                    let upsert = upsert_statement(triples);
                    if let Err(e) = self.transport.run_in(&tx, SyncPhase::BatchUpserting, &upsert) {
                        self.abandon(ctx, tx);
                        return Err(e);
                    }
                }
                self.transport.commit(tx)?;
            }
        }

        tracing::info!(parent: ctx.span(), items = triples.len(), "graph store synchronized");
        Ok(SyncReport {
            mode,
            items: triples.len(),
            cleared: mode == SyncMode::FullRefresh,
            phase: SyncPhase::Done,
        })
    }

    /// Upload predicted edges between existing nodes.
    pub fn upload_predictions(
        &self,
        ctx: &RunContext,
        edges: &[ScoredEdge],
    ) -> SyncResult<SyncReport> {
        if !edges.is_empty() {
            tracing::info!(
                parent: ctx.span(),
                phase = %SyncPhase::PredictionUpserting,
                edges = edges.len(),
                "uploading predicted edges"
            );
            self.transport
                .run(SyncPhase::PredictionUpserting, &prediction_statement(edges))?;
        }
        Ok(SyncReport {
            mode: SyncMode::Merge,
            items: edges.len(),
            cleared: false,
            phase: SyncPhase::Done,
        })
    }

    fn abandon(&self, ctx: &RunContext, tx: Transaction) {
        if let Err(e) = self.transport.rollback(tx) {
            tracing::error!(parent: ctx.span(), error = %e, "rollback failed");
        }
    }
}

impl fmt::Debug for GraphSyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSyncClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::Value;

    use super::*;
    use crate::cache::RunDate;
    use crate::error::SyncError;
    use crate::graph::{HAS_ACTIVE_OUTBREAK, NamespacedId};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Run(SyncPhase, Statement),
        Begin(SyncPhase, Statement),
        RunIn(String, SyncPhase, Statement),
        Commit(String),
        Rollback(String),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<Call>>>,
        fail_in_tx: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl GraphTransport for Recorder {
        fn run(&self, phase: SyncPhase, statement: &Statement) -> SyncResult<Value> {
            self.calls.borrow_mut().push(Call::Run(phase, statement.clone()));
            Ok(Value::Null)
        }

        fn begin(&self, phase: SyncPhase, first: &Statement) -> SyncResult<Transaction> {
            self.calls.borrow_mut().push(Call::Begin(phase, first.clone()));
            Ok(Transaction {
                id: "tx1".into(),
                affinity: None,
            })
        }

        fn run_in(
            &self,
            tx: &Transaction,
            phase: SyncPhase,
            statement: &Statement,
        ) -> SyncResult<Value> {
            self.calls
                .borrow_mut()
                .push(Call::RunIn(tx.id.clone(), phase, statement.clone()));
            if self.fail_in_tx {
                return Err(SyncError::Rejected {
                    phase,
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(Value::Null)
        }

        fn commit(&self, tx: Transaction) -> SyncResult<()> {
            self.calls.borrow_mut().push(Call::Commit(tx.id));
            Ok(())
        }

        fn rollback(&self, tx: Transaction) -> SyncResult<()> {
            self.calls.borrow_mut().push(Call::Rollback(tx.id));
            Ok(())
        }
    }

    fn ctx() -> RunContext {
        RunContext::detached("2024-03-01".parse::<RunDate>().unwrap())
    }

    fn triples() -> Vec<Triple> {
        vec![
            Triple::outbreak("KE", &NamespacedId::new("Disease::DOID:12365")),
            Triple::new("Compound::DB00608", "CtD", "Disease::DOID:12365"),
        ]
    }

    #[test]
    fn upsert_items_carry_labels_and_rel_type() {
        let stmt = upsert_statement(&[
            Triple::new("Country::KE", HAS_ACTIVE_OUTBREAK, "Disease::DOID:12365"),
            Triple::new("orphan", "treats in part", "Compound::DB1"),
        ]);
        assert!(stmt.statement.starts_with("UNWIND $batches AS item"));
        assert!(stmt.statement.contains("apoc.merge.relationship"));
        let batches = &stmt.parameters["batches"];
        assert_eq!(batches[0]["s_id"], "Country::KE");
        assert_eq!(batches[0]["s_label"], "Country");
        assert_eq!(batches[0]["rel"], "HAS_ACTIVE_OUTBREAK");
        assert_eq!(batches[0]["o_label"], "Disease");
        assert_eq!(batches[1]["s_label"], "Entity");
        assert_eq!(batches[1]["rel"], "TREATS_IN_PART");
    }

    #[test]
    fn merge_mode_sends_one_request() {
        let recorder = Recorder::default();
        let client = GraphSyncClient::new(recorder.clone());
        let report = client.upload_triples(&ctx(), &triples(), SyncMode::Merge).unwrap();
        assert_eq!(report.items, 2);
        assert!(!report.cleared);
        assert_eq!(report.phase, SyncPhase::Done);

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Run(phase, stmt) => {
                assert_eq!(*phase, SyncPhase::BatchUpserting);
                assert_eq!(stmt.parameters["batches"].as_array().unwrap().len(), 2);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn empty_merge_sends_nothing() {
        let recorder = Recorder::default();
        let client = GraphSyncClient::new(recorder.clone());
        let report = client.upload_triples(&ctx(), &[], SyncMode::Merge).unwrap();
        assert_eq!(report.items, 0);
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn full_refresh_clears_then_upserts_then_commits() {
        let recorder = Recorder::default();
        let client = GraphSyncClient::new(recorder.clone());
        let report = client
            .upload_triples(&ctx(), &triples(), SyncMode::FullRefresh)
            .unwrap();
        assert!(report.cleared);

        let calls = recorder.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            Call::Begin(SyncPhase::Clearing, Statement::bare(CLEAR_STATEMENT))
        );
        assert!(matches!(&calls[1], Call::RunIn(id, SyncPhase::BatchUpserting, _) if id == "tx1"));
        assert_eq!(calls[2], Call::Commit("tx1".into()));
    }

    #[test]
    fn failed_upsert_rolls_back_the_clear() {
        let recorder = Recorder {
            fail_in_tx: true,
            ..Recorder::default()
        };
        let client = GraphSyncClient::new(recorder.clone());
        let err = client
            .upload_triples(&ctx(), &triples(), SyncMode::FullRefresh)
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Rejected {
                phase: SyncPhase::BatchUpserting,
                ..
            }
        ));

        let calls = recorder.calls();
        assert_eq!(calls.last(), Some(&Call::Rollback("tx1".into())));
        assert!(!calls.iter().any(|c| matches!(c, Call::Commit(_))));
    }

    #[test]
    fn predictions_are_match_only_with_rounded_confidence() {
        let recorder = Recorder::default();
        let client = GraphSyncClient::new(recorder.clone());
        let edges = vec![ScoredEdge {
            subject: NamespacedId::new("Compound::DB00608"),
            object: NamespacedId::new("Disease::DOID:1498"),
            score: 0.873_456_9,
        }];
        client.upload_predictions(&ctx(), &edges).unwrap();

        let calls = recorder.calls();
        let Call::Run(phase, stmt) = &calls[0] else {
            panic!("expected implicit run");
        };
        assert_eq!(*phase, SyncPhase::PredictionUpserting);
        assert!(stmt.statement.contains("MATCH (s:Resource {id: p.s_id})"));
        assert!(!stmt.statement.contains("MERGE (s:Resource"));
        assert!(stmt.statement.contains(PREDICTED_RELATION));
        assert_eq!(stmt.parameters["predictions"][0]["score"], 0.8735);
    }

    #[test]
    fn rounding_to_four_places() {
        assert_eq!(round_confidence(0.123_449), 0.1234);
        assert_eq!(round_confidence(0.123_456_78), 0.1235);
        assert_eq!(round_confidence(0.5), 0.5);
    }
}
