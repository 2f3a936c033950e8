//! Fusion of surveillance facts with biomedical reference context.
//!
//! Active disease identifiers from the outbreak triples are looked up in the
//! [`ReferenceGraph`]; every whitelisted relation touching a matched disease
//! (by default Compound-treats-Disease and Compound-palliates-Disease) is
//! pulled in and appended to the surveillance triples.

use std::collections::HashSet;

use super::reference::{ReferenceGraph, ReferenceSource};
use super::{COMPOUND_PALLIATES_DISEASE, COMPOUND_TREATS_DISEASE, NamespacedId, Triple};
use crate::error::FusionResult;
use crate::pipeline::RunContext;

/// Surveillance and biomedical triples as one list.
///
/// This is a list union: a triple present in both sources appears twice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedTripleSet {
    triples: Vec<Triple>,
    surveillance: usize,
}

impl FusedTripleSet {
    /// Concatenate surveillance triples followed by biomedical triples.
    pub fn union(surveillance: Vec<Triple>, biomedical: Vec<Triple>) -> Self {
        let surveillance_len = surveillance.len();
        let mut triples = surveillance;
        triples.extend(biomedical);
        Self {
            triples,
            surveillance: surveillance_len,
        }
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn surveillance(&self) -> &[Triple] {
        &self.triples[..self.surveillance]
    }

    pub fn biomedical(&self) -> &[Triple] {
        &self.triples[self.surveillance..]
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn into_triples(self) -> Vec<Triple> {
        self.triples
    }
}

/// Maps active diseases onto the reference graph and extracts context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeFuser {
    relations: Vec<String>,
}

impl Default for KnowledgeFuser {
    fn default() -> Self {
        Self::new([COMPOUND_TREATS_DISEASE, COMPOUND_PALLIATES_DISEASE])
    }
}

impl KnowledgeFuser {
    /// Fuser restricted to the given relation whitelist.
    pub fn new<I, S>(relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relations: relations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    /// Whitelisted reference triples in which any active disease is subject
    /// or object.
    ///
    /// Unmatched identifiers are dropped with a warning. The result is in
    /// reference-store order, so it does not depend on the order of
    /// `active_diseases`.
    pub fn biomedical_context(
        &self,
        ctx: &RunContext,
        graph: &ReferenceGraph,
        active_diseases: &[NamespacedId],
    ) -> Vec<Triple> {
        let mut targets = HashSet::new();
        for disease in active_diseases {
            match graph.entity_id(disease.as_str()) {
                Some(id) => {
                    targets.insert(id);
                }
                None => tracing::warn!(
                    parent: ctx.span(),
                    disease = %disease,
                    "disease not present in reference graph, no context for it"
                ),
            }
        }
        if targets.is_empty() {
            tracing::warn!(
                parent: ctx.span(),
                requested = active_diseases.len(),
                "no matching disease ids found in reference graph"
            );
            return Vec::new();
        }

        let relations: HashSet<_> = self
            .relations
            .iter()
            .filter_map(|r| graph.relation_id(r))
            .collect();

        let triples: Vec<Triple> = graph
            .triples_touching(&targets, &relations)
            .map(|(h, r, t)| Triple::new(h, r, t))
            .collect();

        tracing::info!(
            parent: ctx.span(),
            matched = targets.len(),
            triples = triples.len(),
            "identified therapeutic triples in reference graph"
        );
        triples
    }

    /// Load the reference graph and fuse it with the surveillance triples.
    ///
    /// Reference initialization failure is returned as-is; callers treat it
    /// as fatal for the run.
    pub fn fuse(
        &self,
        ctx: &RunContext,
        source: &dyn ReferenceSource,
        surveillance: Vec<Triple>,
    ) -> FusionResult<FusedTripleSet> {
        tracing::info!(parent: ctx.span(), "initialising reference graph for fusion");
        let graph = source.load()?;
        let active = super::active_diseases(&surveillance);
        let biomedical = self.biomedical_context(ctx, &graph, &active);
        Ok(FusedTripleSet::union(surveillance, biomedical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RunDate;
    use crate::error::FusionError;
    use crate::graph::HAS_ACTIVE_OUTBREAK;

    const MALARIA: &str = "Disease::DOID:12365";
    const CHOLERA: &str = "Disease::DOID:1498";

    fn ctx() -> RunContext {
        RunContext::detached("2024-03-01".parse::<RunDate>().unwrap())
    }

    fn reference() -> ReferenceGraph {
        ReferenceGraph::from_labeled([
            ("Compound::DB00608", "CtD", MALARIA),
            ("Compound::DB01611", "CpD", MALARIA),
            ("Gene::1017", "DaG", MALARIA),
            ("Compound::DB00608", "CtD", CHOLERA),
            ("Compound::DB00999", "CtD", "Disease::DOID:9999"),
        ])
    }

    #[test]
    fn pulls_only_whitelisted_relations_for_matched_diseases() {
        let triples = KnowledgeFuser::default().biomedical_context(
            &ctx(),
            &reference(),
            &[NamespacedId::new(MALARIA)],
        );
        assert_eq!(
            triples,
            vec![
                Triple::new("Compound::DB00608", "CtD", MALARIA),
                Triple::new("Compound::DB01611", "CpD", MALARIA),
            ]
        );
    }

    #[test]
    fn unmatched_disease_does_not_suppress_others() {
        let triples = KnowledgeFuser::default().biomedical_context(
            &ctx(),
            &reference(),
            &[NamespacedId::new("N/A"), NamespacedId::new(CHOLERA)],
        );
        assert_eq!(triples, vec![Triple::new("Compound::DB00608", "CtD", CHOLERA)]);
    }

    #[test]
    fn nothing_matched_is_empty_not_error() {
        let triples = KnowledgeFuser::default().biomedical_context(
            &ctx(),
            &reference(),
            &[NamespacedId::new("Disease::DOID:0000")],
        );
        assert!(triples.is_empty());
    }

    #[test]
    fn membership_is_order_independent() {
        let fuser = KnowledgeFuser::default();
        let graph = reference();
        let a = fuser.biomedical_context(
            &ctx(),
            &graph,
            &[NamespacedId::new(MALARIA), NamespacedId::new(CHOLERA)],
        );
        let b = fuser.biomedical_context(
            &ctx(),
            &graph,
            &[NamespacedId::new(CHOLERA), NamespacedId::new(MALARIA)],
        );
        let a: HashSet<_> = a.into_iter().collect();
        let b: HashSet<_> = b.into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn fuse_appends_context_without_dedup() {
        let surveillance = vec![
            Triple::new("Country::KE", HAS_ACTIVE_OUTBREAK, MALARIA),
            Triple::new("Country::UG", HAS_ACTIVE_OUTBREAK, MALARIA),
        ];
        // The reference graph also holds one of the surveillance facts.
        let mut graph = reference();
        graph.insert("Country::KE", HAS_ACTIVE_OUTBREAK, MALARIA);
        let fuser = KnowledgeFuser::new(["CtD", HAS_ACTIVE_OUTBREAK]);

        let fused = fuser.fuse(&ctx(), &graph, surveillance.clone()).unwrap();
        assert_eq!(fused.surveillance(), surveillance.as_slice());
        assert_eq!(fused.biomedical().len(), 2);
        let ke = Triple::new("Country::KE", HAS_ACTIVE_OUTBREAK, MALARIA);
        assert_eq!(fused.triples().iter().filter(|t| **t == ke).count(), 2);
    }

    struct BrokenSource;

    impl ReferenceSource for BrokenSource {
        fn load(&self) -> FusionResult<ReferenceGraph> {
            Err(FusionError::ReferenceMissing {
                path: "nowhere".into(),
            })
        }
    }

    #[test]
    fn reference_failure_is_escalated() {
        let surveillance = vec![Triple::new("Country::KE", HAS_ACTIVE_OUTBREAK, MALARIA)];
        let err = KnowledgeFuser::default()
            .fuse(&ctx(), &BrokenSource, surveillance)
            .unwrap_err();
        assert!(matches!(err, FusionError::ReferenceMissing { .. }));
    }
}
