//! Knowledge graph data model: namespaced identifiers and labelled triples.
//!
//! Every node in the hercule graph is identified by a [`NamespacedId`] of the
//! form `Namespace::Identifier` (`Country::KE`, `Compound::DB00608`,
//! `Disease::DOID:0050156`). The namespace doubles as the node label when the
//! triples are synchronized into the graph store.
//!
//! - [`reference`]: the biomedical reference graph (Hetionet edge list)
//! - [`fusion`]: merging surveillance triples with reference context

pub mod fusion;
pub mod reference;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between namespace and identifier.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Node label used when an identifier carries no namespace.
pub const DEFAULT_LABEL: &str = "Entity";

/// Predicate linking a reporting entity to a disease with an active outbreak.
pub const HAS_ACTIVE_OUTBREAK: &str = "has_active_outbreak";

/// Hetionet metaedge: Compound treats Disease.
pub const COMPOUND_TREATS_DISEASE: &str = "CtD";

/// Hetionet metaedge: Compound palliates Disease.
pub const COMPOUND_PALLIATES_DISEASE: &str = "CpD";

/// Namespace assigned to reporting entities from the indicator feed.
pub const COUNTRY_NAMESPACE: &str = "Country";

/// A `Namespace::Identifier` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespacedId(String);

impl NamespacedId {
    /// Wrap a raw identifier. No validation: identifiers without a separator
    /// are legal and map to the [`DEFAULT_LABEL`].
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build `namespace::identifier`.
    pub fn namespaced(namespace: &str, identifier: &str) -> Self {
        Self(format!("{namespace}{NAMESPACE_SEPARATOR}{identifier}"))
    }

    /// Namespace prefix, if the identifier has one.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once(NAMESPACE_SEPARATOR).map(|(ns, _)| ns)
    }

    /// Node label derived from the namespace, falling back to `Entity`.
    pub fn node_label(&self) -> &str {
        self.namespace().unwrap_or(DEFAULT_LABEL)
    }

    /// Identifier part after the namespace (the whole string if none).
    pub fn local_part(&self) -> &str {
        self.0
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(_, id)| id)
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespacedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespacedId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NamespacedId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Wire form of a triple: `[subject, predicate, object]`.
type TripleRepr = (NamespacedId, String, NamespacedId);

/// A fact edge (subject, predicate, object).
///
/// Serialized as a three-element JSON array so cache artifacts stay compact
/// and readable by other tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "TripleRepr", into = "TripleRepr")]
pub struct Triple {
    pub subject: NamespacedId,
    pub predicate: String,
    pub object: NamespacedId,
}

impl Triple {
    pub fn new(
        subject: impl Into<NamespacedId>,
        predicate: impl Into<String>,
        object: impl Into<NamespacedId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Surveillance fact: `Country::<code> has_active_outbreak <disease>`.
    pub fn outbreak(entity_code: &str, disease: &NamespacedId) -> Self {
        Self {
            subject: NamespacedId::namespaced(COUNTRY_NAMESPACE, entity_code),
            predicate: HAS_ACTIVE_OUTBREAK.to_string(),
            object: disease.clone(),
        }
    }

    /// Relationship type used in the graph store: uppercased, spaces as `_`.
    pub fn relationship_type(&self) -> String {
        relationship_type(&self.predicate)
    }
}

impl From<TripleRepr> for Triple {
    fn from((subject, predicate, object): TripleRepr) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl From<Triple> for TripleRepr {
    fn from(t: Triple) -> Self {
        (t.subject, t.predicate, t.object)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.predicate, self.object)
    }
}

/// Normalize a predicate into a graph-store relationship type.
pub fn relationship_type(predicate: &str) -> String {
    predicate.to_uppercase().replace(' ', "_")
}

/// Distinct disease identifiers that appear as objects of outbreak triples,
/// in first-seen order.
pub fn active_diseases(triples: &[Triple]) -> Vec<NamespacedId> {
    let mut seen = std::collections::HashSet::new();
    triples
        .iter()
        .filter(|t| t.predicate == HAS_ACTIVE_OUTBREAK)
        .filter(|t| seen.insert(t.object.clone()))
        .map(|t| t.object.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_comes_from_namespace() {
        assert_eq!(NamespacedId::new("Country::KE").node_label(), "Country");
        assert_eq!(
            NamespacedId::new("Disease::DOID:0050156").node_label(),
            "Disease"
        );
        assert_eq!(NamespacedId::new("DOID:0050156").node_label(), "Entity");
    }

    #[test]
    fn local_part_keeps_inner_colons() {
        let id = NamespacedId::new("Disease::DOID:0050156");
        assert_eq!(id.local_part(), "DOID:0050156");
        assert_eq!(NamespacedId::new("plain").local_part(), "plain");
    }

    #[test]
    fn relationship_type_uppercases_and_joins_spaces() {
        assert_eq!(relationship_type("has_active_outbreak"), "HAS_ACTIVE_OUTBREAK");
        assert_eq!(relationship_type("CtD"), "CTD");
        assert_eq!(relationship_type("treated by"), "TREATED_BY");
    }

    #[test]
    fn triple_serializes_as_array() {
        let t = Triple::outbreak("KE", &NamespacedId::new("Disease::DOID:0050156"));
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(
            json,
            r#"["Country::KE","has_active_outbreak","Disease::DOID:0050156"]"#
        );
        let back: Triple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn active_diseases_are_distinct_and_ordered() {
        let malaria = NamespacedId::new("Disease::DOID:12365");
        let cholera = NamespacedId::new("Disease::DOID:1498");
        let triples = vec![
            Triple::outbreak("KE", &malaria),
            Triple::outbreak("NG", &cholera),
            Triple::outbreak("UG", &malaria),
            Triple::new("Compound::DB00608", COMPOUND_TREATS_DISEASE, malaria.clone()),
        ];
        assert_eq!(active_diseases(&triples), vec![malaria, cholera]);
    }
}
