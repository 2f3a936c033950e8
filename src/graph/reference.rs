//! Biomedical reference graph: an id-mapped, labelled triple store.
//!
//! Labels are interned into dense [`EntityId`] / [`RelationId`] spaces so that
//! selecting "every edge touching these diseases" is a single scan over
//! integer triples. The store is loaded from a Hetionet SIF edge list
//! (`source<TAB>metaedge<TAB>target`), optionally gzipped, via a
//! [`ReferenceSource`].

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FusionError, FusionResult};

/// Header line of the Hetionet SIF export.
const SIF_HEADER: [&str; 3] = ["source", "metaedge", "target"];

/// Reference-store internal identifier for an entity label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

/// Reference-store internal identifier for a relation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MappedTriple {
    head: EntityId,
    relation: RelationId,
    tail: EntityId,
}

/// In-memory reference triple store keyed by entity label.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    entity_labels: Vec<String>,
    entity_to_id: HashMap<String, EntityId>,
    relation_labels: Vec<String>,
    relation_to_id: HashMap<String, RelationId>,
    mapped: Vec<MappedTriple>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from labelled `(head, relation, tail)` triples.
    pub fn from_labeled<I, S>(triples: I) -> Self
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: AsRef<str>,
    {
        let mut graph = Self::new();
        for (h, r, t) in triples {
            graph.insert(h.as_ref(), r.as_ref(), t.as_ref());
        }
        graph
    }

    /// Parse a SIF edge list. The header line and blank lines are skipped.
    pub fn from_sif<R: BufRead>(reader: R, origin: &str) -> FusionResult<Self> {
        let mut graph = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| FusionError::Io {
                path: origin.to_string(),
                source: e,
            })?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 || fields[..3].iter().any(|f| f.trim().is_empty()) {
                return Err(FusionError::MalformedEdge {
                    line: idx + 1,
                    content: line.chars().take(120).collect(),
                });
            }
            if idx == 0 && fields[..3] == SIF_HEADER {
                continue;
            }
            graph.insert(fields[0].trim(), fields[1].trim(), fields[2].trim());
        }
        Ok(graph)
    }

    /// Insert one labelled triple, interning its labels.
    pub fn insert(&mut self, head: &str, relation: &str, tail: &str) {
        let head = self.intern_entity(head);
        let relation = self.intern_relation(relation);
        let tail = self.intern_entity(tail);
        self.mapped.push(MappedTriple {
            head,
            relation,
            tail,
        });
    }

    fn intern_entity(&mut self, label: &str) -> EntityId {
        if let Some(id) = self.entity_to_id.get(label) {
            return *id;
        }
        let id = EntityId(self.entity_labels.len() as u32);
        self.entity_labels.push(label.to_string());
        self.entity_to_id.insert(label.to_string(), id);
        id
    }

    fn intern_relation(&mut self, label: &str) -> RelationId {
        if let Some(id) = self.relation_to_id.get(label) {
            return *id;
        }
        let id = RelationId(self.relation_labels.len() as u32);
        self.relation_labels.push(label.to_string());
        self.relation_to_id.insert(label.to_string(), id);
        id
    }

    /// Internal id of an entity label, if the store knows it.
    pub fn entity_id(&self, label: &str) -> Option<EntityId> {
        self.entity_to_id.get(label).copied()
    }

    /// Internal id of a relation label.
    pub fn relation_id(&self, label: &str) -> Option<RelationId> {
        self.relation_to_id.get(label).copied()
    }

    pub fn entity_label(&self, id: EntityId) -> &str {
        &self.entity_labels[id.0 as usize]
    }

    pub fn relation_label(&self, id: RelationId) -> &str {
        &self.relation_labels[id.0 as usize]
    }

    /// Labelled triples whose head or tail is in `targets` and whose relation
    /// is in `relations`, in store order.
    pub fn triples_touching<'a>(
        &'a self,
        targets: &'a HashSet<EntityId>,
        relations: &'a HashSet<RelationId>,
    ) -> impl Iterator<Item = (&'a str, &'a str, &'a str)> + 'a {
        self.mapped
            .iter()
            .filter(move |m| targets.contains(&m.head) || targets.contains(&m.tail))
            .filter(move |m| relations.contains(&m.relation))
            .map(move |m| {
                (
                    self.entity_label(m.head),
                    self.relation_label(m.relation),
                    self.entity_label(m.tail),
                )
            })
    }

    pub fn entity_count(&self) -> usize {
        self.entity_labels.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relation_labels.len()
    }

    /// Number of triples.
    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }
}

/// Anything that can produce a [`ReferenceGraph`] for fusion.
pub trait ReferenceSource {
    /// Initialize the reference store. Failure aborts the run.
    fn load(&self) -> FusionResult<ReferenceGraph>;
}

impl ReferenceSource for ReferenceGraph {
    fn load(&self) -> FusionResult<ReferenceGraph> {
        Ok(self.clone())
    }
}

/// A Hetionet SIF edge list on disk, optionally fetched on first use.
#[derive(Debug, Clone)]
pub struct SifFile {
    path: PathBuf,
    download_url: Option<String>,
    timeout: Duration,
}

impl SifFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            download_url: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Download from `url` when the file is absent.
    pub fn with_download(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_present(&self) -> FusionResult<()> {
        if self.path.is_file() {
            return Ok(());
        }
        let Some(url) = &self.download_url else {
            return Err(FusionError::ReferenceMissing {
                path: self.path.display().to_string(),
            });
        };

        tracing::info!(url = %url, path = %self.path.display(), "downloading reference graph");
        let download_err = |message: String| FusionError::Download {
            url: url.clone(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FusionError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent
            .get(url)
            .call()
            .map_err(|e| download_err(e.to_string()))?;

        let partial = self.path.with_extension("part");
        let mut out = File::create(&partial).map_err(|e| FusionError::Io {
            path: partial.display().to_string(),
            source: e,
        })?;
        std::io::copy(&mut response.into_reader(), &mut out)
            .map_err(|e| download_err(format!("read body: {e}")))?;
        std::fs::rename(&partial, &self.path).map_err(|e| FusionError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    fn open_reader(&self) -> FusionResult<Box<dyn BufRead>> {
        let file = File::open(&self.path).map_err(|e| FusionError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let gzipped = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        if gzipped {
            Ok(Box::new(BufReader::new(flate2::read::GzDecoder::new(file))))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

impl ReferenceSource for SifFile {
    fn load(&self) -> FusionResult<ReferenceGraph> {
        self.ensure_present()?;
        let origin = self.path.display().to_string();
        let graph = ReferenceGraph::from_sif(self.open_reader()?, &origin)?;
        if graph.is_empty() {
            return Err(FusionError::Empty { path: origin });
        }
        tracing::info!(
            entities = graph.entity_count(),
            relations = graph.relation_count(),
            triples = graph.len(),
            "reference graph loaded"
        );
        Ok(graph)
    }
}
