//! # Graph Engine
//!
//! The submission-scoped triple graph and the durable `TripleStore` seam.
//!
//! `Graph` is a set of triples indexed twice: subject -> predicate -> objects,
//! and object -> (predicate, subject). Both indexes are `BTreeMap`s so every
//! scan is deterministic, even though callers must not rely on query order.

use crate::query::TriplePattern;
use crate::{BlankId, ClinigraphError, Iri, Term, Triple};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TRIPLESTORE TRAIT
// =============================================================================

/// Durable graph storage shared across submissions.
///
/// Implementations must be safe to share between threads; `merge` must be
/// all-or-nothing.
pub trait TripleStore: Send + Sync {
    /// Insert every triple of `graph` not already present.
    /// Returns the number of newly stored triples.
    fn merge(&self, graph: &Graph) -> Result<usize, ClinigraphError>;

    /// All stored triples matching `pattern`.
    fn matching(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, ClinigraphError>;

    /// Total number of stored triples.
    fn triple_count(&self) -> Result<usize, ClinigraphError>;
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

type Iter<'a> = Box<dyn Iterator<Item = Triple> + 'a>;

/// A mutable set of triples representing one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    /// subject -> predicate -> objects
    spo: BTreeMap<Term, BTreeMap<Iri, BTreeSet<Term>>>,

    /// object -> (predicate, subject)
    ops: BTreeMap<Term, BTreeSet<(Iri, Term)>>,

    len: usize,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a triple. Returns `false` if it was already present.
    pub fn add(&mut self, triple: Triple) -> bool {
        let Triple {
            subject,
            predicate,
            object,
        } = triple;

        let inserted = self
            .spo
            .entry(subject.clone())
            .or_default()
            .entry(predicate.clone())
            .or_default()
            .insert(object.clone());

        if inserted {
            self.ops
                .entry(object)
                .or_default()
                .insert((predicate, subject));
            self.len = self.len.saturating_add(1);
        }
        inserted
    }

    /// Remove a triple. Returns `false` if it was not present.
    pub fn remove(&mut self, triple: &Triple) -> bool {
        let Some(predicates) = self.spo.get_mut(&triple.subject) else {
            return false;
        };
        let Some(objects) = predicates.get_mut(&triple.predicate) else {
            return false;
        };
        if !objects.remove(&triple.object) {
            return false;
        }
        if objects.is_empty() {
            predicates.remove(&triple.predicate);
        }
        if predicates.is_empty() {
            self.spo.remove(&triple.subject);
        }

        if let Some(pairs) = self.ops.get_mut(&triple.object) {
            pairs.remove(&(triple.predicate.clone(), triple.subject.clone()));
            if pairs.is_empty() {
                self.ops.remove(&triple.object);
            }
        }

        self.len = self.len.saturating_sub(1);
        true
    }

    #[must_use]
    pub fn contains(&self, triple: &Triple) -> bool {
        self.spo
            .get(&triple.subject)
            .and_then(|p| p.get(&triple.predicate))
            .is_some_and(|o| o.contains(&triple.object))
    }

    /// Replace `old` by `new` in every subject and object position.
    ///
    /// Affected triples are snapshotted before any mutation, so a triple that
    /// mentions `old` twice is rewritten once and none is visited twice.
    /// Returns the number of rewritten triples.
    pub fn substitute(&mut self, old: &Term, new: &Term) -> usize {
        if old == new {
            return 0;
        }

        let affected: BTreeSet<Triple> = self
            .subject_triples(old)
            .chain(self.object_triples(old))
            .collect();

        for triple in &affected {
            self.remove(triple);
        }
        for triple in &affected {
            self.add(triple.replaced(old, new));
        }

        affected.len()
    }

    /// Lazily match `pattern`. Order is unspecified; re-querying is safe.
    pub fn query<'a>(&'a self, pattern: &TriplePattern) -> Iter<'a> {
        let base = if let Some(subject) = &pattern.subject {
            self.subject_triples(subject)
        } else if let Some(object) = &pattern.object {
            self.object_triples(object)
        } else {
            self.triples()
        };
        let pattern = pattern.clone();
        Box::new(base.filter(move |t| pattern.matches(t)))
    }

    /// Every triple in the graph.
    pub fn triples(&self) -> Iter<'_> {
        Box::new(self.spo.iter().flat_map(|(s, predicates)| {
            predicates.iter().flat_map(move |(p, objects)| {
                objects
                    .iter()
                    .map(move |o| Triple::new(s.clone(), p.clone(), o.clone()))
            })
        }))
    }

    /// Objects of `(subject, predicate, ?)`.
    pub fn objects<'a>(
        &'a self,
        subject: &Term,
        predicate: &Iri,
    ) -> impl Iterator<Item = &'a Term> + use<'a> {
        self.spo
            .get(subject)
            .and_then(|p| p.get(predicate))
            .into_iter()
            .flatten()
    }

    /// IRIs asserted as `rdf:type` of `node`.
    #[must_use]
    pub fn types_of(&self, node: &Term) -> BTreeSet<Iri> {
        self.objects(node, &Iri::new(crate::primitives::RDF_TYPE))
            .filter_map(|t| t.as_iri().cloned())
            .collect()
    }

    /// Every node appearing as subject or object, literals included.
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<Term> {
        self.spo.keys().chain(self.ops.keys()).cloned().collect()
    }

    /// Every anonymous node still present in the graph.
    #[must_use]
    pub fn anonymous_nodes(&self) -> BTreeSet<BlankId> {
        self.spo
            .keys()
            .chain(self.ops.keys())
            .filter_map(|t| match t {
                Term::Blank(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// Anonymous nodes declared to have `type_iri`.
    ///
    /// With a `scope` node, only nodes that are the object of some triple
    /// whose subject is `scope` are returned. Resolution is detected by term
    /// kind: a node rewritten to an IRI never shows up again.
    #[must_use]
    pub fn typed_subjects(&self, type_iri: &Iri, scope: Option<&Term>) -> BTreeSet<BlankId> {
        self.query(&TriplePattern::instances_of(type_iri))
            .filter_map(|t| match t.subject {
                Term::Blank(b) => Some(b),
                _ => None,
            })
            .filter(|b| scope.is_none_or(|s| self.is_linked(s, &Term::Blank(b.clone()))))
            .collect()
    }

    /// True if some triple `(from, ?, to)` exists.
    #[must_use]
    pub fn is_linked(&self, from: &Term, to: &Term) -> bool {
        self.ops
            .get(to)
            .is_some_and(|pairs| pairs.iter().any(|(_, s)| s == from))
    }

    fn subject_triples<'a>(&'a self, subject: &Term) -> Iter<'a> {
        match self.spo.get_key_value(subject) {
            Some((s, predicates)) => Box::new(predicates.iter().flat_map(move |(p, objects)| {
                objects
                    .iter()
                    .map(move |o| Triple::new(s.clone(), p.clone(), o.clone()))
            })),
            None => Box::new(std::iter::empty()),
        }
    }

    fn object_triples<'a>(&'a self, object: &Term) -> Iter<'a> {
        match self.ops.get_key_value(object) {
            Some((o, pairs)) => Box::new(
                pairs
                    .iter()
                    .map(move |(p, s)| Triple::new(s.clone(), p.clone(), o.clone())),
            ),
            None => Box::new(std::iter::empty()),
        }
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut graph = Self::new();
        graph.extend(iter);
        graph
    }
}

impl Extend<Triple> for Graph {
    fn extend<I: IntoIterator<Item = Triple>>(&mut self, iter: I) {
        for triple in iter {
            self.add(triple);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
