//! # Identity Resolver
//!
//! Hash-based resolution of anonymous nodes to canonical identifiers.
//!
//! Per level: scan the anonymous nodes of a type (scoped to the context),
//! hash each one, reuse the directory's identifier or mint `{type}/{hash}`,
//! rewrite the node everywhere, then descend into the child types with the
//! resolved identifier as the new context.
//!
//! ## All-or-nothing
//!
//! Resolution runs in two phases. `stage` works on a private copy of the
//! graph and only reads the directory; new records are buffered. `commit`
//! writes the buffer in one batch and `settle`s on any race winners. A failed
//! stage leaves both the directory and the caller's graph untouched.

use crate::directory::{EntityDirectory, PendingWrites, converge_graph};
use crate::graph::Graph;
use crate::hashing::identifying_hash;
use crate::primitives::MAX_RESOLVE_DEPTH;
use crate::registry::TypeRegistry;
use crate::{BlankId, ClinigraphError, Context, Iri, Term};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one resolve call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every anonymous node that was rewritten, with its identifier.
    pub resolved: BTreeMap<BlankId, Iri>,
    /// Identifiers whose directory record this call created.
    pub created: BTreeSet<Iri>,
    /// Identifiers that already had a directory record.
    pub reused: BTreeSet<Iri>,
}

/// A resolution computed but not yet committed to the directory.
#[derive(Debug, Clone)]
pub struct StagedResolution {
    /// The rewritten graph as it will look after commit, barring races.
    pub graph: Graph,
    pub resolution: Resolution,
    pending: PendingWrites<String>,
}

impl StagedResolution {
    /// Number of directory records the commit will try to create.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.pending.len()
    }

    /// The buffered records, in staging order.
    #[must_use]
    pub fn batch(&self) -> Vec<(String, Iri)> {
        self.pending.batch()
    }

    /// Finish with the directory's winners for `batch()`, in the same order.
    ///
    /// If another writer created one of the hashes first, its identifier
    /// wins and the graph is rewritten to it.
    #[must_use]
    pub fn settle(self, winners: &[Iri]) -> (Graph, Resolution) {
        let Self {
            mut graph,
            mut resolution,
            pending,
        } = self;

        let batch = pending.batch();
        converge_graph(&mut graph, &batch, winners);

        for ((hash, candidate), winner) in batch.iter().zip(winners) {
            if winner == candidate {
                continue;
            }
            tracing::debug!(
                hash = %hash,
                lost = %candidate,
                winner = %winner,
                "converged on existing record"
            );
            resolution.created.remove(candidate);
            for resolved in resolution.resolved.values_mut() {
                if resolved == candidate {
                    *resolved = winner.clone();
                }
            }
            resolution.reused.insert(winner.clone());
        }

        tracing::info!(
            resolved = resolution.resolved.len(),
            created = resolution.created.len(),
            reused = resolution.reused.len(),
            "resolution committed"
        );
        (graph, resolution)
    }
}

/// Resolves entity trees against an `EntityDirectory`.
#[derive(Debug)]
pub struct IdentityResolver<'a, D: EntityDirectory + ?Sized> {
    registry: &'a TypeRegistry,
    directory: &'a D,
}

impl<'a, D: EntityDirectory + ?Sized> IdentityResolver<'a, D> {
    #[must_use]
    pub fn new(registry: &'a TypeRegistry, directory: &'a D) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// Resolve every anonymous instance of `root_type` (and, recursively, of
    /// its child types) in `graph`.
    ///
    /// On error `graph` is unchanged and nothing was written.
    pub fn resolve(
        &self,
        root_type: &Iri,
        context: &Context,
        graph: &mut Graph,
    ) -> Result<Resolution, ClinigraphError> {
        let staged = self.stage(root_type, context, graph)?;
        let (rewritten, resolution) = self.commit(staged)?;
        *graph = rewritten;
        Ok(resolution)
    }

    /// Compute the resolution without writing to the directory.
    ///
    /// A `MalformedEntity` candidate does not stop its siblings from being
    /// processed, but the first such error is returned once the walk ends.
    /// Directory and configuration errors abort immediately.
    pub fn stage(
        &self,
        root_type: &Iri,
        context: &Context,
        graph: &Graph,
    ) -> Result<StagedResolution, ClinigraphError> {
        let mut walk = Walk {
            graph: graph.clone(),
            pending: PendingWrites::new(),
            resolution: Resolution::default(),
            failures: Vec::new(),
        };

        self.resolve_level(root_type, context, &mut walk, 0)?;

        let failed = walk.failures.len();
        if let Some(first) = walk.failures.into_iter().next() {
            tracing::warn!(
                root_type = %root_type,
                context = %context.id(),
                failed,
                "resolution rejected"
            );
            return Err(first);
        }

        Ok(StagedResolution {
            graph: walk.graph,
            resolution: walk.resolution,
            pending: walk.pending,
        })
    }

    /// Write the staged records in one batch, then settle on the winners.
    pub fn commit(
        &self,
        staged: StagedResolution,
    ) -> Result<(Graph, Resolution), ClinigraphError> {
        let winners = self.directory.create_all_if_absent(&staged.batch())?;
        Ok(staged.settle(&winners))
    }

    fn resolve_level(
        &self,
        type_iri: &Iri,
        context: &Context,
        walk: &mut Walk,
        depth: usize,
    ) -> Result<(), ClinigraphError> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(ClinigraphError::InvalidConfiguration(format!(
                "child types nest deeper than {} at <{}>",
                MAX_RESOLVE_DEPTH, type_iri
            )));
        }

        let ty = self.registry.lookup(type_iri)?;
        let candidates = walk
            .graph
            .typed_subjects(&ty.iri, context.scope_node().as_ref());
        if candidates.is_empty() {
            return Ok(());
        }

        for candidate in candidates {
            let hash = match identifying_hash(ty, &walk.graph, &candidate, context) {
                Ok(hash) => hash,
                Err(e @ ClinigraphError::MalformedEntity { .. }) => {
                    tracing::warn!(
                        type_iri = %ty.iri,
                        node = %candidate.as_str(),
                        error = %e,
                        "candidate failed"
                    );
                    walk.failures.push(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let identifier = if let Some(staged) = walk.pending.get(&hash) {
                staged.clone()
            } else if let Some(existing) = self.directory.find_by_hash(&hash)? {
                tracing::debug!(
                    type_iri = %ty.iri,
                    identifier = %existing,
                    "reusing identity record"
                );
                walk.resolution.reused.insert(existing.clone());
                existing
            } else {
                let minted = Iri::new(format!("{}/{}", ty.iri, hash));
                tracing::debug!(
                    type_iri = %ty.iri,
                    identifier = %minted,
                    "creating identity record"
                );
                walk.resolution.created.insert(minted.clone());
                walk.pending.stage(hash, minted)
            };

            walk.graph
                .substitute(&Term::Blank(candidate.clone()), &Term::Iri(identifier.clone()));
            walk.resolution
                .resolved
                .insert(candidate, identifier.clone());

            let child_context = Context::child_of(identifier);
            for child in &ty.children {
                self.resolve_level(child, &child_context, walk, depth.saturating_add(1))?;
            }
        }

        Ok(())
    }
}

/// Mutable state of one staging walk.
struct Walk {
    graph: Graph,
    pending: PendingWrites<String>,
    resolution: Resolution,
    failures: Vec<ClinigraphError>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::directory::MemoryStore;
    use crate::primitives::RDF_TYPE;
    use crate::Triple;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MED: &str = "http://smartplatforms.org/med#medication";
    const FULFILLMENT: &str = "http://smartplatforms.org/med#fulfillment";
    const DRUG: &str = "http://smartplatforms.org/med#drug";
    const FULFILLED_BY: &str = "http://smartplatforms.org/terms#fulfillment";
    const DATE: &str = "http://purl.org/dc/elements/1.1/date";

    fn add(graph: &mut Graph, s: Term, p: &str, o: Term) {
        graph.add(Triple::new(s, Iri::new(p), o));
    }

    fn medication(graph: &mut Graph, label: &str, drug: &str) {
        add(graph, Term::blank(label), RDF_TYPE, Term::iri(MED));
        add(graph, Term::blank(label), DRUG, Term::iri(drug));
    }

    fn fulfillment(graph: &mut Graph, med: &str, label: &str, date: Option<&str>) {
        add(graph, Term::blank(label), RDF_TYPE, Term::iri(FULFILLMENT));
        add(graph, Term::blank(med), FULFILLED_BY, Term::blank(label));
        if let Some(date) = date {
            add(graph, Term::blank(label), DATE, Term::literal(date));
        }
    }

    fn record() -> Context {
        Context::root(Iri::new("http://localhost/records/R1"))
    }

    /// Memory directory that counts hash lookups.
    #[derive(Default)]
    struct Counting {
        inner: MemoryStore,
        lookups: AtomicUsize,
    }

    impl EntityDirectory for Counting {
        fn find_by_hash(&self, hash: &str) -> Result<Option<Iri>, ClinigraphError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_hash(hash)
        }
        fn create_if_absent(&self, hash: &str, id: &Iri) -> Result<Iri, ClinigraphError> {
            self.inner.create_if_absent(hash, id)
        }
        fn record_count(&self) -> Result<usize, ClinigraphError> {
            self.inner.record_count()
        }
    }

    /// Directory that is always unreachable.
    struct Unreachable;

    impl EntityDirectory for Unreachable {
        fn find_by_hash(&self, _: &str) -> Result<Option<Iri>, ClinigraphError> {
            Err(ClinigraphError::DirectoryUnavailable("down".into()))
        }
        fn create_if_absent(&self, _: &str, _: &Iri) -> Result<Iri, ClinigraphError> {
            Err(ClinigraphError::DirectoryUnavailable("down".into()))
        }
        fn record_count(&self) -> Result<usize, ClinigraphError> {
            Err(ClinigraphError::DirectoryUnavailable("down".into()))
        }
    }

    #[test]
    fn resolves_tree_and_rewrites_graph() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "m", "urn:rx/1");
        fulfillment(&mut graph, "m", "f", Some("2010-05-12"));

        let resolution = resolver
            .resolve(&Iri::new(MED), &record(), &mut graph)
            .expect("resolve");

        assert_eq!(resolution.resolved.len(), 2);
        assert_eq!(resolution.created.len(), 2);
        assert!(graph.anonymous_nodes().is_empty());
        assert_eq!(store.record_count().expect("count"), 2);

        let med_id = &resolution.resolved[&BlankId::new("m")];
        assert!(med_id.as_str().starts_with(&format!("{}/", MED)));
        let f_id = &resolution.resolved[&BlankId::new("f")];
        assert!(graph.contains(&Triple::new(
            Term::Iri(med_id.clone()),
            Iri::new(FULFILLED_BY),
            Term::Iri(f_id.clone()),
        )));
    }

    #[test]
    fn second_submission_reuses() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut first = Graph::new();
        medication(&mut first, "a", "urn:rx/1");
        let r1 = resolver
            .resolve(&Iri::new(MED), &record(), &mut first)
            .expect("resolve");

        let mut second = Graph::new();
        medication(&mut second, "zz", "urn:rx/1");
        let r2 = resolver
            .resolve(&Iri::new(MED), &record(), &mut second)
            .expect("resolve");

        assert!(r2.created.is_empty());
        assert_eq!(r1.created, r2.reused);
        assert_eq!(store.record_count().expect("count"), 1);
    }

    #[test]
    fn duplicates_in_one_submission_collapse() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "a", "urn:rx/1");
        medication(&mut graph, "b", "urn:rx/1");

        let resolution = resolver
            .resolve(&Iri::new(MED), &record(), &mut graph)
            .expect("resolve");

        assert_eq!(
            resolution.resolved[&BlankId::new("a")],
            resolution.resolved[&BlankId::new("b")]
        );
        assert_eq!(store.record_count().expect("count"), 1);
    }

    #[test]
    fn malformed_child_rejects_everything() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "m", "urn:rx/1");
        fulfillment(&mut graph, "m", "ok", Some("2010-05-12"));
        fulfillment(&mut graph, "m", "bad", None);
        let before = graph.clone();

        let result = resolver.resolve(&Iri::new(MED), &record(), &mut graph);

        assert!(matches!(result, Err(ClinigraphError::MalformedEntity { .. })));
        assert_eq!(graph, before);
        assert_eq!(store.record_count().expect("count"), 0);
    }

    #[test]
    fn sibling_failure_does_not_stop_processing() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = Counting::default();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        add(&mut graph, Term::blank("a_bad"), RDF_TYPE, Term::iri(MED));
        medication(&mut graph, "b_good", "urn:rx/1");

        let result = resolver.stage(&Iri::new(MED), &record(), &graph);

        assert!(matches!(result, Err(ClinigraphError::MalformedEntity { .. })));
        // The well-formed sibling after the failed one was still looked up.
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.record_count().expect("count"), 0);
    }

    #[test]
    fn unreachable_directory_is_fatal() {
        let registry = TypeRegistry::builtin().expect("registry");
        let resolver = IdentityResolver::new(&registry, &Unreachable);

        let mut graph = Graph::new();
        medication(&mut graph, "m", "urn:rx/1");
        let before = graph.clone();

        let result = resolver.resolve(&Iri::new(MED), &record(), &mut graph);
        assert!(matches!(result, Err(ClinigraphError::DirectoryUnavailable(_))));
        assert_eq!(graph, before);
    }

    #[test]
    fn no_candidates_is_noop() {
        let registry = TypeRegistry::builtin().expect("registry");
        let resolver = IdentityResolver::new(&registry, &Unreachable);

        let mut graph = Graph::new();
        add(&mut graph, Term::iri("urn:x"), "urn:p", Term::literal("v"));

        let resolution = resolver
            .resolve(&Iri::new(MED), &record(), &mut graph)
            .expect("resolve");
        assert_eq!(resolution, Resolution::default());
    }

    #[test]
    fn children_are_scoped_to_their_parent() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "m1", "urn:rx/1");
        medication(&mut graph, "m2", "urn:rx/2");
        fulfillment(&mut graph, "m1", "f1", Some("2010-05-12"));
        fulfillment(&mut graph, "m2", "f2", Some("2010-05-12"));

        let resolution = resolver
            .resolve(&Iri::new(MED), &record(), &mut graph)
            .expect("resolve");

        // Same date, different parent: distinct identities.
        assert_ne!(
            resolution.resolved[&BlankId::new("f1")],
            resolution.resolved[&BlankId::new("f2")]
        );
        assert_eq!(store.record_count().expect("count"), 4);
    }

    #[test]
    fn unscoped_child_is_left_alone() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "m", "urn:rx/1");
        add(&mut graph, Term::blank("orphan"), RDF_TYPE, Term::iri(FULFILLMENT));
        add(&mut graph, Term::blank("orphan"), DATE, Term::literal("2010-05-12"));

        let resolution = resolver
            .resolve(&Iri::new(MED), &record(), &mut graph)
            .expect("resolve");

        assert!(!resolution.resolved.contains_key(&BlankId::new("orphan")));
        assert!(graph.anonymous_nodes().contains(&BlankId::new("orphan")));
    }

    #[test]
    fn race_loser_converges_on_winner() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = Graph::new();
        medication(&mut graph, "m", "urn:rx/1");
        let staged = resolver
            .stage(&Iri::new(MED), &record(), &graph)
            .expect("stage");
        let (hash, _) = staged.pending.batch().into_iter().next().expect("pending");

        // Another writer lands first with a different identifier.
        let winner = Iri::new("urn:winner");
        store.create_if_absent(&hash, &winner).expect("create");

        let (rewritten, resolution) = resolver.commit(staged).expect("commit");
        assert_eq!(resolution.resolved[&BlankId::new("m")], winner);
        assert!(resolution.created.is_empty());
        assert!(rewritten.types_of(&Term::Iri(winner)).contains(&Iri::new(MED)));
    }

    #[test]
    fn unknown_root_type_is_error() {
        let registry = TypeRegistry::builtin().expect("registry");
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let result = resolver.resolve(&Iri::new("urn:nope"), &record(), &mut Graph::new());
        match result {
            Err(ClinigraphError::UnknownType(iri)) => assert_eq!(iri, Iri::new("urn:nope")),
            other => panic!("expected UnknownType, got {:?}", other),
        }
    }
}
