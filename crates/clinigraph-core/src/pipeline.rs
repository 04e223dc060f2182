//! # Submission Pipeline
//!
//! The interface offered to the request layer:
//! - `resolve_entity_tree`: hash-resolve a typed entity tree in place
//! - `normalize_submission`: mint, rewrite and attach statements
//! - `submit_*`: either of the above, then merge into the triple store
//!
//! Order of effects for a submit: stage (read only), check the staged graph
//! is mergeable, then one `commit_submission` that writes the directory
//! records and the triples together. A submission that fails leaves no
//! directory record and no triple behind.

use crate::directory::SubmissionStore;
use crate::graph::Graph;
use crate::minter::UriMinter;
use crate::normalizer::{GraphNormalizer, RewrittenGraph, StagedNormalization};
use crate::registry::TypeRegistry;
use crate::resolver::{IdentityResolver, Resolution, StagedResolution};
use crate::{ClinigraphError, Context, Iri, Term, VariableBindings};

/// Outcome of a stored entity-tree submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTree {
    pub graph: Graph,
    pub resolution: Resolution,
    /// Triples newly added to the store.
    pub stored: usize,
}

/// Outcome of a stored statement submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStatements {
    pub rewritten: RewrittenGraph,
    /// Triples newly added to the store.
    pub stored: usize,
}

/// Resolver, normalizer and triple store over one backing store.
#[derive(Debug)]
pub struct Pipeline<'a, S>
where
    S: SubmissionStore + ?Sized,
{
    registry: &'a TypeRegistry,
    minter: UriMinter<'a>,
    store: &'a S,
}

impl<'a, S> Pipeline<'a, S>
where
    S: SubmissionStore + ?Sized,
{
    #[must_use]
    pub fn new(registry: &'a TypeRegistry, base_url: &str, store: &'a S) -> Self {
        Self {
            registry,
            minter: UriMinter::new(registry, base_url),
            store,
        }
    }

    #[must_use]
    pub fn minter(&self) -> &UriMinter<'a> {
        &self.minter
    }

    fn resolver(&self) -> IdentityResolver<'a, S> {
        IdentityResolver::new(self.registry, self.store)
    }

    fn normalizer(&self) -> GraphNormalizer<'a, S> {
        GraphNormalizer::new(self.minter.clone(), self.store)
    }

    /// Resolve the entity tree rooted at `root_type` in place.
    pub fn resolve_entity_tree(
        &self,
        root_type: &Iri,
        context: &Context,
        graph: &mut Graph,
    ) -> Result<Resolution, ClinigraphError> {
        self.resolver().resolve(root_type, context, graph)
    }

    /// Normalize a submission for `record`.
    pub fn normalize_submission(
        &self,
        graph: &Graph,
        record: &Iri,
        bindings: &VariableBindings,
    ) -> Result<RewrittenGraph, ClinigraphError> {
        self.normalizer().normalize(graph, record, bindings)
    }

    /// Preview an entity-tree resolution without writing anything.
    pub fn preview_entity_tree(
        &self,
        root_type: &Iri,
        context: &Context,
        graph: &Graph,
    ) -> Result<StagedResolution, ClinigraphError> {
        self.resolver().stage(root_type, context, graph)
    }

    /// Preview a normalization without writing anything.
    pub fn preview_submission(
        &self,
        graph: &Graph,
        record: &Iri,
        bindings: &VariableBindings,
    ) -> Result<StagedNormalization, ClinigraphError> {
        self.normalizer().stage(graph, record, bindings)
    }

    /// Resolve, then merge the resolved graph into the triple store.
    pub fn submit_entity_tree(
        &self,
        root_type: &Iri,
        context: &Context,
        graph: &Graph,
    ) -> Result<StoredTree, ClinigraphError> {
        let staged = self.resolver().stage(root_type, context, graph)?;
        self.check_mergeable(&staged.graph)?;

        let receipt = self
            .store
            .commit_submission(&staged.batch(), &[], &staged.graph)?;
        let (graph, resolution) = staged.settle(&receipt.identities);
        let stored = receipt.stored;

        tracing::info!(root_type = %root_type, stored, "entity tree stored");
        Ok(StoredTree {
            graph,
            resolution,
            stored,
        })
    }

    /// Normalize, then merge the rewritten graph into the triple store.
    pub fn submit_statements(
        &self,
        graph: &Graph,
        record: &Iri,
        bindings: &VariableBindings,
    ) -> Result<StoredStatements, ClinigraphError> {
        let staged = self.normalizer().stage(graph, record, bindings)?;
        self.check_mergeable(&staged.rewritten.graph)?;

        let receipt = self
            .store
            .commit_submission(&[], &staged.batch(), &staged.rewritten.graph)?;
        let rewritten = staged.settle(&receipt.references);
        let stored = receipt.stored;

        tracing::info!(record = %record, stored, "statements stored");
        Ok(StoredStatements { rewritten, stored })
    }

    /// Refuse graphs that still hold anonymous nodes of a registered type.
    ///
    /// Untyped anonymous nodes are plain structure and may be stored.
    pub fn check_mergeable(&self, graph: &Graph) -> Result<(), ClinigraphError> {
        for node in graph.anonymous_nodes() {
            let term = Term::Blank(node);
            if let Some(type_iri) = graph
                .types_of(&term)
                .into_iter()
                .find(|t| self.registry.contains(t))
            {
                return Err(ClinigraphError::MalformedEntity {
                    type_iri,
                    node: term.to_string(),
                    reason: "anonymous node left unresolved".to_string(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
