//! # Graph Normalizer
//!
//! Assigns canonical identifiers to a submitted graph and links clinical
//! statements to their owning record.
//!
//! A node is remapped when it is
//! - an anonymous node carrying exactly one recognised type (a statement
//!   type or the record type), or
//! - an external reference (`urn:smart_external_id:...`), reusing the
//!   identifier already on file or minting one from its type.
//!
//! Literals, untyped anonymous nodes and canonical IRIs pass through.
//!
//! Like the resolver, normalization is staged on a private copy of the graph
//! and new external mappings are committed in one batch at the end.

use crate::directory::{
    ExternalLookup, ExternalReferenceDirectory, PendingWrites, converge_graph,
};
use crate::graph::Graph;
use crate::minter::UriMinter;
use crate::primitives::{RDF_TYPE, SP_BELONGS_TO, SP_EXTERNAL_ID_FOR, SP_HAS_STATEMENT};
use crate::{ClinigraphError, Iri, Term, Triple, VariableBindings};
use std::collections::{BTreeMap, BTreeSet};

/// A normalized graph plus what happened to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewrittenGraph {
    pub graph: Graph,
    /// Original node -> assigned identifier.
    pub remapped: BTreeMap<Term, Iri>,
    /// Statements linked to the owning record.
    pub attached: BTreeSet<Iri>,
    /// External references mapped for the first time by this call.
    pub new_references: BTreeSet<Iri>,
}

/// A normalization computed but whose new external mappings are not yet
/// recorded.
#[derive(Debug, Clone)]
pub struct StagedNormalization {
    pub rewritten: RewrittenGraph,
    pending: PendingWrites<Iri>,
}

impl StagedNormalization {
    /// Number of external mappings the commit will try to record.
    #[must_use]
    pub fn pending_references(&self) -> usize {
        self.pending.len()
    }

    /// The buffered `reference -> identifier` mappings, in staging order.
    #[must_use]
    pub fn batch(&self) -> Vec<(Iri, Iri)> {
        self.pending.batch()
    }

    /// Finish with the directory's winners for `batch()`, in the same order.
    ///
    /// A reference that another submission recorded first keeps that
    /// submission's identifier; this graph is rewritten to it.
    #[must_use]
    pub fn settle(self, winners: &[Iri]) -> RewrittenGraph {
        let Self {
            mut rewritten,
            pending,
        } = self;

        let batch = pending.batch();
        converge_graph(&mut rewritten.graph, &batch, winners);

        for ((reference, minted), winner) in batch.iter().zip(winners) {
            if winner == minted {
                continue;
            }
            tracing::debug!(
                reference = %reference,
                lost = %minted,
                winner = %winner,
                "external reference recorded concurrently"
            );
            rewritten.new_references.remove(reference);
            for assigned in rewritten.remapped.values_mut() {
                if assigned == minted {
                    *assigned = winner.clone();
                }
            }
            if rewritten.attached.remove(minted) {
                rewritten.attached.insert(winner.clone());
            }
        }

        tracing::info!(
            remapped = rewritten.remapped.len(),
            attached = rewritten.attached.len(),
            new_references = rewritten.new_references.len(),
            "normalization committed"
        );
        rewritten
    }
}

/// Where a remapped node goes, and the recognised type it carried.
struct Target {
    identifier: Iri,
    type_iri: Option<Iri>,
}

/// Normalizes submissions against an `ExternalReferenceDirectory`.
#[derive(Debug)]
pub struct GraphNormalizer<'a, X: ExternalReferenceDirectory + ?Sized> {
    minter: UriMinter<'a>,
    external: &'a X,
}

impl<'a, X: ExternalReferenceDirectory + ?Sized> GraphNormalizer<'a, X> {
    #[must_use]
    pub fn new(minter: UriMinter<'a>, external: &'a X) -> Self {
        Self { minter, external }
    }

    /// Normalize `graph` for the record `record`, minting with `bindings`.
    pub fn normalize(
        &self,
        graph: &Graph,
        record: &Iri,
        bindings: &VariableBindings,
    ) -> Result<RewrittenGraph, ClinigraphError> {
        let staged = self.stage(graph, record, bindings)?;
        self.commit(staged)
    }

    /// Compute the normalized graph, reading but not writing the directory.
    pub fn stage(
        &self,
        graph: &Graph,
        record: &Iri,
        bindings: &VariableBindings,
    ) -> Result<StagedNormalization, ClinigraphError> {
        let mut pending = PendingWrites::new();
        let mut plan: BTreeMap<Term, Target> = BTreeMap::new();

        for node in graph.nodes() {
            if let Some(target) = self.remap_target(graph, &node, bindings, &mut pending)? {
                plan.insert(node, target);
            }
        }

        let mut rewritten = RewrittenGraph {
            graph: graph.clone(),
            ..RewrittenGraph::default()
        };

        // Every target is known before the first substitution.
        for (old, target) in &plan {
            let new = Term::Iri(target.identifier.clone());
            rewritten.graph.substitute(old, &new);
            if matches!(old, Term::Iri(_)) {
                rewritten.graph.add(Triple::new(
                    old.clone(),
                    Iri::new(SP_EXTERNAL_ID_FOR),
                    new,
                ));
            }
            rewritten
                .remapped
                .insert(old.clone(), target.identifier.clone());
        }

        self.attach_statements(&mut rewritten, &plan, record);
        rewritten.new_references = pending.batch().into_iter().map(|(r, _)| r).collect();

        Ok(StagedNormalization { rewritten, pending })
    }

    /// Record the staged external mappings in one batch, then settle on
    /// the winners.
    pub fn commit(&self, staged: StagedNormalization) -> Result<RewrittenGraph, ClinigraphError> {
        let winners = self.external.record_all(&staged.batch())?;
        Ok(staged.settle(&winners))
    }

    /// The single recognised type asserted on `node`, if any.
    fn recognised_type(&self, graph: &Graph, node: &Term) -> Result<Option<Iri>, ClinigraphError> {
        let registry = self.minter.registry();
        let mut recognised: Vec<Iri> = graph
            .types_of(node)
            .into_iter()
            .filter(|t| registry.is_recognised(t))
            .collect();

        if recognised.len() > 1 {
            return Err(ClinigraphError::ConflictingTypeAssertion {
                node: node.to_string(),
                types: recognised,
            });
        }
        Ok(recognised.pop())
    }

    fn remap_target(
        &self,
        graph: &Graph,
        node: &Term,
        bindings: &VariableBindings,
        pending: &mut PendingWrites<Iri>,
    ) -> Result<Option<Target>, ClinigraphError> {
        match node {
            Term::Literal(_) => Ok(None),
            Term::Blank(_) => {
                let Some(type_iri) = self.recognised_type(graph, node)? else {
                    return Ok(None);
                };
                let identifier = self.minter.mint(&type_iri, bindings)?;
                Ok(Some(Target {
                    identifier,
                    type_iri: Some(type_iri),
                }))
            }
            Term::Iri(reference) if reference.is_external_reference() => {
                let type_iri = self.recognised_type(graph, node)?;
                let identifier = match self.external.find_by_external_ref(reference)? {
                    ExternalLookup::Found(existing) => {
                        tracing::debug!(
                            reference = %reference,
                            identifier = %existing,
                            "reusing external mapping"
                        );
                        existing
                    }
                    ExternalLookup::Ambiguous(candidates) => {
                        tracing::warn!(
                            reference = %reference,
                            count = candidates.len(),
                            "ambiguous external reference"
                        );
                        return Err(ClinigraphError::AmbiguousExternalReference {
                            reference: reference.clone(),
                            candidates,
                        });
                    }
                    ExternalLookup::Absent => {
                        let ty = type_iri.as_ref().ok_or_else(|| {
                            ClinigraphError::UntypedExternalReference(reference.clone())
                        })?;
                        let minted = self.minter.mint(ty, bindings)?;
                        pending.stage(reference.clone(), minted)
                    }
                };
                Ok(Some(Target {
                    identifier,
                    type_iri,
                }))
            }
            Term::Iri(_) => Ok(None),
        }
    }

    fn attach_statements(
        &self,
        rewritten: &mut RewrittenGraph,
        plan: &BTreeMap<Term, Target>,
        record: &Iri,
    ) {
        let registry = self.minter.registry();
        let record_term = Term::Iri(record.clone());

        for target in plan.values() {
            let Some(ty) = target.type_iri.as_ref().and_then(|t| registry.get(t)) else {
                continue;
            };
            if !ty.statement || !ty.path.in_records_namespace() || &target.identifier == record {
                continue;
            }

            let statement = Term::Iri(target.identifier.clone());
            rewritten.graph.add(Triple::new(
                statement.clone(),
                Iri::new(SP_BELONGS_TO),
                record_term.clone(),
            ));
            rewritten.graph.add(Triple::new(
                record_term.clone(),
                Iri::new(SP_HAS_STATEMENT),
                statement,
            ));
            rewritten.graph.add(Triple::new(
                record_term.clone(),
                Iri::new(RDF_TYPE),
                Term::Iri(registry.record_type().clone()),
            ));
            rewritten.attached.insert(target.identifier.clone());
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
