//! # Directories
//!
//! Durable lookups shared across submissions:
//! - `EntityDirectory`: identifying hash -> canonical identifier
//! - `ExternalReferenceDirectory`: external reference -> canonical identifier
//!
//! Both are create-if-absent, first-write-wins. Concurrent submissions that
//! race on the same key converge on whichever identifier landed first; the
//! loser rewrites its graph to the returned winner.
//!
//! `SubmissionStore` ties both directories to the triple store: a submission's
//! directory records and triples are committed together or not at all.
//!
//! `MemoryStore` implements all of them for tests and embedding.
//! The durable implementation lives in `storage`.

use crate::graph::{Graph, TripleStore};
use crate::query::TriplePattern;
use crate::{ClinigraphError, Iri, Term, Triple};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TRAITS
// =============================================================================

/// A persisted identity record: hash -> identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub hash: String,
    pub identifier: Iri,
}

/// Durable mapping from identifying hash to canonical identifier.
pub trait EntityDirectory: Send + Sync {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Iri>, ClinigraphError>;

    /// Store `hash -> identifier` unless a record already exists.
    /// Returns the identifier now on file, which may be another writer's.
    fn create_if_absent(&self, hash: &str, identifier: &Iri) -> Result<Iri, ClinigraphError>;

    /// Batch form of `create_if_absent`, applied atomically where the backend
    /// supports it. Winners are returned in input order.
    fn create_all_if_absent(&self, batch: &[(String, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        batch
            .iter()
            .map(|(hash, identifier)| self.create_if_absent(hash, identifier))
            .collect()
    }

    fn record_count(&self) -> Result<usize, ClinigraphError>;
}

/// Result of looking up an external reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalLookup {
    Absent,
    Found(Iri),
    /// The store already holds several identifiers for this reference.
    Ambiguous(Vec<Iri>),
}

/// Durable mapping from submitter-supplied external reference to canonical
/// identifier.
pub trait ExternalReferenceDirectory: Send + Sync {
    fn find_by_external_ref(&self, reference: &Iri) -> Result<ExternalLookup, ClinigraphError>;

    /// Record `reference -> identifier` unless the reference is already
    /// mapped. Returns the winning identifier.
    fn record(&self, reference: &Iri, identifier: &Iri) -> Result<Iri, ClinigraphError>;

    /// Batch form of `record`. Winners are returned in input order.
    fn record_all(&self, batch: &[(Iri, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        batch
            .iter()
            .map(|(reference, identifier)| self.record(reference, identifier))
            .collect()
    }
}

/// Map a set of stored identifiers to a lookup result.
pub(crate) fn lookup_from(candidates: BTreeSet<Iri>) -> ExternalLookup {
    let mut candidates: Vec<Iri> = candidates.into_iter().collect();
    match candidates.len() {
        0 => ExternalLookup::Absent,
        1 => candidates
            .pop()
            .map_or(ExternalLookup::Absent, ExternalLookup::Found),
        _ => ExternalLookup::Ambiguous(candidates),
    }
}

// =============================================================================
// SUBMISSION COMMIT
// =============================================================================

/// What one committed submission left in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Identity winners, in the order of the identity batch.
    pub identities: Vec<Iri>,
    /// External-reference winners, in the order of the reference batch.
    pub references: Vec<Iri>,
    /// Triples newly added by this commit.
    pub stored: usize,
}

/// Directories plus triple store, committed as one unit.
pub trait SubmissionStore: EntityDirectory + ExternalReferenceDirectory + TripleStore {
    /// Create the identity records, record the external references and merge
    /// `graph` in one atomic step.
    ///
    /// Winners are decided inside the commit. Staged identifiers that lost a
    /// race are rewritten to their winner before the triples are inserted.
    /// On error nothing is written.
    fn commit_submission(
        &self,
        identities: &[(String, Iri)],
        references: &[(Iri, Iri)],
        graph: &Graph,
    ) -> Result<CommitReceipt, ClinigraphError>;
}

/// Rewrite every staged identifier in `batch` that lost to a different winner.
pub fn converge_graph<K>(graph: &mut Graph, batch: &[(K, Iri)], winners: &[Iri]) {
    for ((_, staged), winner) in batch.iter().zip(winners) {
        if staged != winner {
            graph.substitute(&Term::Iri(staged.clone()), &Term::Iri(winner.clone()));
        }
    }
}

// =============================================================================
// PENDING WRITES
// =============================================================================

/// Directory writes staged during one submission, committed as one batch.
///
/// Staging the same key twice keeps the first identifier, so duplicates
/// inside one submission collapse onto one entity before anything is stored.
#[derive(Debug, Clone)]
pub struct PendingWrites<K> {
    entries: BTreeMap<K, Iri>,
    order: Vec<K>,
}

impl<K> Default for PendingWrites<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Ord + Clone> PendingWrites<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&Iri> {
        self.entries.get(key)
    }

    /// Stage `key -> identifier` and return the staged identifier.
    pub fn stage(&mut self, key: K, identifier: Iri) -> Iri {
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }
        self.order.push(key.clone());
        self.entries.insert(key, identifier.clone());
        identifier
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Staged writes in staging order.
    #[must_use]
    pub fn batch(&self) -> Vec<(K, Iri)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|id| (k.clone(), id.clone())))
            .collect()
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-process directories and triple store.
///
/// Every batch runs under a single lock, so batches are atomic with respect
/// to each other. A submission commit holds all three.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Mutex<BTreeMap<String, Iri>>,
    external: Mutex<BTreeMap<Iri, BTreeSet<Iri>>>,
    triples: RwLock<Graph>,
    offline: Mutex<bool>,
    triples_offline: Mutex<bool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every directory call fails with
    /// `DirectoryUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Simulate a failing triple store: merges and submission commits fail
    /// with `StoreUnavailable` while directory lookups keep working.
    pub fn set_triples_offline(&self, offline: bool) {
        *self.triples_offline.lock() = offline;
    }

    /// Add an external mapping without the first-use-wins check.
    ///
    /// Used to load legacy mappings, which may already be ambiguous.
    pub fn import_external_mapping(
        &self,
        reference: &Iri,
        identifier: &Iri,
    ) -> Result<(), ClinigraphError> {
        self.check_online()?;
        self.external
            .lock()
            .entry(reference.clone())
            .or_default()
            .insert(identifier.clone());
        Ok(())
    }

    fn check_online(&self) -> Result<(), ClinigraphError> {
        if *self.offline.lock() {
            return Err(ClinigraphError::DirectoryUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_triples_online(&self) -> Result<(), ClinigraphError> {
        if *self.triples_offline.lock() {
            return Err(ClinigraphError::StoreUnavailable(
                "memory triple store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn create_identities(
    identities: &mut BTreeMap<String, Iri>,
    batch: &[(String, Iri)],
) -> Vec<Iri> {
    batch
        .iter()
        .map(|(hash, identifier)| {
            identities
                .entry(hash.clone())
                .or_insert_with(|| identifier.clone())
                .clone()
        })
        .collect()
}

fn record_references(
    external: &mut BTreeMap<Iri, BTreeSet<Iri>>,
    batch: &[(Iri, Iri)],
) -> Vec<Iri> {
    batch
        .iter()
        .map(|(reference, identifier)| {
            let slot = external.entry(reference.clone()).or_default();
            match slot.first() {
                Some(existing) => existing.clone(),
                None => {
                    slot.insert(identifier.clone());
                    identifier.clone()
                }
            }
        })
        .collect()
}

impl EntityDirectory for MemoryStore {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Iri>, ClinigraphError> {
        self.check_online()?;
        Ok(self.identities.lock().get(hash).cloned())
    }

    fn create_if_absent(&self, hash: &str, identifier: &Iri) -> Result<Iri, ClinigraphError> {
        self.check_online()?;
        Ok(self
            .identities
            .lock()
            .entry(hash.to_string())
            .or_insert_with(|| identifier.clone())
            .clone())
    }

    fn create_all_if_absent(&self, batch: &[(String, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        self.check_online()?;
        Ok(create_identities(&mut self.identities.lock(), batch))
    }

    fn record_count(&self) -> Result<usize, ClinigraphError> {
        self.check_online()?;
        Ok(self.identities.lock().len())
    }
}

impl ExternalReferenceDirectory for MemoryStore {
    fn find_by_external_ref(&self, reference: &Iri) -> Result<ExternalLookup, ClinigraphError> {
        self.check_online()?;
        let candidates = self
            .external
            .lock()
            .get(reference)
            .cloned()
            .unwrap_or_default();
        Ok(lookup_from(candidates))
    }

    fn record(&self, reference: &Iri, identifier: &Iri) -> Result<Iri, ClinigraphError> {
        self.record_all(&[(reference.clone(), identifier.clone())])?
            .pop()
            .ok_or_else(|| ClinigraphError::DirectoryUnavailable("empty batch result".into()))
    }

    fn record_all(&self, batch: &[(Iri, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        self.check_online()?;
        Ok(record_references(&mut self.external.lock(), batch))
    }
}

impl TripleStore for MemoryStore {
    fn merge(&self, graph: &Graph) -> Result<usize, ClinigraphError> {
        self.check_triples_online()?;
        let mut stored = self.triples.write();
        Ok(graph.triples().filter(|t| stored.add(t.clone())).count())
    }

    fn matching(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, ClinigraphError> {
        Ok(self.triples.read().query(pattern).collect())
    }

    fn triple_count(&self) -> Result<usize, ClinigraphError> {
        Ok(self.triples.read().len())
    }
}

impl SubmissionStore for MemoryStore {
    fn commit_submission(
        &self,
        identities: &[(String, Iri)],
        references: &[(Iri, Iri)],
        graph: &Graph,
    ) -> Result<CommitReceipt, ClinigraphError> {
        self.check_online()?;
        self.check_triples_online()?;

        let mut identity_table = self.identities.lock();
        let mut external_table = self.external.lock();
        let mut stored = self.triples.write();

        let identity_winners = create_identities(&mut identity_table, identities);
        let reference_winners = record_references(&mut external_table, references);

        let mut graph = graph.clone();
        converge_graph(&mut graph, identities, &identity_winners);
        converge_graph(&mut graph, references, &reference_winners);
        let added = graph.triples().filter(|t| stored.add(t.clone())).count();

        Ok(CommitReceipt {
            identities: identity_winners,
            references: reference_winners,
            stored: added,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
