//! # redb-backed Directories and Triple Store
//!
//! Durable storage for everything that outlives a submission:
//! - identity records (hash -> identifier)
//! - external-reference mappings (reference -> identifiers)
//! - the merged triple graph
//!
//! redb gives ACID write transactions with a single writer, so each batch
//! call below is one transaction and the create-if-absent checks inside it
//! cannot interleave with another writer. A submission commit writes all
//! three tables in one transaction. Readers run on MVCC snapshots.

use crate::directory::{
    CommitReceipt, EntityDirectory, ExternalLookup, ExternalReferenceDirectory, IdentityRecord,
    SubmissionStore, converge_graph, lookup_from,
};
use crate::graph::{Graph, TripleStore};
use crate::query::TriplePattern;
use crate::{ClinigraphError, Iri, Triple};
use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition, WriteTransaction,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Identity records: hash -> postcard(IdentityRecord)
const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

/// External references: reference -> identifier (several only for legacy data)
const EXTERNAL_REFS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("external_refs");

/// Merged triples: postcard(Triple) -> unit marker
const TRIPLES: TableDefinition<&[u8], u8> = TableDefinition::new("triples");

fn directory_error(e: impl std::fmt::Display) -> ClinigraphError {
    ClinigraphError::DirectoryUnavailable(e.to_string())
}

fn store_error(e: impl std::fmt::Display) -> ClinigraphError {
    ClinigraphError::StoreUnavailable(e.to_string())
}

fn serialization_error(e: impl std::fmt::Display) -> ClinigraphError {
    ClinigraphError::SerializationError(e.to_string())
}

/// Disk-backed directories and triple store.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClinigraphError> {
        let db = Database::create(path.as_ref()).map_err(|e| {
            ClinigraphError::IoError(format!("cannot open '{}': {}", path.as_ref().display(), e))
        })?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(store_error)?;
            let _ = write_txn.open_table(IDENTITIES).map_err(store_error)?;
            let _ = write_txn
                .open_multimap_table(EXTERNAL_REFS)
                .map_err(store_error)?;
            let _ = write_txn.open_table(TRIPLES).map_err(store_error)?;
            write_txn.commit().map_err(store_error)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "opened redb store");
        Ok(Self { db })
    }

    /// Add an external mapping without the first-use-wins check.
    ///
    /// Used to load legacy mappings, which may already be ambiguous.
    pub fn import_external_mapping(
        &self,
        reference: &Iri,
        identifier: &Iri,
    ) -> Result<(), ClinigraphError> {
        let write_txn = self.db.begin_write().map_err(directory_error)?;
        {
            let mut table = write_txn
                .open_multimap_table(EXTERNAL_REFS)
                .map_err(directory_error)?;
            table
                .insert(reference.as_str(), identifier.as_str())
                .map_err(directory_error)?;
        }
        write_txn.commit().map_err(directory_error)?;
        Ok(())
    }

    /// Number of distinct external references on file.
    pub fn external_reference_count(&self) -> Result<usize, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(directory_error)?;
        let table = read_txn
            .open_multimap_table(EXTERNAL_REFS)
            .map_err(directory_error)?;

        let mut count = 0usize;
        for entry in table.iter().map_err(directory_error)? {
            entry.map_err(directory_error)?;
            count = count.saturating_add(1);
        }
        Ok(count)
    }
}

// =============================================================================
// TRANSACTION STEPS
// =============================================================================

fn create_identities(
    txn: &WriteTransaction,
    batch: &[(String, Iri)],
) -> Result<Vec<Iri>, ClinigraphError> {
    let mut winners = Vec::with_capacity(batch.len());
    let mut table = txn.open_table(IDENTITIES).map_err(directory_error)?;

    for (hash, identifier) in batch {
        let existing = table
            .get(hash.as_str())
            .map_err(directory_error)?
            .map(|data| postcard::from_bytes::<IdentityRecord>(data.value()))
            .transpose()
            .map_err(serialization_error)?;

        match existing {
            Some(record) => winners.push(record.identifier),
            None => {
                let record = IdentityRecord {
                    hash: hash.clone(),
                    identifier: identifier.clone(),
                };
                let bytes = postcard::to_allocvec(&record).map_err(serialization_error)?;
                table
                    .insert(hash.as_str(), bytes.as_slice())
                    .map_err(directory_error)?;
                winners.push(identifier.clone());
            }
        }
    }
    Ok(winners)
}

fn record_references(
    txn: &WriteTransaction,
    batch: &[(Iri, Iri)],
) -> Result<Vec<Iri>, ClinigraphError> {
    let mut winners = Vec::with_capacity(batch.len());
    let mut table = txn
        .open_multimap_table(EXTERNAL_REFS)
        .map_err(directory_error)?;

    for (reference, identifier) in batch {
        // Values iterate in key order; the smallest one is the winner
        // for legacy multi-valued entries.
        let existing = match table
            .get(reference.as_str())
            .map_err(directory_error)?
            .next()
        {
            Some(value) => Some(Iri::new(value.map_err(directory_error)?.value())),
            None => None,
        };

        match existing {
            Some(winner) => winners.push(winner),
            None => {
                table
                    .insert(reference.as_str(), identifier.as_str())
                    .map_err(directory_error)?;
                winners.push(identifier.clone());
            }
        }
    }
    Ok(winners)
}

fn insert_triples(txn: &WriteTransaction, graph: &Graph) -> Result<usize, ClinigraphError> {
    let mut added = 0usize;
    let mut table = txn.open_table(TRIPLES).map_err(store_error)?;
    for triple in graph.triples() {
        let key = postcard::to_allocvec(&triple).map_err(serialization_error)?;
        if table.insert(key.as_slice(), 0u8).map_err(store_error)?.is_none() {
            added = added.saturating_add(1);
        }
    }
    Ok(added)
}

// =============================================================================
// ENTITY DIRECTORY
// =============================================================================

impl EntityDirectory for RedbStore {
    fn find_by_hash(&self, hash: &str) -> Result<Option<Iri>, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(directory_error)?;
        let table = read_txn.open_table(IDENTITIES).map_err(directory_error)?;

        match table.get(hash).map_err(directory_error)? {
            Some(data) => {
                let record: IdentityRecord =
                    postcard::from_bytes(data.value()).map_err(serialization_error)?;
                Ok(Some(record.identifier))
            }
            None => Ok(None),
        }
    }

    fn create_if_absent(&self, hash: &str, identifier: &Iri) -> Result<Iri, ClinigraphError> {
        self.create_all_if_absent(&[(hash.to_string(), identifier.clone())])?
            .pop()
            .ok_or_else(|| directory_error("empty batch result"))
    }

    fn create_all_if_absent(&self, batch: &[(String, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let write_txn = self.db.begin_write().map_err(directory_error)?;
        let winners = create_identities(&write_txn, batch)?;
        write_txn.commit().map_err(directory_error)?;

        Ok(winners)
    }

    fn record_count(&self) -> Result<usize, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(directory_error)?;
        let table = read_txn.open_table(IDENTITIES).map_err(directory_error)?;
        let len = table.len().map_err(directory_error)?;
        usize::try_from(len).map_err(directory_error)
    }
}

// =============================================================================
// EXTERNAL REFERENCE DIRECTORY
// =============================================================================

impl ExternalReferenceDirectory for RedbStore {
    fn find_by_external_ref(&self, reference: &Iri) -> Result<ExternalLookup, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(directory_error)?;
        let table = read_txn
            .open_multimap_table(EXTERNAL_REFS)
            .map_err(directory_error)?;

        let mut candidates = BTreeSet::new();
        for value in table.get(reference.as_str()).map_err(directory_error)? {
            let value = value.map_err(directory_error)?;
            candidates.insert(Iri::new(value.value()));
        }
        Ok(lookup_from(candidates))
    }

    fn record(&self, reference: &Iri, identifier: &Iri) -> Result<Iri, ClinigraphError> {
        self.record_all(&[(reference.clone(), identifier.clone())])?
            .pop()
            .ok_or_else(|| directory_error("empty batch result"))
    }

    fn record_all(&self, batch: &[(Iri, Iri)]) -> Result<Vec<Iri>, ClinigraphError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let write_txn = self.db.begin_write().map_err(directory_error)?;
        let winners = record_references(&write_txn, batch)?;
        write_txn.commit().map_err(directory_error)?;

        Ok(winners)
    }
}

// =============================================================================
// TRIPLE STORE
// =============================================================================

impl TripleStore for RedbStore {
    fn merge(&self, graph: &Graph) -> Result<usize, ClinigraphError> {
        let write_txn = self.db.begin_write().map_err(store_error)?;
        let added = insert_triples(&write_txn, graph)?;
        write_txn.commit().map_err(store_error)?;
        Ok(added)
    }

    fn matching(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(store_error)?;
        let table = read_txn.open_table(TRIPLES).map_err(store_error)?;

        let mut found = Vec::new();
        for entry in table.iter().map_err(store_error)? {
            let (key, _) = entry.map_err(store_error)?;
            let triple: Triple = postcard::from_bytes(key.value()).map_err(serialization_error)?;
            if pattern.matches(&triple) {
                found.push(triple);
            }
        }
        Ok(found)
    }

    fn triple_count(&self) -> Result<usize, ClinigraphError> {
        let read_txn = self.db.begin_read().map_err(store_error)?;
        let table = read_txn.open_table(TRIPLES).map_err(store_error)?;
        let len = table.len().map_err(store_error)?;
        usize::try_from(len).map_err(store_error)
    }
}

// =============================================================================
// SUBMISSION COMMIT
// =============================================================================

impl SubmissionStore for RedbStore {
    fn commit_submission(
        &self,
        identities: &[(String, Iri)],
        references: &[(Iri, Iri)],
        graph: &Graph,
    ) -> Result<CommitReceipt, ClinigraphError> {
        let write_txn = self.db.begin_write().map_err(store_error)?;
        let identity_winners = create_identities(&write_txn, identities)?;
        let reference_winners = record_references(&write_txn, references)?;

        let mut graph = graph.clone();
        converge_graph(&mut graph, identities, &identity_winners);
        converge_graph(&mut graph, references, &reference_winners);
        let stored = insert_triples(&write_txn, &graph)?;
        write_txn.commit().map_err(store_error)?;

        tracing::debug!(
            identities = identities.len(),
            references = references.len(),
            stored,
            "submission committed"
        );
        Ok(CommitReceipt {
            identities: identity_winners,
            references: reference_winners,
            stored,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
