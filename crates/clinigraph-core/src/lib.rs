//! # clinigraph-core
//!
//! Identity resolution, identifier minting and graph normalization for
//! clinical triple submissions.
//!
//! Two passes turn a submitted graph into one that can be stored:
//! - **Resolution** (`resolver`): anonymous nodes of a typed entity tree get
//!   deterministic `{type}/{hash}` identifiers, derived from their durable
//!   content and parent context and shared through an `EntityDirectory`.
//! - **Normalization** (`normalizer`): clinical statements and external
//!   references get canonical resource identifiers minted from path
//!   templates, and statements are linked to their owning record.
//!
//! ## Architectural Constraints
//!
//! - Synchronous and free of network code; the request layer is the
//!   caller's concern
//! - Deterministic iteration: `BTreeMap`/`BTreeSet` only
//! - A submission works on its own graph; directories and the triple store
//!   are the only shared state and are injected as traits
//! - A failed call commits nothing

// =============================================================================
// MODULES
// =============================================================================

pub mod alert;
pub mod directory;
pub mod formats;
pub mod graph;
pub mod hashing;
pub mod minter;
pub mod normalizer;
pub mod pipeline;
pub mod primitives;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BlankId, ClinigraphError, Context, Iri, Literal, Term, Triple, VariableBindings,
};

// =============================================================================
// RE-EXPORTS: Graph and Collaborators
// =============================================================================

pub use directory::{
    CommitReceipt, EntityDirectory, ExternalLookup, ExternalReferenceDirectory, IdentityRecord,
    MemoryStore, PendingWrites, SubmissionStore,
};
pub use graph::{Graph, TripleStore};
pub use query::TriplePattern;
pub use registry::{HashField, HashRule, KeyExtractor, PathTemplate, SemanticType, TypeRegistry};
pub use storage::RedbStore;

// =============================================================================
// RE-EXPORTS: Passes
// =============================================================================

pub use alert::{Alert, AlertLevel};
pub use hashing::{digest, identifying_hash, identity_key};
pub use minter::UriMinter;
pub use normalizer::{GraphNormalizer, RewrittenGraph, StagedNormalization};
pub use pipeline::{Pipeline, StoredStatements, StoredTree};
pub use resolver::{IdentityResolver, Resolution, StagedResolution};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{GraphDocument, graph_from_json, graph_to_json};
