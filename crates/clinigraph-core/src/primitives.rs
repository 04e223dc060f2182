//! # Vocabulary and Limits
//!
//! Fixed IRIs and runtime bounds for the clinigraph core.
//!
//! These are compiled into the binary and immutable at runtime. The ontology
//! itself (which types exist, their templates and hash rules) is configuration
//! and lives in the `registry` module.

/// `rdf:type`.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Statement -> owning record link.
pub const SP_BELONGS_TO: &str = "http://smartplatforms.org/terms#belongsTo";

/// Record -> statement link.
pub const SP_HAS_STATEMENT: &str = "http://smartplatforms.org/terms#hasStatement";

/// Type asserted on every record that owns a statement.
pub const SP_MEDICAL_RECORD: &str = "http://smartplatforms.org/terms#MedicalRecord";

/// Provenance link: `<external ref> sp:externalIDFor <canonical id>`.
pub const SP_EXTERNAL_ID_FOR: &str = "http://smartplatforms.org/terms#externalIDFor";

/// Prefix marking an IRI as a submitter-supplied foreign key.
pub const EXTERNAL_ID_PREFIX: &str = "urn:smart_external_id:";

/// Path prefix under which clinical statements are attached to a record.
pub const RECORDS_NAMESPACE: &str = "/records";

/// Placeholder naming the owning record in path templates.
pub const RECORD_ID_VAR: &str = "record_id";

// =============================================================================
// ALERTS
// =============================================================================

pub const SP_ALERT: &str = "http://smartplatforms.org/terms#Alert";
pub const SP_NOTES: &str = "http://smartplatforms.org/terms#notes";
pub const SP_SEVERITY: &str = "http://smartplatforms.org/terms#severity";
pub const SP_CODE: &str = "http://smartplatforms.org/terms#code";

/// Namespace of the accepted alert-level codes.
pub const ALERT_LEVEL_NS: &str = "http://smartplatforms.org/terms/code/alertLevel#";

/// Accepted alert levels, local names under `ALERT_LEVEL_NS`.
pub const ALERT_LEVELS: [&str; 3] = ["information", "warning", "critical"];

// =============================================================================
// BOUNDS
// =============================================================================

/// Maximum depth of the parent -> child type recursion during resolution.
///
/// The registry rejects cyclic child lists at load time; this bound keeps a
/// programmatically built registry from recursing without limit.
pub const MAX_RESOLVE_DEPTH: usize = 16;

/// Maximum number of triples accepted in one submission.
pub const MAX_SUBMISSION_TRIPLES: usize = 100_000;

/// Format tag of the JSON graph document.
pub const DOCUMENT_FORMAT: &str = "clinigraph/1";

/// Maximum size of a JSON graph document, checked before parsing.
pub const MAX_DOCUMENT_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// Separator placed between identity-key fields before hashing.
///
/// Each field is also length-prefixed, so this byte only aids readability of
/// debug output; it is not relied on for unambiguity.
pub const HASH_FIELD_SEPARATOR: char = '\u{1f}';

/// Marker for an absent optional identity-key field.
pub const HASH_ABSENT_MARKER: &str = "-";
