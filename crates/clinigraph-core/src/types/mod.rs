//! # Core Type Definitions
//!
//! This module contains all core types for the clinigraph triple substrate:
//! - Graph terms (`Iri`, `BlankId`, `Literal`, `Term`) and `Triple`
//! - Resolution scope (`Context`) and template input (`VariableBindings`)
//! - Error types (`ClinigraphError`)
//!
//! ## Determinism Guarantees
//!
//! All term types implement `Ord` so graphs, indexes and directory snapshots
//! can live in `BTreeMap`/`BTreeSet` and iterate in a stable order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// TERMS
// =============================================================================

/// A canonical resource identifier.
///
/// Predicates are always IRIs. Subjects and objects are IRIs once they have
/// been resolved or minted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Iri(pub String);

impl Iri {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this IRI is a submitter-supplied foreign key
    /// (`urn:smart_external_id:...`) rather than a canonical identifier.
    #[must_use]
    pub fn is_external_reference(&self) -> bool {
        self.0.starts_with(crate::primitives::EXTERNAL_ID_PREFIX)
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label of an anonymous node. Only meaningful inside one submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlankId(pub String);

impl BlankId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A literal value with optional datatype or language tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    #[serde(default)]
    pub datatype: Option<Iri>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Literal {
    /// Plain literal with neither datatype nor language.
    #[must_use]
    pub fn plain(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    #[must_use]
    pub fn typed(lexical: impl Into<String>, datatype: Iri) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Some(datatype),
            language: None,
        }
    }
}

/// Subject or object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Anonymous node, scoped to one submission.
    Blank(BlankId),
    /// Canonical identifier (or an external reference awaiting remap).
    Iri(Iri),
    /// Literal value. Never a candidate for remapping.
    Literal(Literal),
}

impl Term {
    #[must_use]
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank(BlankId::new(label))
    }

    #[must_use]
    pub fn iri(s: impl Into<String>) -> Self {
        Self::Iri(Iri::new(s))
    }

    #[must_use]
    pub fn literal(lexical: impl Into<String>) -> Self {
        Self::Literal(Literal::plain(lexical))
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    #[must_use]
    pub fn as_iri(&self) -> Option<&Iri> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// Durable content of the term as an identity field value.
    ///
    /// IRIs are `i:<iri>`; literals are `l:` followed by the length-prefixed
    /// lexical form, the length-prefixed datatype and the language tag. An IRI
    /// and a literal of the same text never share a value, nor do literals
    /// that differ only in datatype or language. Anonymous labels have no
    /// durable content.
    #[must_use]
    pub fn identity_text(&self) -> Option<String> {
        match self {
            Self::Iri(iri) => Some(format!("i:{}", iri.as_str())),
            Self::Literal(lit) => {
                let datatype = lit.datatype.as_ref().map_or("", Iri::as_str);
                Some(format!(
                    "l:{}:{}{}:{}{}",
                    lit.lexical.len(),
                    lit.lexical,
                    datatype.len(),
                    datatype,
                    lit.language.as_deref().unwrap_or_default()
                ))
            }
            Self::Blank(_) => None,
        }
    }
}

impl From<Iri> for Term {
    fn from(iri: Iri) -> Self {
        Self::Iri(iri)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank(b) => write!(f, "_:{}", b.0),
            Self::Iri(iri) => write!(f, "<{}>", iri.0),
            Self::Literal(lit) => {
                write!(f, "{:?}", lit.lexical)?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{}", lang)?;
                } else if let Some(dt) = &lit.datatype {
                    write!(f, "^^<{}>", dt.0)?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// TRIPLE
// =============================================================================

/// A single `(subject, predicate, object)` statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Iri,
    pub object: Term,
}

impl Triple {
    #[must_use]
    pub fn new(subject: Term, predicate: Iri, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// True if `node` appears in subject or object position.
    #[must_use]
    pub fn mentions(&self, node: &Term) -> bool {
        &self.subject == node || &self.object == node
    }

    /// The same triple with every occurrence of `old` replaced by `new`.
    #[must_use]
    pub fn replaced(&self, old: &Term, new: &Term) -> Self {
        let swap = |t: &Term| if t == old { new.clone() } else { t.clone() };
        Self {
            subject: swap(&self.subject),
            predicate: self.predicate.clone(),
            object: swap(&self.object),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} .", self.subject, self.predicate, self.object)
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// The enclosing entity under which identity hashing and child traversal are
/// scoped.
///
/// A root context (the owning record) scans the whole submission for
/// candidates. A child context, created for each resolved entity, only
/// matches candidates linked from that entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    id: Iri,
    linked_only: bool,
}

impl Context {
    /// Top-level context, typically the owning record.
    #[must_use]
    pub fn root(id: Iri) -> Self {
        Self {
            id,
            linked_only: false,
        }
    }

    /// Narrowed context for the children of a just-resolved entity.
    #[must_use]
    pub fn child_of(id: Iri) -> Self {
        Self {
            id,
            linked_only: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> &Iri {
        &self.id
    }

    /// Node whose outgoing edges bound the candidate scan, if any.
    #[must_use]
    pub fn scope_node(&self) -> Option<Term> {
        self.linked_only.then(|| Term::Iri(self.id.clone()))
    }
}

// =============================================================================
// VARIABLE BINDINGS
// =============================================================================

/// Placeholder name -> value, used to instantiate a resource-path template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBindings(BTreeMap<String, String>);

impl VariableBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Bound value for `name`. An empty value counts as unbound.
    #[must_use]
    pub fn bound(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(String::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a `name=value` pair as given on a command line.
    pub fn parse_pair(pair: &str) -> Result<(String, String), ClinigraphError> {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            ClinigraphError::InvalidConfiguration(format!("binding '{}' is not name=value", pair))
        })?;
        if name.is_empty() {
            return Err(ClinigraphError::InvalidConfiguration(format!(
                "binding '{}' has an empty name",
                pair
            )));
        }
        Ok((name.to_string(), value.to_string()))
    }
}

impl FromIterator<(String, String)> for VariableBindings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while resolving, minting or normalizing a submission.
///
/// - No silent failures: every variant surfaces to the caller of
///   `resolve`/`normalize`
/// - A failed call leaves directories and the triple store unmodified
#[derive(Debug, Error)]
pub enum ClinigraphError {
    /// Identity-defining data is missing for a candidate node.
    #[error("Malformed entity {node} of type <{type_iri}>: {reason}")]
    MalformedEntity {
        type_iri: Iri,
        node: String,
        reason: String,
    },

    /// The entity or external-reference directory could not be reached.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A path template could not be instantiated from the given bindings.
    #[error("Unresolvable path '{template}': unbound {unbound:?}")]
    UnresolvablePath {
        template: String,
        unbound: Vec<String>,
    },

    /// An external reference maps to more than one canonical identifier.
    #[error("External reference <{reference}> maps to several identifiers: {candidates:?}")]
    AmbiguousExternalReference {
        reference: Iri,
        candidates: Vec<Iri>,
    },

    /// A node asserts more than one recognised semantic type.
    #[error("Conflicting type assertions on {node}: {types:?}")]
    ConflictingTypeAssertion { node: String, types: Vec<Iri> },

    /// A never-seen external reference carries no recognised type to mint from.
    #[error("External reference <{0}> is new and has no recognised type")]
    UntypedExternalReference(Iri),

    /// The type IRI is not registered.
    #[error("Unknown semantic type <{0}>")]
    UnknownType(Iri),

    /// Ontology or settings failed to load or validate.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The durable triple store could not be reached.
    #[error("Triple store unavailable: {0}")]
    StoreUnavailable(String),

    /// A submitted alert does not have the expected shape.
    #[error("Invalid alert: {0}")]
    InvalidAlert(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ClinigraphError {
    /// Whether resubmitting the whole submission may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable(_) | Self::StoreUnavailable(_)
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
