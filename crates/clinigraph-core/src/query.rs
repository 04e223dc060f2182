//! # Query Module
//!
//! Triple patterns with wildcard positions.
//!
//! A pattern is matched by the graph (see `Graph::query`) and by durable
//! triple stores. `None` in a position matches anything.

use crate::{Iri, Term, Triple};

/// A triple pattern. `None` positions are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Iri>,
    pub object: Option<Term>,
}

impl TriplePattern {
    /// The pattern matching every triple.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subject(mut self, subject: Term) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn predicate(mut self, predicate: Iri) -> Self {
        self.predicate = Some(predicate);
        self
    }

    #[must_use]
    pub fn object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    /// `(?, rdf:type, type_iri)`.
    #[must_use]
    pub fn instances_of(type_iri: &Iri) -> Self {
        Self::any()
            .predicate(Iri::new(crate::primitives::RDF_TYPE))
            .object(Term::Iri(type_iri.clone()))
    }

    #[must_use]
    pub fn matches(&self, triple: &Triple) -> bool {
        self.subject.as_ref().is_none_or(|s| s == &triple.subject)
            && self
                .predicate
                .as_ref()
                .is_none_or(|p| p == &triple.predicate)
            && self.object.as_ref().is_none_or(|o| o == &triple.object)
    }
}

// =============================================================================
// TESTS
// =============================================================================
