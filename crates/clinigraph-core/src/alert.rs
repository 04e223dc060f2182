//! # Alerts
//!
//! Extraction of a record alert from a submitted graph.
//!
//! The accepted shape is one `sp:Alert` node with a literal `sp:notes` and an
//! `sp:severity` node whose `sp:code` is one of the alert-level codes.

use crate::graph::Graph;
use crate::primitives::{ALERT_LEVEL_NS, SP_ALERT, SP_CODE, SP_NOTES, SP_SEVERITY};
use crate::query::TriplePattern;
use crate::{ClinigraphError, Iri, Term};
use serde::Serialize;
use std::fmt;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Information,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Parse a full alert-level code IRI.
    #[must_use]
    pub fn from_code(code: &Iri) -> Option<Self> {
        match code.as_str().strip_prefix(ALERT_LEVEL_NS)? {
            "information" => Some(Self::Information),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    #[must_use]
    pub fn code(&self) -> Iri {
        Iri::new(format!("{}{}", ALERT_LEVEL_NS, self.as_str()))
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub notes: String,
    pub level: AlertLevel,
}

impl Alert {
    /// Extract exactly one alert from `graph`.
    pub fn from_graph(graph: &Graph) -> Result<Self, ClinigraphError> {
        let notes_p = Iri::new(SP_NOTES);
        let severity_p = Iri::new(SP_SEVERITY);
        let code_p = Iri::new(SP_CODE);

        // Every (notes, code) combination reachable from an alert node.
        let mut found: Vec<(&Term, &Term)> = Vec::new();
        for triple in graph.query(&TriplePattern::instances_of(&Iri::new(SP_ALERT))) {
            let alert = triple.subject;
            for notes in graph.objects(&alert, &notes_p) {
                for severity in graph.objects(&alert, &severity_p) {
                    for code in graph.objects(severity, &code_p) {
                        found.push((notes, code));
                    }
                }
            }
        }

        let [(notes, code)] = found.as_slice() else {
            return Err(ClinigraphError::InvalidAlert(format!(
                "expected one alert, found {}",
                found.len()
            )));
        };

        let Term::Literal(notes) = notes else {
            return Err(ClinigraphError::InvalidAlert(
                "alert notes must be a literal".to_string(),
            ));
        };

        let level = code
            .as_iri()
            .and_then(AlertLevel::from_code)
            .ok_or_else(|| ClinigraphError::InvalidAlert(format!("unknown severity {}", code)))?;

        Ok(Self {
            notes: notes.lexical.clone(),
            level,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
