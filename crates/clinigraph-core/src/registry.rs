//! # Type Registry
//!
//! Static mapping from semantic-type IRI to its fixed-shape configuration:
//! resource-path template, clinical-statement flag, ordered child types and
//! identity hash rule.
//!
//! The registry is built once at startup (from TOML or the built-in ontology)
//! and is read-only afterwards. Every structural problem is rejected at load
//! time so resolution and minting never meet a half-valid configuration.

use crate::graph::Graph;
use crate::primitives::{RECORDS_NAMESPACE, SP_MEDICAL_RECORD};
use crate::{BlankId, ClinigraphError, Iri};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// PATH TEMPLATE
// =============================================================================

/// One `/`-separated segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A resource-path template such as `/records/{record_id}/problems/{problem_id}`.
///
/// Placeholders occupy whole segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, ClinigraphError> {
        let invalid = |why: &str| {
            ClinigraphError::InvalidConfiguration(format!("path template '{}': {}", raw, why))
        };

        let Some(rest) = raw.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };

        let mut segments = Vec::new();
        for part in rest.split('/') {
            if let Some(inner) = part.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .ok_or_else(|| invalid("unterminated placeholder"))?;
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(invalid("malformed placeholder"));
                }
                segments.push(Segment::Placeholder(name.to_string()));
            } else if part.contains(['{', '}']) {
                return Err(invalid("placeholders must fill a whole segment"));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in template order, without duplicates.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// True for templates rooted under `/records`.
    #[must_use]
    pub fn in_records_namespace(&self) -> bool {
        self.raw
            .strip_prefix(RECORDS_NAMESPACE)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

// =============================================================================
// HASH RULES
// =============================================================================

/// A field of the identity key: the value of `predicate` on the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashField {
    pub predicate: Iri,
    /// Missing required fields make the candidate a `MalformedEntity`.
    pub required: bool,
}

impl HashField {
    #[must_use]
    pub fn required(predicate: impl Into<String>) -> Self {
        Self {
            predicate: Iri::new(predicate),
            required: true,
        }
    }

    #[must_use]
    pub fn optional(predicate: impl Into<String>) -> Self {
        Self {
            predicate: Iri::new(predicate),
            required: false,
        }
    }
}

/// Custom identity-key extraction for a type the field list cannot express.
///
/// Returns the ordered key fields (`None` for an absent optional field); the
/// generic digest in `hashing` is applied on top.
pub type KeyExtractor = fn(&Graph, &BlankId) -> Result<Vec<Option<String>>, ClinigraphError>;

/// How the identifying hash of a type is computed.
#[derive(Debug, Clone)]
pub enum HashRule {
    /// Ordered list of predicates whose values form the identity key.
    Fields(Vec<HashField>),
    /// Programmatic extraction, registered in code only.
    Custom(KeyExtractor),
}

// =============================================================================
// SEMANTIC TYPE
// =============================================================================

/// Configuration of one semantic type.
#[derive(Debug, Clone)]
pub struct SemanticType {
    pub iri: Iri,
    pub path: PathTemplate,
    /// Top-level record entry that gets linked to its owning record.
    pub statement: bool,
    /// Child types resolved under each resolved instance, in order.
    pub children: Vec<Iri>,
    /// Present for types the identity resolver can handle.
    pub hash_rule: Option<HashRule>,
}

impl SemanticType {
    pub fn new(iri: impl Into<String>, path: &str) -> Result<Self, ClinigraphError> {
        Ok(Self {
            iri: Iri::new(iri),
            path: PathTemplate::parse(path)?,
            statement: false,
            children: Vec::new(),
            hash_rule: None,
        })
    }

    #[must_use]
    pub fn statement(mut self) -> Self {
        self.statement = true;
        self
    }

    #[must_use]
    pub fn child(mut self, iri: impl Into<String>) -> Self {
        self.children.push(Iri::new(iri));
        self
    }

    #[must_use]
    pub fn hashed_by(mut self, rule: HashRule) -> Self {
        self.hash_rule = Some(rule);
        self
    }

    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        self.hash_rule.is_some()
    }
}

// =============================================================================
// TOML CONFIGURATION
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OntologyConfig {
    #[serde(default = "default_record_type")]
    record_type: String,
    #[serde(default)]
    types: Vec<TypeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeConfig {
    iri: String,
    path: String,
    #[serde(default)]
    statement: bool,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    hash_fields: Vec<HashFieldConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HashFieldConfig {
    predicate: String,
    #[serde(default)]
    required: bool,
}

fn default_record_type() -> String {
    SP_MEDICAL_RECORD.to_string()
}

impl TryFrom<TypeConfig> for SemanticType {
    type Error = ClinigraphError;

    fn try_from(cfg: TypeConfig) -> Result<Self, Self::Error> {
        let mut ty = SemanticType::new(cfg.iri, &cfg.path)?;
        ty.statement = cfg.statement;
        ty.children = cfg.children.into_iter().map(Iri::new).collect();
        if !cfg.hash_fields.is_empty() {
            ty.hash_rule = Some(HashRule::Fields(
                cfg.hash_fields
                    .into_iter()
                    .map(|f| HashField {
                        predicate: Iri::new(f.predicate),
                        required: f.required,
                    })
                    .collect(),
            ));
        }
        Ok(ty)
    }
}

/// The ontology shipped with the binary.
pub const BUILTIN_ONTOLOGY: &str = r#"
record_type = "http://smartplatforms.org/terms#MedicalRecord"

[[types]]
iri = "http://smartplatforms.org/terms#MedicalRecord"
path = "/records/{record_id}"

[[types]]
iri = "http://smartplatforms.org/med#medication"
path = "/records/{record_id}/medications/{medication_id}"
statement = true
children = ["http://smartplatforms.org/med#fulfillment"]
hash_fields = [
    { predicate = "http://smartplatforms.org/med#drug", required = true },
    { predicate = "http://smartplatforms.org/med#notes" },
    { predicate = "http://purl.org/dc/terms/title" },
    { predicate = "http://smartplatforms.org/med#strength" },
]

[[types]]
iri = "http://smartplatforms.org/med#fulfillment"
path = "/records/{record_id}/medications/{medication_id}/fulfillments/{fulfillment_id}"
hash_fields = [
    { predicate = "http://purl.org/dc/elements/1.1/date", required = true },
]

[[types]]
iri = "http://smartplatforms.org/terms#Problem"
path = "/records/{record_id}/problems/{problem_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#Allergy"
path = "/records/{record_id}/allergies/{allergy_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#AllergyExclusion"
path = "/records/{record_id}/allergy_exclusions/{allergy_exclusion_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#LabResult"
path = "/records/{record_id}/lab_results/{lab_result_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#Encounter"
path = "/records/{record_id}/encounters/{encounter_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#VitalSigns"
path = "/records/{record_id}/vital_signs/{vital_signs_id}"
statement = true

[[types]]
iri = "http://smartplatforms.org/terms#Demographics"
path = "/records/{record_id}/demographics"
statement = true
"#;

// =============================================================================
// REGISTRY
// =============================================================================

/// Read-only lookup from type IRI to `SemanticType`.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<Iri, SemanticType>,
    record_type: Iri,
}

impl TypeRegistry {
    /// Build and validate a registry.
    ///
    /// Rejects duplicate IRIs, unregistered children, child cycles, child
    /// lists on non-resolvable types, empty field lists and an unregistered
    /// record type.
    pub fn new(types: Vec<SemanticType>, record_type: Iri) -> Result<Self, ClinigraphError> {
        let mut map = BTreeMap::new();
        for ty in types {
            let iri = ty.iri.clone();
            if map.insert(iri.clone(), ty).is_some() {
                return Err(ClinigraphError::InvalidConfiguration(format!(
                    "type <{}> registered twice",
                    iri
                )));
            }
        }

        let registry = Self {
            types: map,
            record_type,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse an ontology TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ClinigraphError> {
        let config: OntologyConfig = toml::from_str(source)
            .map_err(|e| ClinigraphError::InvalidConfiguration(e.to_string()))?;
        let types = config
            .types
            .into_iter()
            .map(SemanticType::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(types, Iri::new(config.record_type))
    }

    /// Load an ontology TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClinigraphError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            ClinigraphError::IoError(format!("cannot read ontology '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// The ontology compiled into the binary.
    pub fn builtin() -> Result<Self, ClinigraphError> {
        Self::from_toml_str(BUILTIN_ONTOLOGY)
    }

    /// Lookup a type; unknown IRIs are an error.
    pub fn lookup(&self, iri: &Iri) -> Result<&SemanticType, ClinigraphError> {
        self.types
            .get(iri)
            .ok_or_else(|| ClinigraphError::UnknownType(iri.clone()))
    }

    #[must_use]
    pub fn get(&self, iri: &Iri) -> Option<&SemanticType> {
        self.types.get(iri)
    }

    #[must_use]
    pub fn contains(&self, iri: &Iri) -> bool {
        self.types.contains_key(iri)
    }

    #[must_use]
    pub fn record_type(&self) -> &Iri {
        &self.record_type
    }

    /// Types the normalizer mints identifiers for: clinical statements and
    /// the record type itself.
    #[must_use]
    pub fn is_recognised(&self, iri: &Iri) -> bool {
        iri == &self.record_type || self.types.get(iri).is_some_and(|t| t.statement)
    }

    /// All types in IRI order.
    pub fn iter(&self) -> impl Iterator<Item = &SemanticType> {
        self.types.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn validate(&self) -> Result<(), ClinigraphError> {
        let invalid = |msg: String| Err(ClinigraphError::InvalidConfiguration(msg));

        if !self.types.contains_key(&self.record_type) {
            return invalid(format!("record type <{}> is not registered", self.record_type));
        }

        for ty in self.types.values() {
            if let Some(HashRule::Fields(fields)) = &ty.hash_rule {
                if fields.is_empty() {
                    return invalid(format!("type <{}> has an empty hash field list", ty.iri));
                }
            }
            if !ty.children.is_empty() && !ty.is_resolvable() {
                return invalid(format!("type <{}> has children but no hash rule", ty.iri));
            }
            for child in &ty.children {
                match self.types.get(child) {
                    None => {
                        return invalid(format!(
                            "type <{}> lists unregistered child <{}>",
                            ty.iri, child
                        ));
                    }
                    Some(c) if !c.is_resolvable() => {
                        return invalid(format!("child type <{}> has no hash rule", child));
                    }
                    Some(_) => {}
                }
            }
        }

        // Cycle check over child edges (iterative DFS with an explicit path set).
        let mut done: BTreeSet<&Iri> = BTreeSet::new();
        for root in self.types.keys() {
            let mut on_path: BTreeSet<&Iri> = BTreeSet::new();
            let mut stack: Vec<(&Iri, usize)> = vec![(root, 0)];
            while let Some((iri, next_child)) = stack.pop() {
                if next_child == 0 {
                    if done.contains(iri) {
                        continue;
                    }
                    on_path.insert(iri);
                }
                let children = self.types.get(iri).map(|t| t.children.as_slice()).unwrap_or(&[]);
                if let Some(child) = children.get(next_child) {
                    stack.push((iri, next_child + 1));
                    if on_path.contains(child) {
                        return invalid(format!("child cycle through <{}>", child));
                    }
                    stack.push((child, 0));
                } else {
                    on_path.remove(iri);
                    done.insert(iri);
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
