//! # Identity Hashing
//!
//! Deterministic identifying hash of a candidate node.
//!
//! The key is built from the context identifier followed by the type's
//! identity fields in rule order. Every present value is length-prefixed, so
//! no two distinct field tuples can serialize to the same key. Field values
//! read from the graph carry their term kind (see `Term::identity_text`). The
//! digest is SHA-224, hex encoded.

use crate::graph::Graph;
use crate::primitives::{HASH_ABSENT_MARKER, HASH_FIELD_SEPARATOR};
use crate::registry::{HashRule, SemanticType};
use crate::{BlankId, ClinigraphError, Context, Term};
use sha2::{Digest, Sha224};

/// Serialize a context and its ordered identity fields into the hash key.
#[must_use]
pub fn identity_key(context: &str, fields: &[Option<String>]) -> String {
    let mut key = format!("{}:{}", context.len(), context);
    for field in fields {
        key.push(HASH_FIELD_SEPARATOR);
        match field {
            Some(value) => {
                key.push_str(&value.len().to_string());
                key.push(':');
                key.push_str(value);
            }
            None => key.push_str(HASH_ABSENT_MARKER),
        }
    }
    key
}

/// Hex-encoded SHA-224 of `key`.
#[must_use]
pub fn digest(key: &str) -> String {
    hex::encode(Sha224::digest(key.as_bytes()))
}

/// Ordered identity fields of `node` under `ty`'s hash rule.
///
/// Only the candidate's own outgoing edges are read. When a predicate carries
/// several values the smallest one is used, so the result never depends on
/// iteration order.
pub fn identity_fields(
    ty: &SemanticType,
    graph: &Graph,
    node: &BlankId,
) -> Result<Vec<Option<String>>, ClinigraphError> {
    let rule = ty.hash_rule.as_ref().ok_or_else(|| {
        ClinigraphError::InvalidConfiguration(format!("type <{}> has no hash rule", ty.iri))
    })?;

    match rule {
        HashRule::Custom(extract) => extract(graph, node),
        HashRule::Fields(fields) => {
            let subject = Term::Blank(node.clone());
            fields
                .iter()
                .map(|field| {
                    let value = graph
                        .objects(&subject, &field.predicate)
                        .filter_map(Term::identity_text)
                        .min();
                    if value.is_none() && field.required {
                        return Err(ClinigraphError::MalformedEntity {
                            type_iri: ty.iri.clone(),
                            node: subject.to_string(),
                            reason: format!("missing required <{}>", field.predicate),
                        });
                    }
                    Ok(value)
                })
                .collect()
        }
    }
}

/// Identifying hash of `node` as an instance of `ty` under `context`.
pub fn identifying_hash(
    ty: &SemanticType,
    graph: &Graph,
    node: &BlankId,
    context: &Context,
) -> Result<String, ClinigraphError> {
    let fields = identity_fields(ty, graph, node)?;
    Ok(digest(&identity_key(context.id().as_str(), &fields)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HashField, HashRule};
    use crate::{Iri, Literal, Triple};

    const DRUG: &str = "urn:drug";
    const NOTES: &str = "urn:notes";

    fn med_type() -> SemanticType {
        SemanticType::new("urn:Medication", "/records/{record_id}/medications/{medication_id}")
            .expect("type")
            .hashed_by(HashRule::Fields(vec![
                HashField::required(DRUG),
                HashField::optional(NOTES),
            ]))
    }

    fn med(label: &str, drug: &str) -> Graph {
        [Triple::new(Term::blank(label), Iri::new(DRUG), Term::iri(drug))]
            .into_iter()
            .collect()
    }

    fn ctx(id: &str) -> Context {
        Context::root(Iri::new(id))
    }

    #[test]
    fn digest_is_sha224_hex() {
        let h = digest("");
        assert_eq!(h.len(), 56);
        assert_eq!(
            h,
            "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f"
        );
    }

    #[test]
    fn key_distinguishes_field_boundaries() {
        let a = identity_key("r", &[Some("ab".into()), Some("c".into())]);
        let b = identity_key("r", &[Some("a".into()), Some("bc".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn key_distinguishes_absent_from_marker_value() {
        let absent = identity_key("r", &[None]);
        let dash = identity_key("r", &[Some(HASH_ABSENT_MARKER.into())]);
        assert_ne!(absent, dash);
    }

    #[test]
    fn same_fields_same_hash_regardless_of_label() {
        let ty = med_type();
        let h1 = identifying_hash(&ty, &med("x", "urn:rx/1"), &BlankId::new("x"), &ctx("urn:r"))
            .expect("hash");
        let h2 = identifying_hash(&ty, &med("y", "urn:rx/1"), &BlankId::new("y"), &ctx("urn:r"))
            .expect("hash");
        assert_eq!(h1, h2);
    }

    #[test]
    fn context_changes_hash() {
        let ty = med_type();
        let graph = med("x", "urn:rx/1");
        let node = BlankId::new("x");
        let h1 = identifying_hash(&ty, &graph, &node, &ctx("urn:r1")).expect("hash");
        let h2 = identifying_hash(&ty, &graph, &node, &ctx("urn:r2")).expect("hash");
        assert_ne!(h1, h2);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let ty = med_type();
        let graph: Graph = [Triple::new(
            Term::blank("x"),
            Iri::new(NOTES),
            Term::literal("n"),
        )]
        .into_iter()
        .collect();
        let result = identifying_hash(&ty, &graph, &BlankId::new("x"), &ctx("urn:r"));
        assert!(matches!(result, Err(ClinigraphError::MalformedEntity { .. })));
    }

    #[test]
    fn multiple_values_use_smallest() {
        let ty = med_type();
        let mut g1 = med("x", "urn:rx/1");
        g1.add(Triple::new(Term::blank("x"), Iri::new(NOTES), Term::literal("b")));
        g1.add(Triple::new(Term::blank("x"), Iri::new(NOTES), Term::literal("a")));
        let mut g2 = med("x", "urn:rx/1");
        g2.add(Triple::new(Term::blank("x"), Iri::new(NOTES), Term::literal("a")));

        let node = BlankId::new("x");
        assert_eq!(
            identifying_hash(&ty, &g1, &node, &ctx("urn:r")).expect("hash"),
            identifying_hash(&ty, &g2, &node, &ctx("urn:r")).expect("hash"),
        );
    }

    #[test]
    fn term_kind_and_datatype_change_hash() {
        let ty = med_type();
        let node = BlankId::new("x");
        let with_drug = |drug: Term| -> String {
            let graph: Graph = [Triple::new(Term::blank("x"), Iri::new(DRUG), drug)]
                .into_iter()
                .collect();
            identifying_hash(&ty, &graph, &node, &ctx("urn:r")).expect("hash")
        };

        let as_iri = with_drug(Term::iri("urn:rx/1"));
        let as_plain = with_drug(Term::literal("urn:rx/1"));
        let as_string = with_drug(Term::Literal(Literal::typed(
            "urn:rx/1",
            Iri::new("http://www.w3.org/2001/XMLSchema#string"),
        )));
        let as_english = with_drug(Term::Literal(Literal {
            language: Some("en".into()),
            ..Literal::plain("urn:rx/1")
        }));

        assert_ne!(as_iri, as_plain);
        assert_ne!(as_plain, as_string);
        assert_ne!(as_plain, as_english);
        assert_ne!(as_string, as_english);
        assert_eq!(as_plain, with_drug(Term::literal("urn:rx/1")));
    }

    #[test]
    fn custom_rule_is_used() {
        fn constant(_: &Graph, _: &BlankId) -> Result<Vec<Option<String>>, ClinigraphError> {
            Ok(vec![Some("fixed".into())])
        }
        let ty = SemanticType::new("urn:T", "/t/{id}")
            .expect("type")
            .hashed_by(HashRule::Custom(constant));
        let h = identifying_hash(&ty, &Graph::new(), &BlankId::new("x"), &ctx("urn:r"))
            .expect("hash");
        assert_eq!(h, digest(&identity_key("urn:r", &[Some("fixed".into())])));
    }

    #[test]
    fn type_without_rule_is_configuration_error() {
        let ty = SemanticType::new("urn:T", "/t/{id}").expect("type");
        let result = identifying_hash(&ty, &Graph::new(), &BlankId::new("x"), &ctx("urn:r"));
        assert!(matches!(result, Err(ClinigraphError::InvalidConfiguration(_))));
    }
}
