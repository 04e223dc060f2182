//! # Submission Scenario Tests (T0-T4)
//!
//! End-to-end behaviour of resolution and normalization over the public API.
//!
//! ## Tiers
//! - T0: Hash-based identity (create, reuse, malformed)
//! - T1: Scoping of child types
//! - T2: External references (mint, reuse, ambiguity)
//! - T3: Durable store round trips
//! - T4: Concurrent writers on one store

use clinigraph_core::primitives::{
    RDF_TYPE, SP_BELONGS_TO, SP_EXTERNAL_ID_FOR, SP_HAS_STATEMENT, SP_MEDICAL_RECORD,
};
use clinigraph_core::{
    ClinigraphError, Context, EntityDirectory, ExternalLookup, ExternalReferenceDirectory, Graph,
    IdentityResolver, Iri, MemoryStore, Pipeline, Term, Triple, TypeRegistry, VariableBindings,
    digest, identity_key,
};

const BASE: &str = "http://localhost:7000";
const MED: &str = "http://smartplatforms.org/med#medication";
const FULFILLMENT: &str = "http://smartplatforms.org/med#fulfillment";
const PROBLEM: &str = "http://smartplatforms.org/terms#Problem";
const DRUG: &str = "http://smartplatforms.org/med#drug";
const DATE: &str = "http://purl.org/dc/elements/1.1/date";
const HAS_FULFILLMENT: &str = "http://smartplatforms.org/terms#fulfillment";

fn registry() -> TypeRegistry {
    TypeRegistry::builtin().expect("builtin registry")
}

fn record_iri(id: &str) -> Iri {
    Iri::new(format!("{}/records/{}", BASE, id))
}

fn triple(s: Term, p: &str, o: Term) -> Triple {
    Triple::new(s, Iri::new(p), o)
}

fn medication_graph(label: &str, drug: &str) -> Graph {
    [
        triple(Term::blank(label), RDF_TYPE, Term::iri(MED)),
        triple(Term::blank(label), DRUG, Term::literal(drug)),
    ]
    .into_iter()
    .collect()
}

// =============================================================================
// TIER T0: HASH-BASED IDENTITY
// =============================================================================

mod t0_identity {
    use super::*;

    /// T0.1: a new medication gets `{type}/{hash}` and one directory record.
    #[test]
    fn new_medication_is_created() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        let r1 = record_iri("R1");

        let mut graph = medication_graph("m", "D1");
        resolver
            .resolve(&Iri::new(MED), &Context::root(r1.clone()), &mut graph)
            .expect("resolve");

        let hash = digest(&identity_key(
            r1.as_str(),
            &[Term::literal("D1").identity_text(), None, None, None],
        ));
        let expected = Term::iri(format!("{}/{}", MED, hash));

        assert_eq!(store.record_count().expect("count"), 1);
        assert_eq!(store.find_by_hash(&hash).expect("find"), expected.as_iri().cloned());
        assert!(graph.contains(&triple(expected, RDF_TYPE, Term::iri(MED))));
        assert!(graph.anonymous_nodes().is_empty());
    }

    /// T0.2: the same content again creates nothing and yields the same identifier.
    #[test]
    fn resubmission_reuses_identifier() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        let context = Context::root(record_iri("R1"));

        let mut first = medication_graph("m", "D1");
        resolver
            .resolve(&Iri::new(MED), &context, &mut first)
            .expect("first");

        let mut second = medication_graph("other-label", "D1");
        let resolution = resolver
            .resolve(&Iri::new(MED), &context, &mut second)
            .expect("second");

        assert!(resolution.created.is_empty());
        assert_eq!(resolution.reused.len(), 1);
        assert_eq!(store.record_count().expect("count"), 1);
        assert_eq!(first, second);
    }

    /// T0.3: a fulfillment without a date is malformed; nothing changes.
    #[test]
    fn fulfillment_without_date_is_malformed() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        let parent = Iri::new(format!("{}/records/R1/medications/m1", BASE));

        let mut graph: Graph = [
            triple(Term::blank("f"), RDF_TYPE, Term::iri(FULFILLMENT)),
            triple(Term::Iri(parent.clone()), HAS_FULFILLMENT, Term::blank("f")),
        ]
        .into_iter()
        .collect();
        let before = graph.clone();

        let result = resolver.resolve(
            &Iri::new(FULFILLMENT),
            &Context::child_of(parent),
            &mut graph,
        );

        assert!(matches!(result, Err(ClinigraphError::MalformedEntity { .. })));
        assert_eq!(store.record_count().expect("count"), 0);
        assert_eq!(graph, before);
    }

    /// T0.4: an unreachable directory rejects the submission.
    #[test]
    fn unreachable_directory_rejects() {
        let registry = registry();
        let store = MemoryStore::new();
        store.set_offline(true);
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = medication_graph("m", "D1");
        let result = resolver.resolve(&Iri::new(MED), &Context::root(record_iri("R1")), &mut graph);

        let err = result.expect_err("must fail");
        assert!(err.is_retryable());
        assert_eq!(graph, medication_graph("m", "D1"));
    }
}

// =============================================================================
// TIER T1: SCOPING
// =============================================================================

mod t1_scoping {
    use super::*;

    fn fulfillment_under(parent: &Iri, label: &str, date: &str) -> Graph {
        [
            triple(Term::blank(label), RDF_TYPE, Term::iri(FULFILLMENT)),
            triple(Term::blank(label), DATE, Term::literal(date)),
            triple(Term::Iri(parent.clone()), HAS_FULFILLMENT, Term::blank(label)),
        ]
        .into_iter()
        .collect()
    }

    /// T1.1: the same date under two parents gives two identities.
    #[test]
    fn same_fields_different_parent() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        let a = Iri::new("http://localhost:7000/records/R1/medications/a");
        let b = Iri::new("http://localhost:7000/records/R1/medications/b");

        let mut graph_a = fulfillment_under(&a, "f", "2010-05-12");
        let mut graph_b = fulfillment_under(&b, "f", "2010-05-12");

        let ra = resolver
            .resolve(&Iri::new(FULFILLMENT), &Context::child_of(a), &mut graph_a)
            .expect("a");
        let rb = resolver
            .resolve(&Iri::new(FULFILLMENT), &Context::child_of(b), &mut graph_b)
            .expect("b");

        assert_ne!(ra.created, rb.created);
        assert_eq!(store.record_count().expect("count"), 2);
    }

    /// T1.2: resolving under A leaves nodes linked only from B untouched.
    #[test]
    fn other_parent_is_not_mutated() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        let a = Iri::new("http://localhost:7000/records/R1/medications/a");
        let b = Iri::new("http://localhost:7000/records/R1/medications/b");

        let mut graph = fulfillment_under(&a, "fa", "2010-05-12");
        graph.extend(fulfillment_under(&b, "fb", "2010-05-12").triples());

        resolver
            .resolve(&Iri::new(FULFILLMENT), &Context::child_of(a), &mut graph)
            .expect("resolve");

        let remaining = graph.anonymous_nodes();
        assert_eq!(remaining.len(), 1);
        assert!(graph.is_linked(&Term::Iri(b), &Term::blank("fb")));
    }

    /// T1.3: a full medication tree resolves fulfillments under the new identifier.
    #[test]
    fn tree_resolution_descends() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);

        let mut graph = medication_graph("m", "D1");
        graph.add(triple(Term::blank("m"), HAS_FULFILLMENT, Term::blank("f")));
        graph.add(triple(Term::blank("f"), RDF_TYPE, Term::iri(FULFILLMENT)));
        graph.add(triple(Term::blank("f"), DATE, Term::literal("2010-05-12")));

        let resolution = resolver
            .resolve(&Iri::new(MED), &Context::root(record_iri("R1")), &mut graph)
            .expect("resolve");

        assert_eq!(resolution.resolved.len(), 2);
        assert!(graph.anonymous_nodes().is_empty());
    }
}

// =============================================================================
// TIER T2: EXTERNAL REFERENCES
// =============================================================================

mod t2_external_references {
    use super::*;

    fn problem_ref(reference: &str) -> Graph {
        [triple(Term::iri(reference), RDF_TYPE, Term::iri(PROBLEM))]
            .into_iter()
            .collect()
    }

    /// T2.1: a new external reference is minted, recorded and attached.
    #[test]
    fn new_reference_is_minted_and_attached() {
        let registry = registry();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&registry, BASE, &store);
        let r2 = record_iri("R2");
        let bindings = VariableBindings::new().with("record_id", "R2");
        let reference = Iri::new("urn:smart_external_id:problem-17");

        let out = pipeline
            .normalize_submission(&problem_ref(reference.as_str()), &r2, &bindings)
            .expect("normalize");

        let id = out.remapped[&Term::Iri(reference.clone())].clone();
        assert!(id
            .as_str()
            .starts_with("http://localhost:7000/records/R2/problems/"));

        let g = &out.graph;
        let id_t = Term::Iri(id.clone());
        let r2_t = Term::Iri(r2.clone());
        assert!(g.contains(&triple(Term::Iri(reference.clone()), SP_EXTERNAL_ID_FOR, id_t.clone())));
        assert!(g.contains(&triple(id_t.clone(), SP_BELONGS_TO, r2_t.clone())));
        assert!(g.contains(&triple(r2_t.clone(), SP_HAS_STATEMENT, id_t)));
        assert!(g.contains(&triple(r2_t, RDF_TYPE, Term::iri(SP_MEDICAL_RECORD))));
        assert_eq!(
            store.find_by_external_ref(&reference).expect("find"),
            ExternalLookup::Found(id)
        );
    }

    /// T2.2: a later submission reuses the identifier verbatim.
    #[test]
    fn reference_is_reused() {
        let registry = registry();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&registry, BASE, &store);
        let r2 = record_iri("R2");
        let bindings = VariableBindings::new().with("record_id", "R2");
        let reference = "urn:smart_external_id:problem-17";

        let first = pipeline
            .normalize_submission(&problem_ref(reference), &r2, &bindings)
            .expect("first");
        let second = pipeline
            .normalize_submission(&problem_ref(reference), &r2, &bindings)
            .expect("second");

        let key = Term::iri(reference);
        assert_eq!(first.remapped[&key], second.remapped[&key]);
        assert_eq!(first.new_references.len(), 1);
        assert!(second.new_references.is_empty());
    }

    /// T2.3: a reference already mapped twice is an integrity error.
    #[test]
    fn ambiguous_reference_rejected() {
        let registry = registry();
        let store = MemoryStore::new();
        let reference = Iri::new("urn:smart_external_id:dup");
        store
            .import_external_mapping(&reference, &Iri::new("http://localhost:7000/x/1"))
            .expect("import");
        store
            .import_external_mapping(&reference, &Iri::new("http://localhost:7000/x/2"))
            .expect("import");
        let pipeline = Pipeline::new(&registry, BASE, &store);

        let result = pipeline.normalize_submission(
            &problem_ref(reference.as_str()),
            &record_iri("R2"),
            &VariableBindings::new().with("record_id", "R2"),
        );
        assert!(matches!(
            result,
            Err(ClinigraphError::AmbiguousExternalReference { .. })
        ));
    }
}

// =============================================================================
// TIER T3: DURABLE STORE
// =============================================================================

mod t3_durable_store {
    use super::*;
    use clinigraph_core::{RedbStore, TripleStore};
    use tempfile::tempdir;

    /// T3.1: identities survive a reopen and are reused.
    #[test]
    fn identity_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("clinigraph.redb");
        let registry = registry();
        let context = Context::root(record_iri("R1"));

        let first = {
            let store = RedbStore::open(&db_path).expect("open");
            let pipeline = Pipeline::new(&registry, BASE, &store);
            pipeline
                .submit_entity_tree(&Iri::new(MED), &context, &medication_graph("m", "D1"))
                .expect("submit")
        };

        let store = RedbStore::open(&db_path).expect("reopen");
        let pipeline = Pipeline::new(&registry, BASE, &store);
        let second = pipeline
            .submit_entity_tree(&Iri::new(MED), &context, &medication_graph("n", "D1"))
            .expect("submit");

        assert_eq!(first.resolution.created, second.resolution.reused);
        assert_eq!(second.stored, 0);
        assert_eq!(store.record_count().expect("count"), 1);
        assert_eq!(store.triple_count().expect("count"), 2);
    }

    /// T3.2: external references survive a reopen.
    #[test]
    fn external_reference_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("clinigraph.redb");
        let registry = registry();
        let r2 = record_iri("R2");
        let bindings = VariableBindings::new().with("record_id", "R2");
        let graph: Graph = [triple(
            Term::iri("urn:smart_external_id:p"),
            RDF_TYPE,
            Term::iri(PROBLEM),
        )]
        .into_iter()
        .collect();

        let first = {
            let store = RedbStore::open(&db_path).expect("open");
            Pipeline::new(&registry, BASE, &store)
                .submit_statements(&graph, &r2, &bindings)
                .expect("submit")
        };

        let store = RedbStore::open(&db_path).expect("reopen");
        let second = Pipeline::new(&registry, BASE, &store)
            .submit_statements(&graph, &r2, &bindings)
            .expect("submit");

        assert_eq!(first.rewritten.remapped, second.rewritten.remapped);
        assert_eq!(second.stored, 0);
    }
}

// =============================================================================
// TIER T4: CONCURRENT WRITERS
// =============================================================================

mod t4_concurrency {
    use super::*;
    use clinigraph_core::{RedbStore, TriplePattern, TripleStore};
    use std::thread;
    use tempfile::tempdir;

    fn race_identity<D: EntityDirectory>(store: &D) {
        let a = Iri::new(format!("{}/a", MED));
        let b = Iri::new(format!("{}/b", MED));

        let (left, right) = thread::scope(|s| {
            let left = s.spawn(|| store.create_if_absent("h-race", &a));
            let right = s.spawn(|| store.create_if_absent("h-race", &b));
            (
                left.join().expect("join").expect("create"),
                right.join().expect("join").expect("create"),
            )
        });

        assert_eq!(left, right);
        assert!(left == a || left == b);
        assert_eq!(store.find_by_hash("h-race").expect("find"), Some(left));
        assert_eq!(store.record_count().expect("count"), 1);
    }

    fn race_reference<X: ExternalReferenceDirectory>(store: &X) {
        let reference = Iri::new("urn:smart_external_id:race");
        let a = record_iri("R2");
        let b = record_iri("R3");

        let (left, right) = thread::scope(|s| {
            let left = s.spawn(|| store.record_all(&[(reference.clone(), a.clone())]));
            let right = s.spawn(|| store.record_all(&[(reference.clone(), b.clone())]));
            (
                left.join().expect("join").expect("record"),
                right.join().expect("join").expect("record"),
            )
        });

        assert_eq!(left, right);
        assert_eq!(left.len(), 1);
        assert_eq!(
            store.find_by_external_ref(&reference).expect("find"),
            ExternalLookup::Found(left[0].clone())
        );
    }

    /// T4.1: two writers racing on one hash converge in memory.
    #[test]
    fn identity_race_in_memory() {
        race_identity(&MemoryStore::new());
    }

    /// T4.2: two writers racing on one hash converge on disk.
    #[test]
    fn identity_race_on_disk() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("clinigraph.redb")).expect("open");
        race_identity(&store);
    }

    /// T4.3: two writers racing on one external reference converge.
    #[test]
    fn reference_race() {
        race_reference(&MemoryStore::new());

        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("clinigraph.redb")).expect("open");
        race_reference(&store);
    }

    /// T4.4: concurrent submissions of the same external reference store one
    /// identifier and one mapping.
    #[test]
    fn concurrent_submissions_share_identifier() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("clinigraph.redb")).expect("open");
        let registry = registry();
        let r2 = record_iri("R2");
        let bindings = VariableBindings::new().with("record_id", "R2");
        let reference = Term::iri("urn:smart_external_id:shared");
        let graph: Graph = [triple(reference.clone(), RDF_TYPE, Term::iri(PROBLEM))]
            .into_iter()
            .collect();

        let submit = || {
            Pipeline::new(&registry, BASE, &store)
                .submit_statements(&graph, &r2, &bindings)
                .expect("submit")
        };
        let (left, right) = thread::scope(|s| {
            let left = s.spawn(submit);
            let right = s.spawn(submit);
            (left.join().expect("join"), right.join().expect("join"))
        });

        let id = left.rewritten.remapped[&reference].clone();
        assert_eq!(right.rewritten.remapped[&reference], id);
        assert_eq!(
            left.rewritten.new_references.len() + right.rewritten.new_references.len(),
            1
        );
        assert_eq!(
            store
                .find_by_external_ref(&Iri::new("urn:smart_external_id:shared"))
                .expect("find"),
            ExternalLookup::Found(id.clone())
        );
        let stored = store
            .matching(&TriplePattern::any().predicate(Iri::new(RDF_TYPE)))
            .expect("match");
        assert!(stored.contains(&triple(Term::Iri(id), RDF_TYPE, Term::iri(PROBLEM))));
        assert_eq!(
            stored
                .iter()
                .filter(|t| t.object == Term::iri(PROBLEM))
                .count(),
            1
        );
    }
}
