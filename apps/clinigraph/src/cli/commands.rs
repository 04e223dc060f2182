//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Graph documents are read with `--file` and written to stdout or `--output`.
//! When the graph goes to stdout the run summary is logged instead of
//! printed, so stdout stays a single JSON document.

use crate::settings::Settings;
use clinigraph_core::{
    Alert, ClinigraphError, Context, EntityDirectory, ExternalLookup, ExternalReferenceDirectory,
    Graph, HashRule, Iri, Pipeline, RedbStore, TripleStore, UriMinter, VariableBindings,
    graph_from_json, graph_to_json,
    primitives::{MAX_DOCUMENT_SIZE, RECORD_ID_VAR},
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Arguments of `resolve`.
#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub root_type: String,
    pub context: String,
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

/// Arguments of `normalize`.
#[derive(Debug, Clone)]
pub struct NormalizeArgs {
    pub record: String,
    /// `(type IRI, request path)` to extract placeholder values from.
    pub request: Option<(String, String)>,
    /// `NAME=VALUE` pairs.
    pub bind: Vec<String>,
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

// =============================================================================
// FILE HELPERS
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), ClinigraphError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ClinigraphError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(ClinigraphError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, ClinigraphError> {
    let canonical = path.canonicalize().map_err(|e| {
        ClinigraphError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(ClinigraphError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path, which must be a directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, ClinigraphError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        ClinigraphError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(ClinigraphError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| ClinigraphError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a graph document from disk.
pub fn read_graph(file: &Path) -> Result<Graph, ClinigraphError> {
    let path = validate_file_path(file)?;
    validate_file_size(&path, u64::try_from(MAX_DOCUMENT_SIZE).unwrap_or(u64::MAX))?;

    let source = std::fs::read_to_string(&path)
        .map_err(|e| ClinigraphError::IoError(format!("Read file: {}", e)))?;
    graph_from_json(&source)
}

/// Write a graph document to `output`, or to stdout.
fn write_graph(graph: &Graph, output: Option<&Path>) -> Result<(), ClinigraphError> {
    let document = graph_to_json(graph)?;
    match output {
        Some(path) => {
            let path = validate_output_path(path)?;
            std::fs::write(&path, document)
                .map_err(|e| ClinigraphError::IoError(format!("Write file: {}", e)))?;
            tracing::debug!(path = %path.display(), "graph written");
        }
        None => println!("{}", document),
    }
    Ok(())
}

/// Print `summary` as JSON, or as an aligned key/value listing.
fn print_summary(json_mode: bool, title: &str, summary: &Value) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }

    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    if let Some(fields) = summary.as_object() {
        for (key, value) in fields {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("{:<16}{}", format!("{}:", key), value);
        }
    }
}

/// Print the summary when the graph went to a file, log it otherwise.
fn report(json_mode: bool, printed_graph: bool, title: &str, summary: &Value) {
    if printed_graph {
        tracing::info!(summary = %summary, "{}", title);
    } else {
        print_summary(json_mode, title, summary);
    }
}

/// Open the configured database, which must already exist.
fn open_existing(settings: &Settings) -> Result<RedbStore, ClinigraphError> {
    if !settings.database.is_file() {
        return Err(ClinigraphError::IoError(format!(
            "Database {:?} not found. Run `clinigraph init` first.",
            settings.database
        )));
    }
    RedbStore::open(&settings.database)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(settings: &Settings, force: bool) -> Result<(), ClinigraphError> {
    let db_path = &settings.database;
    if db_path.exists() {
        if !force {
            return Err(ClinigraphError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| ClinigraphError::IoError(format!("Remove database: {}", e)))?;
        tracing::warn!(path = %db_path.display(), "existing database removed");
    }

    let _store = RedbStore::open(db_path)?;
    println!("Initialized new redb database at {:?}", db_path);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show directory and triple counts.
pub fn cmd_status(settings: &Settings, json_mode: bool) -> Result<(), ClinigraphError> {
    let store = open_existing(settings)?;
    let summary = json!({
        "database": settings.database.to_string_lossy(),
        "base_url": settings.base_url,
        "identity_records": store.record_count()?,
        "external_references": store.external_reference_count()?,
        "triples": store.triple_count()?,
    });
    print_summary(json_mode, "Clinigraph Status", &summary);
    Ok(())
}

// =============================================================================
// RESOLVE COMMAND
// =============================================================================

/// Resolve an entity tree, storing it unless `dry_run`.
pub fn cmd_resolve(
    settings: &Settings,
    json_mode: bool,
    args: &ResolveArgs,
) -> Result<(), ClinigraphError> {
    let registry = settings.registry()?;
    let graph = read_graph(&args.file)?;
    let store = RedbStore::open(&settings.database)?;
    let pipeline = Pipeline::new(&registry, &settings.base_url, &store);

    let root_type = Iri::new(args.root_type.as_str());
    let context = Context::root(Iri::new(args.context.as_str()));
    tracing::info!(root_type = %root_type, context = %context.id(), "resolving {:?}", args.file);

    let (resolved, resolution, stored, pending) = if args.dry_run {
        let staged = pipeline.preview_entity_tree(&root_type, &context, &graph)?;
        let pending = staged.pending_records();
        (staged.graph, staged.resolution, 0, pending)
    } else {
        let out = pipeline.submit_entity_tree(&root_type, &context, &graph)?;
        (out.graph, out.resolution, out.stored, 0)
    };

    write_graph(&resolved, args.output.as_deref())?;
    let summary = json!({
        "resolved": resolution.resolved.len(),
        "created": resolution.created.len(),
        "reused": resolution.reused.len(),
        "stored": stored,
        "pending_records": pending,
        "dry_run": args.dry_run,
    });
    report(json_mode, args.output.is_none(), "Resolution", &summary);
    Ok(())
}

// =============================================================================
// NORMALIZE COMMAND
// =============================================================================

/// Placeholder bindings for a normalize run.
///
/// Later sources override earlier ones: the record id read from the record
/// IRI, then the request path, then explicit pairs.
pub fn submission_bindings(
    minter: &UriMinter<'_>,
    record: &Iri,
    request: Option<(&Iri, &str)>,
    pairs: &[String],
) -> Result<VariableBindings, ClinigraphError> {
    let mut bindings = VariableBindings::new().with(RECORD_ID_VAR, minter.record_id(record)?);

    if let Some((type_iri, path)) = request {
        let extracted = minter.path_var_bindings(type_iri, path)?;
        for (name, value) in extracted.iter() {
            bindings.insert(name, value);
        }
    }

    for pair in pairs {
        let (name, value) = VariableBindings::parse_pair(pair)?;
        bindings.insert(name, value);
    }
    Ok(bindings)
}

/// Normalize statements for a record, storing them unless `dry_run`.
pub fn cmd_normalize(
    settings: &Settings,
    json_mode: bool,
    args: &NormalizeArgs,
) -> Result<(), ClinigraphError> {
    let registry = settings.registry()?;
    let graph = read_graph(&args.file)?;
    let store = RedbStore::open(&settings.database)?;
    let pipeline = Pipeline::new(&registry, &settings.base_url, &store);

    let record = Iri::new(args.record.as_str());
    let request_type = args.request.as_ref().map(|(t, _)| Iri::new(t.as_str()));
    let request = request_type
        .as_ref()
        .zip(args.request.as_ref().map(|(_, p)| p.as_str()));
    let bindings = submission_bindings(pipeline.minter(), &record, request, &args.bind)?;
    tracing::info!(record = %record, "normalizing {:?}", args.file);

    let (rewritten, stored, pending) = if args.dry_run {
        let staged = pipeline.preview_submission(&graph, &record, &bindings)?;
        let pending = staged.pending_references();
        (staged.rewritten, 0, pending)
    } else {
        let out = pipeline.submit_statements(&graph, &record, &bindings)?;
        (out.rewritten, out.stored, 0)
    };

    write_graph(&rewritten.graph, args.output.as_deref())?;
    let summary = json!({
        "remapped": rewritten.remapped.len(),
        "attached": rewritten.attached.len(),
        "new_references": rewritten.new_references.len(),
        "stored": stored,
        "pending_references": pending,
        "dry_run": args.dry_run,
    });
    report(json_mode, args.output.is_none(), "Normalization", &summary);
    Ok(())
}

// =============================================================================
// LOOKUP COMMAND
// =============================================================================

/// Look up an identity hash or an external reference.
pub fn cmd_lookup(
    settings: &Settings,
    json_mode: bool,
    hash: Option<&str>,
    external: Option<&str>,
) -> Result<(), ClinigraphError> {
    let store = open_existing(settings)?;

    let summary = match (hash, external) {
        (Some(hash), _) => {
            let identifier = store.find_by_hash(hash)?;
            let status = if identifier.is_some() { "found" } else { "absent" };
            json!({
                "hash": hash,
                "status": status,
                "identifier": identifier.map(|i| i.to_string()),
            })
        }
        (None, Some(reference)) => match store.find_by_external_ref(&Iri::new(reference))? {
            ExternalLookup::Absent => json!({ "reference": reference, "status": "absent" }),
            ExternalLookup::Found(identifier) => json!({
                "reference": reference,
                "status": "found",
                "identifier": identifier.to_string(),
            }),
            ExternalLookup::Ambiguous(candidates) => json!({
                "reference": reference,
                "status": "ambiguous",
                "candidates": candidates.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
        },
        (None, None) => {
            return Err(ClinigraphError::InvalidConfiguration(
                "lookup needs --hash or --external".to_string(),
            ));
        }
    };

    print_summary(json_mode, "Lookup", &summary);
    Ok(())
}

// =============================================================================
// ALERT COMMAND
// =============================================================================

/// Validate an alert document and print it.
pub fn cmd_alert(json_mode: bool, file: &Path) -> Result<(), ClinigraphError> {
    let alert = Alert::from_graph(&read_graph(file)?)?;
    tracing::info!(level = %alert.level, "alert accepted");

    let summary = json!({ "level": alert.level.as_str(), "notes": alert.notes });
    print_summary(json_mode, "Alert", &summary);
    Ok(())
}

// =============================================================================
// TYPES COMMAND
// =============================================================================

fn describe_hash_rule(rule: Option<&HashRule>) -> Value {
    match rule {
        None => Value::Null,
        Some(HashRule::Fields(fields)) => fields
            .iter()
            .map(|f| json!({ "predicate": f.predicate.as_str(), "required": f.required }))
            .collect(),
        Some(HashRule::Custom(_)) => json!("custom"),
    }
}

/// List the loaded ontology.
pub fn cmd_types(settings: &Settings, json_mode: bool) -> Result<(), ClinigraphError> {
    let registry = settings.registry()?;

    if json_mode {
        let types: Vec<Value> = registry
            .iter()
            .map(|ty| {
                json!({
                    "iri": ty.iri.as_str(),
                    "path": ty.path.as_str(),
                    "statement": ty.statement,
                    "record": &ty.iri == registry.record_type(),
                    "children": ty.children.iter().map(Iri::as_str).collect::<Vec<_>>(),
                    "hash_fields": describe_hash_rule(ty.hash_rule.as_ref()),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&types).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Clinigraph Ontology ({} types)", registry.len());
    println!("==========================");
    for ty in registry.iter() {
        let mut flags = Vec::new();
        if &ty.iri == registry.record_type() {
            flags.push("record");
        }
        if ty.statement {
            flags.push("statement");
        }
        if ty.is_resolvable() {
            flags.push("hashed");
        }
        println!("{}", ty.iri);
        println!("  path:  {}", ty.path.as_str());
        if !flags.is_empty() {
            println!("  kind:  {}", flags.join(", "));
        }
        for child in &ty.children {
            println!("  child: {}", child);
        }
    }
    Ok(())
}
