//! # URI Minter
//!
//! Canonical resource identifiers from path templates.
//!
//! `mint` substitutes bound placeholders and fills at most one remaining
//! placeholder with a fresh UUID v4. These identifiers are random by design;
//! the hash-derived identifiers of the resolver are the deterministic path.

use crate::primitives::RECORD_ID_VAR;
use crate::registry::{PathTemplate, Segment, TypeRegistry};
use crate::{ClinigraphError, Iri, VariableBindings};

/// Mints identifiers under a deployment base address.
#[derive(Debug, Clone)]
pub struct UriMinter<'r> {
    registry: &'r TypeRegistry,
    base_url: String,
}

impl<'r> UriMinter<'r> {
    /// `base_url` is the deployment prefix, e.g. `http://localhost:7000`.
    /// A trailing `/` is dropped.
    #[must_use]
    pub fn new(registry: &'r TypeRegistry, base_url: &str) -> Self {
        Self {
            registry,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// Instantiate the template of `type_iri`.
    ///
    /// Empty bindings count as unbound. One unbound placeholder is filled
    /// with a fresh token (every occurrence gets the same one); more than one
    /// is `UnresolvablePath`.
    pub fn mint(&self, type_iri: &Iri, bindings: &VariableBindings) -> Result<Iri, ClinigraphError> {
        let ty = self.registry.lookup(type_iri)?;

        let unbound: Vec<String> = ty
            .path
            .placeholders()
            .into_iter()
            .filter(|name| bindings.bound(name).is_none())
            .map(str::to_string)
            .collect();

        if unbound.len() > 1 {
            return Err(ClinigraphError::UnresolvablePath {
                template: ty.path.as_str().to_string(),
                unbound,
            });
        }

        let token = unbound
            .first()
            .map(|_| uuid::Uuid::new_v4().to_string());

        let mut out = self.base_url.clone();
        for segment in ty.path.segments() {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match bindings.bound(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(token.as_deref().unwrap_or_default()),
                },
            }
        }

        tracing::debug!(
            type_iri = %type_iri,
            iri = %out,
            generated = token.is_some(),
            "minted identifier"
        );
        Ok(Iri::new(out))
    }

    /// Canonical identifier of the record `record_id`. Never random.
    pub fn record_iri(&self, record_id: &str) -> Result<Iri, ClinigraphError> {
        let record_type = self.registry.record_type();
        let template = &self.registry.lookup(record_type)?.path;
        let bindings = VariableBindings::new().with(RECORD_ID_VAR, record_id);

        let unbound: Vec<String> = template
            .placeholders()
            .into_iter()
            .filter(|name| bindings.bound(name).is_none())
            .map(str::to_string)
            .collect();
        if !unbound.is_empty() {
            return Err(ClinigraphError::UnresolvablePath {
                template: template.as_str().to_string(),
                unbound,
            });
        }
        self.mint(record_type, &bindings)
    }

    /// Extract placeholder values from a request path for `type_iri`.
    ///
    /// The request may be given with or without the base address. Segments
    /// are matched one to one: literals must be equal, every placeholder but
    /// the last needs a non-empty segment, the last may be empty or absent.
    /// Empty matches are left out of the result.
    ///
    /// A placeholder in the template's final segment names the entity's own
    /// identifier and is never bound, so statements posted to an entity's
    /// address still get fresh identifiers of their own.
    pub fn path_var_bindings(
        &self,
        type_iri: &Iri,
        request_path: &str,
    ) -> Result<VariableBindings, ClinigraphError> {
        let template = &self.registry.lookup(type_iri)?.path;
        self.match_template(template, request_path, false)
    }

    /// The record id of a canonical record identifier.
    pub fn record_id(&self, record: &Iri) -> Result<String, ClinigraphError> {
        let template = &self.registry.lookup(self.registry.record_type())?.path;
        self.match_template(template, record.as_str(), true)?
            .bound(RECORD_ID_VAR)
            .map(str::to_string)
            .ok_or_else(|| ClinigraphError::UnresolvablePath {
                template: template.as_str().to_string(),
                unbound: vec![RECORD_ID_VAR.to_string()],
            })
    }

    fn match_template(
        &self,
        template: &PathTemplate,
        request_path: &str,
        bind_final: bool,
    ) -> Result<VariableBindings, ClinigraphError> {
        let segments = template.segments();
        let mismatch = |unbound: Vec<String>| ClinigraphError::UnresolvablePath {
            template: template.as_str().to_string(),
            unbound,
        };

        let path = request_path
            .strip_prefix(self.base_url.as_str())
            .unwrap_or(request_path);
        let path = path.strip_prefix('/').ok_or_else(|| mismatch(Vec::new()))?;
        let mut request: Vec<&str> = path.split('/').collect();
        while request.len() > segments.len() && request.last() == Some(&"") {
            request.pop();
        }
        if request.len() > segments.len() {
            return Err(mismatch(Vec::new()));
        }

        let last_placeholder = segments
            .iter()
            .rposition(|s| matches!(s, Segment::Placeholder(_)));
        let own_id = segments.len().checked_sub(1).filter(|_| !bind_final);

        let mut bindings = VariableBindings::new();
        for (i, segment) in segments.iter().enumerate() {
            let value = request.get(i).copied().unwrap_or_default();
            match segment {
                Segment::Literal(text) => {
                    if value != text {
                        return Err(mismatch(Vec::new()));
                    }
                }
                Segment::Placeholder(name) => {
                    if value.is_empty() {
                        if Some(i) != last_placeholder {
                            return Err(mismatch(vec![name.clone()]));
                        }
                    } else if Some(i) != own_id {
                        bindings.insert(name.clone(), value);
                    }
                }
            }
        }

        Ok(bindings)
    }
}

// =============================================================================
// TESTS
// =============================================================================
