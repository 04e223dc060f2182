//! # Settings
//!
//! Application settings from `clinigraph.toml`.
//!
//! Precedence, lowest first: built-in defaults, the settings file, the
//! `CLINIGRAPH_BASE_URL` environment variable, command-line flags.
//!
//! ```toml
//! base_url = "http://localhost:7000"
//! database = "clinigraph.redb"
//! ontology = "ontology.toml"
//! ```

use clinigraph_core::{ClinigraphError, TypeRegistry};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings file read when no `--config` is given. Optional.
pub const DEFAULT_SETTINGS_FILE: &str = "clinigraph.toml";

/// Environment variable overriding `base_url`.
pub const BASE_URL_ENV: &str = "CLINIGRAPH_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:7000";
const DEFAULT_DATABASE: &str = "clinigraph.redb";

/// Resolved application settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Base address every minted identifier starts with.
    pub base_url: String,
    /// Path of the redb database.
    pub database: PathBuf,
    /// Ontology TOML; the built-in ontology when absent.
    pub ontology: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            ontology: None,
        }
    }
}

/// Values given on the command line. `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub database: Option<PathBuf>,
    pub ontology: Option<PathBuf>,
}

impl Settings {
    /// Parse a settings document.
    pub fn from_toml_str(source: &str) -> Result<Self, ClinigraphError> {
        let settings: Self = toml::from_str(source)
            .map_err(|e| ClinigraphError::InvalidConfiguration(format!("settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `config`, or from `clinigraph.toml` if present.
    ///
    /// An explicit path must exist; the default file may be missing.
    pub fn load(config: Option<&Path>) -> Result<Self, ClinigraphError> {
        let path = match config {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if !default.exists() {
                    tracing::debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let source = std::fs::read_to_string(&path).map_err(|e| {
            ClinigraphError::IoError(format!("Cannot read settings '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Self::from_toml_str(&source)
    }

    /// Apply `CLINIGRAPH_BASE_URL` if it is set and non-empty.
    #[must_use]
    pub fn with_env(self) -> Self {
        let base_url = std::env::var(BASE_URL_ENV).ok();
        self.with_base_url(base_url)
    }

    /// Replace `base_url` with a non-empty override.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = url;
        }
        self
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self, ClinigraphError> {
        self = self.with_base_url(overrides.base_url);
        if let Some(database) = overrides.database {
            self.database = database;
        }
        if let Some(ontology) = overrides.ontology {
            self.ontology = Some(ontology);
        }
        self.validate()?;
        Ok(self)
    }

    /// The configured ontology, or the built-in one.
    pub fn registry(&self) -> Result<TypeRegistry, ClinigraphError> {
        match &self.ontology {
            Some(path) => TypeRegistry::from_file(path),
            None => TypeRegistry::builtin(),
        }
    }

    fn validate(&self) -> Result<(), ClinigraphError> {
        let url = self.base_url.trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClinigraphError::InvalidConfiguration(format!(
                "base_url must be an http(s) address, got '{}'",
                self.base_url
            )));
        }
        if url.chars().any(char::is_whitespace) {
            return Err(ClinigraphError::InvalidConfiguration(
                "base_url must not contain whitespace".to_string(),
            ));
        }
        if self.database.as_os_str().is_empty() {
            return Err(ClinigraphError::InvalidConfiguration(
                "database path is empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
