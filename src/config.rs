use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::validation::ValidatorShape;

/// Analysis settings, read from `classdoc.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) scope: ScopeConfig,
    pub(crate) markers: MarkerConfig,
    pub(crate) walker: WalkerConfig,
    pub(crate) document: DocumentConfig,
}

/// Package prefixes selecting the three class subsets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ScopeConfig {
    /// Packages whose classes are scanned for request mappings.
    pub(crate) controller_packages: Vec<String>,
    /// Packages whose classes may appear as request or response bodies.
    pub(crate) type_packages: Vec<String>,
    /// Packages whose method bodies the call-graph walker may enter.
    pub(crate) traversal_packages: Vec<String>,
}

/// Internal names of the marker types the analysis keys off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct MarkerConfig {
    /// Base type of field validators; constructions of its subtypes are mined for rules.
    pub(crate) validator_base: Option<String>,
    /// Interface implemented by enums that tag polymorphic alternatives.
    pub(crate) discriminator_enum: Option<String>,
    /// Annotation excluding a field from serialization.
    pub(crate) json_ignore: String,
    /// Annotation marking interfaces whose calls are skipped without implementations.
    pub(crate) functional_interface: String,
    /// Super types of compiler-generated lambda bodies.
    pub(crate) lambda_bases: Vec<String>,
    /// Known validator types and the constructor shape each one uses.
    pub(crate) validators: BTreeMap<String, ValidatorShape>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            validator_base: None,
            discriminator_enum: None,
            json_ignore: "com/fasterxml/jackson/annotation/JsonIgnore".to_string(),
            functional_interface: "java/lang/FunctionalInterface".to_string(),
            lambda_bases: vec!["kotlin/jvm/internal/Lambda".to_string()],
            validators: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct WalkerConfig {
    pub(crate) max_call_depth: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct DocumentConfig {
    pub(crate) title: String,
    pub(crate) version: String,
    pub(crate) servers: Vec<ServerConfig>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            title: "OpenAPI Definition".to_string(),
            version: "v0".to_string(),
            servers: vec![ServerConfig {
                url: "http://localhost:8000".to_string(),
                description: "Local development server".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ServerConfig {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) description: String,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults. The result still
    /// needs [`Config::normalize`] once command line overrides are applied.
    pub(crate) fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Rewrite dotted names to internal form and derive unset package scopes.
    pub(crate) fn normalize(&mut self) {
        let scope = &mut self.scope;
        for prefixes in [
            &mut scope.controller_packages,
            &mut scope.type_packages,
            &mut scope.traversal_packages,
        ] {
            for prefix in prefixes.iter_mut() {
                *prefix = internal_name(prefix);
            }
        }
        if scope.type_packages.is_empty() {
            scope.type_packages = root_packages(&scope.controller_packages);
        }
        if scope.traversal_packages.is_empty() {
            scope.traversal_packages = root_packages(&scope.controller_packages);
        }

        let markers = &mut self.markers;
        for marker in [&mut markers.validator_base, &mut markers.discriminator_enum]
            .into_iter()
            .flatten()
        {
            *marker = internal_name(marker);
        }
        markers.json_ignore = internal_name(&markers.json_ignore);
        markers.functional_interface = internal_name(&markers.functional_interface);
        for base in markers.lambda_bases.iter_mut() {
            *base = internal_name(base);
        }
        markers.validators = std::mem::take(&mut markers.validators)
            .into_iter()
            .map(|(name, shape)| (internal_name(&name), shape))
            .collect();
    }
}

fn internal_name(name: &str) -> String {
    name.trim().trim_end_matches(['.', '/']).replace('.', "/")
}

/// First two segments of each package (`com/acme/web` -> `com/acme`), deduplicated.
fn root_packages(packages: &[String]) -> Vec<String> {
    let mut roots: Vec<String> = packages
        .iter()
        .map(|package| package.split('/').take(2).collect::<Vec<_>>().join("/"))
        .collect();
    roots.sort();
    roots.dedup();
    roots
}
