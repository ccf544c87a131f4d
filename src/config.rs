//! Run configuration.
//!
//! Everything has a default matching the production EPFL deployment, so an
//! empty (or absent) TOML file yields a usable configuration.

use crate::error::{ImportError, Result};
use crate::mappings::DoctypeMapping;
use crate::model::Source;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// DSpace-CRIS REST API of Infoscience
pub const DEFAULT_DSPACE_API_BASE: &str = "https://infoscience.epfl.ch/server/api";

/// EPFL directory API
pub const DEFAULT_EPFL_API_BASE: &str = "https://api.epfl.ch/v1";

/// Unpaywall REST API
pub const DEFAULT_UNPAYWALL_API_BASE: &str = "https://api.unpaywall.org/v2";

fn default_source_order() -> Vec<Source> {
    vec![
        Source::Scopus,
        Source::Wos,
        Source::Openalex,
        Source::OpenalexCrossref,
        Source::Crossref,
        Source::Zenodo,
        Source::Datacite,
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Top-level configuration for one import run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source_preference: SourcePreference,
    pub affiliation: AffiliationConfig,
    pub directory: DirectoryConfig,
    pub catalog: CatalogConfig,
    pub open_access: OpenAccessConfig,
    pub mappings: MappingsConfig,
}

/// Per-field source ranking used when merging contributions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePreference {
    pub title: Vec<Source>,
    pub pubyear: Vec<Source>,
    pub doctype: Vec<Source>,
    pub authors: Vec<Source>,
}

impl Default for SourcePreference {
    fn default() -> Self {
        Self {
            title: default_source_order(),
            pubyear: default_source_order(),
            doctype: default_source_order(),
            authors: default_source_order(),
        }
    }
}

/// Sort rank of `source` in a preference list. Unlisted sources sort last.
pub fn preference_rank(order: &[Source], source: Source) -> usize {
    order
        .iter()
        .position(|s| *s == source)
        .unwrap_or(order.len())
}

/// What counts as an EPFL affiliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffiliationConfig {
    /// Regexes matched against lowercased, diacritic-free affiliation strings
    pub patterns: Vec<String>,
    /// Source institution ids (Scopus AF-IDs, ROR ids)
    pub institution_ids: Vec<String>,
    /// Source author ids or ORCIDs known to be EPFL staff
    pub known_author_ids: Vec<String>,
}

impl Default for AffiliationConfig {
    fn default() -> Self {
        Self {
            patterns: strings(&[
                r"\bepfl\b",
                r"ecole polytechnique federale de lausanne",
                r"swiss federal institute of technology in lausanne",
                r"polytechnique f.d.rale de lausanne",
                r"02s376052",
            ]),
            institution_ids: strings(&[
                "60028186", "60210159", "60070536", "60204330", "60070531", "60070534",
                "60070538", "60014951", "60070529", "60070532", "60070535", "60122563",
                "60210160", "60204331", "02s376052",
            ]),
            known_author_ids: Vec::new(),
        }
    }
}

impl AffiliationConfig {
    /// Compile the affiliation patterns, failing on the first invalid one
    pub fn compiled_patterns(&self) -> Result<Vec<Regex>> {
        self.patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| ImportError::Config(format!("Invalid affiliation pattern '{}': {}", p, e)))
            })
            .collect()
    }
}

/// Person directory access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    /// Unit types that qualify as a laboratory, compared case-insensitively
    pub laboratory_unit_types: Vec<String>,
    /// Maximum concurrent directory lookups
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EPFL_API_BASE.to_string(),
            laboratory_unit_types: strings(&["Laboratoire", "Laboratory", "Groupe", "Chaire"]),
            concurrency: 5,
            timeout_secs: 30,
        }
    }
}

/// Existing-catalog lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    /// Discovery configuration used for searches
    pub search_configuration: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DSPACE_API_BASE.to_string(),
            search_configuration: "researchoutputs".to_string(),
            concurrency: 5,
            timeout_secs: 30,
        }
    }
}

/// OA-metadata service and the full-text gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAccessConfig {
    pub base_url: String,
    /// Contact address sent with every request
    pub email: String,
    pub allowed_oa_statuses: Vec<String>,
    pub allowed_licenses: Vec<String>,
    pub published_version: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for OpenAccessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UNPAYWALL_API_BASE.to_string(),
            email: "infoscience@epfl.ch".to_string(),
            allowed_oa_statuses: strings(&["gold", "hybrid", "green"]),
            allowed_licenses: strings(&["cc-by", "public-domain"]),
            published_version: "publishedVersion".to_string(),
            concurrency: 5,
            timeout_secs: 30,
        }
    }
}

/// Additions to the built-in doctype table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingsConfig {
    /// source code → native doctype → collection name
    pub doctypes: HashMap<String, HashMap<String, String>>,
    /// collection name → collection UUID
    pub collections: HashMap<String, String>,
}

impl PipelineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("directory.concurrency", self.directory.concurrency),
            ("catalog.concurrency", self.catalog.concurrency),
            ("open_access.concurrency", self.open_access.concurrency),
        ] {
            if value == 0 {
                return Err(ImportError::Config(format!("{} must be at least 1", name)));
            }
        }
        self.affiliation.compiled_patterns()?;
        self.doctype_mapping()?;
        Ok(())
    }

    /// Built-in doctype table extended with the configured entries
    pub fn doctype_mapping(&self) -> Result<DoctypeMapping> {
        let mut mapping = DoctypeMapping::default();
        for (name, id) in &self.mappings.collections {
            mapping.add_collection(name, id);
        }
        for (code, table) in &self.mappings.doctypes {
            let source: Source = code
                .parse()
                .map_err(|e| ImportError::Config(format!("[mappings.doctypes]: {}", e)))?;
            for (doctype, collection) in table {
                mapping.add_doctype(source, doctype, collection);
            }
        }
        Ok(mapping)
    }
}
