//! Record shapes shared by every engine.
//!
//! `SourceRecord` / `AuthorMention` are what the harvesters hand over,
//! `CanonicalPublication` is what the deduplication engine produces.

use crate::error::{ImportError, Result};
use crate::normalize::{normalize_doi, normalize_title};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known metadata sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "wos")]
    Wos,
    #[serde(rename = "scopus")]
    Scopus,
    #[serde(rename = "openalex")]
    Openalex,
    #[serde(rename = "openalex+crossref")]
    OpenalexCrossref,
    #[serde(rename = "crossref")]
    Crossref,
    #[serde(rename = "zenodo")]
    Zenodo,
    #[serde(rename = "datacite")]
    Datacite,
}

impl Source {
    pub const ALL: [Source; 7] = [
        Source::Wos,
        Source::Scopus,
        Source::Openalex,
        Source::OpenalexCrossref,
        Source::Crossref,
        Source::Zenodo,
        Source::Datacite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wos => "wos",
            Source::Scopus => "scopus",
            Source::Openalex => "openalex",
            Source::OpenalexCrossref => "openalex+crossref",
            Source::Crossref => "crossref",
            Source::Zenodo => "zenodo",
            Source::Datacite => "datacite",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        Source::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == s.trim())
            .ok_or_else(|| ImportError::Parse(format!("Unknown source code: {}", s)))
    }
}

/// Blank strings read as absent, so `Some("")` never reaches a checkpoint
fn blank_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// One author as listed on one source record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorMention {
    pub display_name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub orcid: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub internal_author_id: Option<String>,
    #[serde(default)]
    pub raw_affiliations: Vec<String>,
    /// Source-specific institution ids (e.g. Scopus AF-IDs)
    #[serde(default)]
    pub affiliation_ids: Vec<String>,
    /// Source-asserted, not authoritative
    #[serde(default)]
    pub is_epfl_flag: bool,
}

/// One publication as reported by one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: Source,
    pub internal_id: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub doi: Option<String>,
    pub title: String,
    pub doctype: String,
    pub pubyear: i32,
    #[serde(default)]
    pub authors: Vec<AuthorMention>,
}

impl SourceRecord {
    /// Check the harvester contract: required fields present and non-blank.
    ///
    /// A title that normalizes to nothing (markup or punctuation only) counts
    /// as blank.
    pub fn validate(&self) -> Result<()> {
        let missing = if self.internal_id.trim().is_empty() {
            Some("internal_id")
        } else if normalize_title(&self.title).is_empty() {
            Some("title")
        } else if self.doctype.trim().is_empty() {
            Some("doctype")
        } else if self.pubyear <= 0 {
            Some("pubyear")
        } else {
            None
        };

        match missing {
            Some(field) => Err(ImportError::MalformedSourceRecord(format!(
                "{}:{} is missing required field '{}'",
                self.source, self.internal_id, field
            ))),
            None => Ok(()),
        }
    }

    /// Lowercased, prefix-free DOI, `None` when absent or blank
    pub fn normalized_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(normalize_doi)
    }

    pub fn title_year_key(&self) -> IdentityKey {
        IdentityKey::TitleYear {
            title: normalize_title(&self.title),
            year: self.pubyear,
        }
    }
}

/// The value used to decide that two records denote the same work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Doi(String),
    TitleYear { title: String, year: i32 },
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Doi(doi) => write!(f, "doi:{}", doi),
            IdentityKey::TitleYear { title, year } => write!(f, "title_year:{}:{}", year, title),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(doi) = s.strip_prefix("doi:") {
            return Ok(IdentityKey::Doi(doi.to_string()));
        }
        if let Some(rest) = s.strip_prefix("title_year:") {
            if let Some((year, title)) = rest.split_once(':') {
                let year = year
                    .parse()
                    .map_err(|_| ImportError::Parse(format!("Invalid year in record key: {}", s)))?;
                return Ok(IdentityKey::TitleYear {
                    title: title.to_string(),
                    year,
                });
            }
        }
        Err(ImportError::Parse(format!("Invalid record key: {}", s)))
    }
}

/// Audit trail entry: one source record that fed a canonical publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: Source,
    pub internal_id: String,
    pub doctype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// An author of a canonical publication with its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAuthor {
    pub position: usize,
    pub source: Source,
    pub internal_id: String,
    pub mention: AuthorMention,
}

/// The deduplicated record for one real-world publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPublication {
    pub key: IdentityKey,
    pub doi: Option<String>,
    pub title: String,
    pub pubyear: i32,
    /// Native doctype of the contribution the collection was mapped from
    pub doctype: Option<String>,
    pub ifs3_doctype: Option<String>,
    pub ifs3_collection_id: Option<String>,
    pub authors: Vec<CanonicalAuthor>,
    pub contributions: Vec<Contribution>,
}

impl CanonicalPublication {
    pub fn record_key(&self) -> String {
        self.key.to_string()
    }

    pub fn contributed_by(&self, source: Source, internal_id: &str) -> bool {
        self.contributions
            .iter()
            .any(|c| c.source == source && c.internal_id == internal_id)
    }
}

/// Reference to an item already in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRef {
    pub id: String,
}

/// Which catalog key matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Doi,
    TitleYear,
}

impl fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedBy::Doi => f.write_str("doi"),
            MatchedBy::TitleYear => f.write_str("title_year"),
        }
    }
}

/// Why a canonical publication is excluded from the load-ready set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    Duplicate {
        matched_by: MatchedBy,
        catalog_ref: CatalogRef,
    },
    UnmappableDoctype,
}

impl RejectionReason {
    pub fn label(&self) -> String {
        match self {
            RejectionReason::Duplicate { matched_by, .. } => format!("matched_by:{}", matched_by),
            RejectionReason::UnmappableDoctype => "unmappable_doctype".to_string(),
        }
    }

    pub fn catalog_ref(&self) -> Option<&CatalogRef> {
        match self {
            RejectionReason::Duplicate { catalog_ref, .. } => Some(catalog_ref),
            RejectionReason::UnmappableDoctype => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPublication {
    pub publication: CanonicalPublication,
    pub reason: RejectionReason,
}
