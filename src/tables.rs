//! CSV checkpoint tables.
//!
//! Row structs flatten the domain types into one CSV line each. List-valued
//! columns (contributions, affiliations) are stored as JSON arrays so that
//! `Publications.csv` + `Authors.csv` read back into the exact canonical set.

use crate::authors::ReconciledAuthor;
use crate::dedup::CanonicalSet;
use crate::enrich::OaEnrichment;
use crate::error::{ImportError, Result};
use crate::model::{AuthorMention, CanonicalAuthor, CanonicalPublication, IdentityKey, RejectedPublication, Source};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const PUBLICATIONS_FILE: &str = "Publications.csv";
pub const REJECTED_FILE: &str = "Rejected.csv";
pub const AUTHORS_FILE: &str = "Authors.csv";
pub const RECONCILED_AUTHORS_FILE: &str = "ReconciledAuthors.csv";
pub const OPEN_ACCESS_FILE: &str = "OpenAccess.csv";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationRow {
    pub record_key: String,
    pub doi: Option<String>,
    pub title: String,
    pub pubyear: i32,
    pub doctype: Option<String>,
    pub ifs3_doctype: Option<String>,
    pub ifs3_collection_id: Option<String>,
    /// JSON array of contributions
    pub contributions: String,
}

impl PublicationRow {
    pub fn from_publication(publication: &CanonicalPublication) -> Result<Self> {
        Ok(Self {
            record_key: publication.record_key(),
            doi: publication.doi.clone(),
            title: publication.title.clone(),
            pubyear: publication.pubyear,
            doctype: publication.doctype.clone(),
            ifs3_doctype: publication.ifs3_doctype.clone(),
            ifs3_collection_id: publication.ifs3_collection_id.clone(),
            contributions: serde_json::to_string(&publication.contributions)?,
        })
    }

    /// Rebuild the publication without its authors
    pub fn into_publication(self) -> Result<CanonicalPublication> {
        Ok(CanonicalPublication {
            key: self.record_key.parse()?,
            doi: self.doi,
            title: self.title,
            pubyear: self.pubyear,
            doctype: self.doctype,
            ifs3_doctype: self.ifs3_doctype,
            ifs3_collection_id: self.ifs3_collection_id,
            authors: Vec::new(),
            contributions: serde_json::from_str(&self.contributions)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    pub record_key: String,
    pub doi: Option<String>,
    pub title: String,
    pub pubyear: i32,
    pub doctype: Option<String>,
    pub reason: String,
    pub catalog_ref: Option<String>,
    pub contributions: String,
}

impl RejectedRow {
    pub fn from_rejected(rejected: &RejectedPublication) -> Result<Self> {
        let publication = &rejected.publication;
        Ok(Self {
            record_key: publication.record_key(),
            doi: publication.doi.clone(),
            title: publication.title.clone(),
            pubyear: publication.pubyear,
            doctype: publication.doctype.clone(),
            reason: rejected.reason.label(),
            catalog_ref: rejected.reason.catalog_ref().map(|r| r.id.clone()),
            contributions: serde_json::to_string(&publication.contributions)?,
        })
    }
}

/// One author mention before reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRow {
    pub record_key: String,
    pub position: usize,
    pub source: Source,
    pub internal_id: String,
    pub display_name: String,
    pub orcid: Option<String>,
    pub internal_author_id: Option<String>,
    /// JSON array
    pub raw_affiliations: String,
    /// JSON array
    pub affiliation_ids: String,
    pub is_epfl_flag: bool,
}

impl AuthorRow {
    pub fn from_author(record_key: &str, author: &CanonicalAuthor) -> Result<Self> {
        let mention = &author.mention;
        Ok(Self {
            record_key: record_key.to_string(),
            position: author.position,
            source: author.source,
            internal_id: author.internal_id.clone(),
            display_name: mention.display_name.clone(),
            orcid: mention.orcid.clone(),
            internal_author_id: mention.internal_author_id.clone(),
            raw_affiliations: serde_json::to_string(&mention.raw_affiliations)?,
            affiliation_ids: serde_json::to_string(&mention.affiliation_ids)?,
            is_epfl_flag: mention.is_epfl_flag,
        })
    }

    pub fn into_author(self) -> Result<(String, CanonicalAuthor)> {
        let mention = AuthorMention {
            display_name: self.display_name,
            orcid: self.orcid,
            internal_author_id: self.internal_author_id,
            raw_affiliations: serde_json::from_str(&self.raw_affiliations)?,
            affiliation_ids: serde_json::from_str(&self.affiliation_ids)?,
            is_epfl_flag: self.is_epfl_flag,
        };
        Ok((
            self.record_key,
            CanonicalAuthor {
                position: self.position,
                source: self.source,
                internal_id: self.internal_id,
                mention,
            },
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledAuthorRow {
    pub record_key: String,
    pub position: usize,
    pub source: Source,
    pub internal_id: String,
    pub display_name: String,
    pub orcid: Option<String>,
    pub epfl_affiliation: bool,
    pub cleaned_name: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub person_id: Option<String>,
    pub unit_id: Option<String>,
    pub unit_name: Option<String>,
    pub unit_type: Option<String>,
    pub lookup_status: Option<String>,
}

impl From<&ReconciledAuthor> for ReconciledAuthorRow {
    fn from(author: &ReconciledAuthor) -> Self {
        Self {
            record_key: author.record_key.clone(),
            position: author.position,
            source: author.source,
            internal_id: author.internal_id.clone(),
            display_name: author.mention.display_name.clone(),
            orcid: author.mention.orcid.clone(),
            epfl_affiliation: author.epfl_affiliation,
            cleaned_name: author.cleaned_name.clone(),
            firstname: author.firstname.clone(),
            lastname: author.lastname.clone(),
            person_id: author.person_id.clone(),
            unit_id: author.unit_id.clone(),
            unit_name: author.unit_name.clone(),
            unit_type: author.unit_type.clone(),
            lookup_status: author.lookup_status.map(|s| s.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccessRow {
    pub record_key: String,
    pub doi: Option<String>,
    pub is_oa: Option<bool>,
    pub oa_status: Option<String>,
    pub license: Option<String>,
    pub version: Option<String>,
    /// `|`-separated
    pub fulltext_urls: String,
    pub outcome: String,
}

impl From<&OaEnrichment> for OpenAccessRow {
    fn from(e: &OaEnrichment) -> Self {
        Self {
            record_key: e.record_key.clone(),
            doi: e.doi.clone(),
            is_oa: e.is_oa,
            oa_status: e.oa_status.clone(),
            license: e.license.clone(),
            version: e.version.clone(),
            fulltext_urls: e.fulltext_urls.join("|"),
            outcome: e.outcome.as_str().to_string(),
        }
    }
}

/// Write rows with a header line. An empty slice gives an empty file.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = rows.len(), "Saved table");
    Ok(())
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(rows)
}

pub fn write_publications(path: &Path, canonical: &CanonicalSet) -> Result<()> {
    let rows = canonical
        .values()
        .map(PublicationRow::from_publication)
        .collect::<Result<Vec<_>>>()?;
    write_csv(path, &rows)
}

pub fn write_rejected(path: &Path, rejected: &[RejectedPublication]) -> Result<()> {
    let rows = rejected
        .iter()
        .map(RejectedRow::from_rejected)
        .collect::<Result<Vec<_>>>()?;
    write_csv(path, &rows)
}

pub fn write_authors(path: &Path, canonical: &CanonicalSet) -> Result<()> {
    let mut rows = Vec::new();
    for publication in canonical.values() {
        let record_key = publication.record_key();
        for author in &publication.authors {
            rows.push(AuthorRow::from_author(&record_key, author)?);
        }
    }
    write_csv(path, &rows)
}

pub fn write_reconciled_authors(path: &Path, authors: &[ReconciledAuthor]) -> Result<()> {
    let rows: Vec<ReconciledAuthorRow> = authors.iter().map(ReconciledAuthorRow::from).collect();
    write_csv(path, &rows)
}

pub fn write_open_access(path: &Path, enrichments: &[OaEnrichment]) -> Result<()> {
    let rows: Vec<OpenAccessRow> = enrichments.iter().map(OpenAccessRow::from).collect();
    write_csv(path, &rows)
}

/// Rebuild the canonical set from the publications and authors checkpoints
pub fn read_canonical_set(publications_path: &Path, authors_path: &Path) -> Result<CanonicalSet> {
    let mut canonical: CanonicalSet = BTreeMap::new();
    for row in read_csv::<PublicationRow>(publications_path)? {
        let publication = row.into_publication()?;
        canonical.insert(publication.key.clone(), publication);
    }

    for row in read_csv::<AuthorRow>(authors_path)? {
        let (record_key, author) = row.into_author()?;
        let key: IdentityKey = record_key.parse()?;
        let publication = canonical.get_mut(&key).ok_or_else(|| {
            ImportError::Validation(format!("Author row refers to unknown record_key '{}'", record_key))
        })?;
        publication.authors.push(author);
    }

    for publication in canonical.values_mut() {
        publication.authors.sort_by_key(|a| a.position);
    }

    info!(publications = canonical.len(), "Loaded canonical set from checkpoint");
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CatalogRef, Contribution, MatchedBy, RejectionReason};

    fn publication() -> CanonicalPublication {
        CanonicalPublication {
            key: IdentityKey::Doi("10.1/abc".to_string()),
            doi: Some("10.1/abc".to_string()),
            title: "Foo, \"Bar\"\nand baz".to_string(),
            pubyear: 2024,
            doctype: Some("Article".to_string()),
            ifs3_doctype: Some("Journal articles".to_string()),
            ifs3_collection_id: Some("8a8d3310-6535-4d3a-90b6-2a4428097b5b".to_string()),
            authors: vec![
                CanonicalAuthor {
                    position: 0,
                    source: Source::OpenalexCrossref,
                    internal_id: "W1".to_string(),
                    mention: AuthorMention {
                        display_name: "Doe, Jane".to_string(),
                        orcid: Some("0000-0001".to_string()),
                        internal_author_id: None,
                        raw_affiliations: vec!["EPFL, Lausanne".to_string(), "ETH".to_string()],
                        affiliation_ids: vec!["60028186".to_string()],
                        is_epfl_flag: true,
                    },
                },
                CanonicalAuthor {
                    position: 1,
                    source: Source::Wos,
                    internal_id: "WOS:1".to_string(),
                    mention: AuthorMention {
                        display_name: "Roe, R.".to_string(),
                        ..Default::default()
                    },
                },
            ],
            contributions: vec![
                Contribution {
                    source: Source::OpenalexCrossref,
                    internal_id: "W1".to_string(),
                    doctype: "article".to_string(),
                    note: None,
                },
                Contribution {
                    source: Source::Wos,
                    internal_id: "WOS:1".to_string(),
                    doctype: "Meeting Abstract".to_string(),
                    note: Some("UnmappedDoctypeError: wos doctype 'Meeting Abstract' has no collection mapping".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_canonical_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pubs = dir.path().join(PUBLICATIONS_FILE);
        let authors = dir.path().join(AUTHORS_FILE);

        let mut canonical = CanonicalSet::new();
        let p = publication();
        canonical.insert(p.key.clone(), p);
        let mut no_doi = publication();
        no_doi.key = IdentityKey::TitleYear {
            title: "foo bar".to_string(),
            year: 2020,
        };
        no_doi.doi = None;
        no_doi.authors.clear();
        canonical.insert(no_doi.key.clone(), no_doi);

        write_publications(&pubs, &canonical).unwrap();
        write_authors(&authors, &canonical).unwrap();
        let restored = read_canonical_set(&pubs, &authors).unwrap();
        assert_eq!(restored, canonical);
    }

    #[test]
    fn test_blank_author_ids_survive_checkpoint() {
        use crate::config::SourcePreference;
        use crate::dedup::DedupEngine;
        use crate::input::parse_jsonl;
        use crate::mappings::DoctypeMapping;

        let line = r#"{"source":"scopus","internal_id":"S:1","doi":"10.1/abc","title":"Foo","doctype":"Article","pubyear":2024,"authors":[{"display_name":"Doe, Jane","orcid":"","internal_author_id":"  "}]}"#;
        let loaded = parse_jsonl(line, "scopus.jsonl");
        let canonical = DedupEngine::new(SourcePreference::default(), DoctypeMapping::default())
            .merge(loaded.records)
            .canonical;

        let dir = tempfile::tempdir().unwrap();
        let pubs = dir.path().join(PUBLICATIONS_FILE);
        let authors = dir.path().join(AUTHORS_FILE);
        write_publications(&pubs, &canonical).unwrap();
        write_authors(&authors, &canonical).unwrap();
        let restored = read_canonical_set(&pubs, &authors).unwrap();
        assert_eq!(restored, canonical);
        let mention = &restored.values().next().unwrap().authors[0].mention;
        assert_eq!(mention.orcid, None);
        assert_eq!(mention.internal_author_id, None);
    }

    #[test]
    fn test_empty_tables_read_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pubs = dir.path().join(PUBLICATIONS_FILE);
        let authors = dir.path().join(AUTHORS_FILE);
        write_publications(&pubs, &CanonicalSet::new()).unwrap();
        write_authors(&authors, &CanonicalSet::new()).unwrap();
        assert!(read_canonical_set(&pubs, &authors).unwrap().is_empty());
    }

    #[test]
    fn test_orphan_author_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pubs = dir.path().join(PUBLICATIONS_FILE);
        let authors = dir.path().join(AUTHORS_FILE);
        let mut canonical = CanonicalSet::new();
        let p = publication();
        canonical.insert(p.key.clone(), p);
        write_authors(&authors, &canonical).unwrap();
        write_publications(&pubs, &CanonicalSet::new()).unwrap();

        let err = read_canonical_set(&pubs, &authors).unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[test]
    fn test_rejected_row_carries_reason_and_ref() {
        let rejected = RejectedPublication {
            publication: publication(),
            reason: RejectionReason::Duplicate {
                matched_by: MatchedBy::Doi,
                catalog_ref: CatalogRef { id: "uuid-9".to_string() },
            },
        };
        let row = RejectedRow::from_rejected(&rejected).unwrap();
        assert_eq!(row.reason, "matched_by:doi");
        assert_eq!(row.catalog_ref.as_deref(), Some("uuid-9"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REJECTED_FILE);
        write_rejected(&path, &[rejected]).unwrap();
        let rows: Vec<RejectedRow> = read_csv(&path).unwrap();
        assert_eq!(rows[0].record_key, "doi:10.1/abc");
    }
}
