//! Run summary written next to the tables as `summary.json`.

use crate::authors::{LookupStatus, ReconciledAuthor};
use crate::dedup::{CanonicalSet, CatalogOutcome, MergeOutcome};
use crate::enrich::OaEnrichment;
use crate::error::{ImportError, Result};
use crate::model::SourceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupSummary {
    /// Parsed records, by source code
    pub input_records: BTreeMap<String, usize>,
    /// Records excluded before merging, by error kind
    pub excluded_records: BTreeMap<String, usize>,
    pub canonical: usize,
    /// Rejected publications by reason label
    pub rejected: BTreeMap<String, usize>,
    pub catalog_errors: usize,
    /// Contributions whose doctype had no mapping
    pub unmapped_contributions: usize,
    pub without_authors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub total: usize,
    pub epfl: usize,
    /// EPFL decision differs from the flag the source supplied
    pub flag_disagreements: usize,
    /// Lookup status counts, only for authors that went through lookup
    pub lookup: BTreeMap<String, usize>,
    pub with_unit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaSummary {
    /// Counts by outcome
    pub outcomes: BTreeMap<String, usize>,
    pub with_fulltext: usize,
}

/// Counts of one batch run. Sections stay `None` for steps that did not run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub dedup: Option<DedupSummary>,
    pub authors: Option<AuthorSummary>,
    pub open_access: Option<OaSummary>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            started_at: chrono::Local::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Local::now().to_rfc3339());
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved run summary");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn bump(counts: &mut BTreeMap<String, usize>, key: &str) {
    *counts.entry(key.to_string()).or_insert(0) += 1;
}

impl DedupSummary {
    /// Start from the loaded input, before merging consumes it
    pub fn from_inputs(records: &[SourceRecord], malformed: &[ImportError]) -> Self {
        let mut summary = Self::default();
        for record in records {
            bump(&mut summary.input_records, record.source.as_str());
        }
        for failure in malformed {
            bump(&mut summary.excluded_records, failure.kind());
        }
        summary
    }

    pub fn record_merge(&mut self, merge: &MergeOutcome) {
        for failure in &merge.failures {
            bump(&mut self.excluded_records, failure.kind());
        }
        for rejected in &merge.rejected {
            bump(&mut self.rejected, &rejected.reason.label());
        }
    }

    pub fn record_catalog(&mut self, catalog: &CatalogOutcome) {
        for rejected in &catalog.rejected {
            bump(&mut self.rejected, &rejected.reason.label());
        }
        self.canonical = catalog.kept.len();
        self.catalog_errors = catalog.errors.len();
        self.unmapped_contributions = count_unmapped(&catalog.kept);
        self.without_authors = catalog.kept.values().filter(|p| p.authors.is_empty()).count();
    }
}

fn count_unmapped(canonical: &CanonicalSet) -> usize {
    canonical
        .values()
        .flat_map(|p| &p.contributions)
        .filter(|c| c.note.is_some())
        .count()
}

impl AuthorSummary {
    pub fn new(authors: &[ReconciledAuthor]) -> Self {
        let mut summary = Self {
            total: authors.len(),
            ..Default::default()
        };
        for author in authors {
            if author.epfl_affiliation {
                summary.epfl += 1;
            }
            if author.epfl_affiliation != author.mention.is_epfl_flag {
                summary.flag_disagreements += 1;
            }
            if let Some(status) = author.lookup_status {
                bump(&mut summary.lookup, status.as_str());
            }
            if author.unit_id.is_some() {
                summary.with_unit += 1;
            }
        }
        summary
    }

    pub fn resolved(&self) -> usize {
        self.lookup.get(LookupStatus::Resolved.as_str()).copied().unwrap_or(0)
    }
}

impl OaSummary {
    pub fn new(enrichments: &[OaEnrichment]) -> Self {
        let mut summary = Self::default();
        for e in enrichments {
            bump(&mut summary.outcomes, e.outcome.as_str());
            if !e.fulltext_urls.is_empty() {
                summary.with_fulltext += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::OaOutcome;
    use crate::model::{AuthorMention, CanonicalAuthor, Source};

    fn author(epfl: bool, source_flag: bool, status: Option<LookupStatus>) -> ReconciledAuthor {
        let mut a = ReconciledAuthor::new(
            "doi:10.1/abc",
            &CanonicalAuthor {
                position: 0,
                source: Source::Scopus,
                internal_id: "S:1".to_string(),
                mention: AuthorMention {
                    display_name: "Doe, Jane".to_string(),
                    is_epfl_flag: source_flag,
                    ..Default::default()
                },
            },
        );
        a.epfl_affiliation = epfl;
        a.lookup_status = status;
        a
    }

    #[test]
    fn test_author_summary_counts() {
        let mut with_unit = author(true, true, Some(LookupStatus::Resolved));
        with_unit.unit_id = Some("U1".to_string());
        let authors = vec![
            with_unit,
            author(true, false, Some(LookupStatus::Ambiguous)),
            author(false, true, None),
            author(false, false, None),
        ];
        let summary = AuthorSummary::new(&authors);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.epfl, 2);
        assert_eq!(summary.flag_disagreements, 2);
        assert_eq!(summary.resolved(), 1);
        assert_eq!(summary.lookup.get("ambiguous"), Some(&1));
        assert_eq!(summary.with_unit, 1);
    }

    #[test]
    fn test_oa_summary_counts() {
        let enrichment = |outcome: OaOutcome, urls: Vec<&str>| OaEnrichment {
            record_key: "k".to_string(),
            doi: None,
            is_oa: None,
            oa_status: None,
            license: None,
            version: None,
            fulltext_urls: urls.into_iter().map(str::to_string).collect(),
            outcome,
        };
        let summary = OaSummary::new(&[
            enrichment(OaOutcome::Enriched, vec!["https://example.org/a.pdf"]),
            enrichment(OaOutcome::Enriched, vec![]),
            enrichment(OaOutcome::SkippedNoDoi, vec![]),
        ]);
        assert_eq!(summary.outcomes.get("enriched"), Some(&2));
        assert_eq!(summary.outcomes.get("skipped_no_doi"), Some(&1));
        assert_eq!(summary.with_fulltext, 1);
    }

    #[test]
    fn test_summary_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUMMARY_FILE);
        let mut summary = RunSummary::start();
        summary.open_access = Some(OaSummary::default());
        summary.finish();
        summary.save(&path).unwrap();
        assert_eq!(RunSummary::load(&path).unwrap(), summary);
    }
}
