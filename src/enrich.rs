//! Open-access enrichment of canonical publications.
//!
//! Each DOI is looked up once per run. Full-text URLs are only attached when
//! the record and the hosting location pass the [`FulltextGate`].

use crate::cache::LookupCache;
use crate::config::OpenAccessConfig;
use crate::dedup::CanonicalSet;
use crate::error::Result;
use crate::unpaywall::{OaLocation, OaRecord, OaService};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What happened to one publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OaOutcome {
    Enriched,
    NotFound,
    SkippedNoDoi,
    Error,
}

impl OaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OaOutcome::Enriched => "enriched",
            OaOutcome::NotFound => "not_found",
            OaOutcome::SkippedNoDoi => "skipped_no_doi",
            OaOutcome::Error => "error",
        }
    }
}

/// OA attributes of one canonical publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaEnrichment {
    pub record_key: String,
    pub doi: Option<String>,
    pub is_oa: Option<bool>,
    pub oa_status: Option<String>,
    /// License of the best location
    pub license: Option<String>,
    /// Version of the best location
    pub version: Option<String>,
    pub fulltext_urls: Vec<String>,
    pub outcome: OaOutcome,
}

impl OaEnrichment {
    fn empty(record_key: String, doi: Option<String>, outcome: OaOutcome) -> Self {
        Self {
            record_key,
            doi,
            is_oa: None,
            oa_status: None,
            license: None,
            version: None,
            fulltext_urls: Vec::new(),
            outcome,
        }
    }
}

/// Decides which locations may be harvested as full text
#[derive(Debug, Clone)]
pub struct FulltextGate {
    oa_statuses: HashSet<String>,
    licenses: HashSet<String>,
    published_version: String,
}

impl FulltextGate {
    pub fn new(config: &OpenAccessConfig) -> Self {
        Self {
            oa_statuses: config.allowed_oa_statuses.iter().map(|s| s.to_lowercase()).collect(),
            licenses: config.allowed_licenses.iter().map(|s| s.to_lowercase()).collect(),
            published_version: config.published_version.clone(),
        }
    }

    fn record_allowed(&self, record: &OaRecord) -> bool {
        record.is_oa
            && record
                .oa_status
                .as_deref()
                .is_some_and(|s| self.oa_statuses.contains(&s.to_lowercase()))
    }

    fn location_allowed(&self, location: &OaLocation) -> bool {
        location.version.as_deref() == Some(self.published_version.as_str())
            && location
                .license
                .as_deref()
                .is_some_and(|l| self.licenses.contains(&l.trim().to_lowercase()))
    }

    /// PDF URL (else generic URL) of every allowed location, without repeats
    pub fn fulltext_urls(&self, record: &OaRecord) -> Vec<String> {
        if !self.record_allowed(record) {
            return Vec::new();
        }

        let mut urls: Vec<String> = Vec::new();
        for location in record.locations() {
            if !self.location_allowed(location) {
                continue;
            }
            if let Some(url) = location.url_for_pdf.as_ref().or(location.url.as_ref()) {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }
}

/// Per-run DOI cache in front of any OA service
pub struct CachedOaService<S> {
    inner: S,
    cache: LookupCache<String, Option<OaRecord>>,
}

impl<S: OaService> CachedOaService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: LookupCache::new("oa"),
        }
    }
}

#[async_trait]
impl<S: OaService> OaService for CachedOaService<S> {
    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<OaRecord>> {
        self.cache
            .get_or_fetch(doi.to_string(), || self.inner.fetch_by_doi(doi))
            .await
    }
}

async fn enrich_one<S: OaService + ?Sized>(
    service: &S,
    gate: &FulltextGate,
    record_key: String,
    doi: Option<String>,
) -> OaEnrichment {
    let Some(doi_value) = doi.clone() else {
        return OaEnrichment::empty(record_key, None, OaOutcome::SkippedNoDoi);
    };

    match service.fetch_by_doi(&doi_value).await {
        Ok(Some(record)) => {
            let best = record.best_oa_location.as_ref();
            let fulltext_urls = gate.fulltext_urls(&record);
            debug!(doi = %doi_value, urls = fulltext_urls.len(), "OA record");
            OaEnrichment {
                record_key,
                doi,
                is_oa: Some(record.is_oa),
                oa_status: record.oa_status.clone(),
                license: best.and_then(|l| l.license.clone()),
                version: best.and_then(|l| l.version.clone()),
                fulltext_urls,
                outcome: OaOutcome::Enriched,
            }
        }
        Ok(None) => OaEnrichment::empty(record_key, doi, OaOutcome::NotFound),
        Err(e) => {
            warn!(doi = %doi_value, error = %e, "OA lookup failed");
            OaEnrichment::empty(record_key, doi, OaOutcome::Error)
        }
    }
}

/// Enrich every publication; output follows the canonical set order
pub async fn enrich<S: OaService + ?Sized>(
    canonical: &CanonicalSet,
    service: &S,
    gate: &FulltextGate,
    concurrency: usize,
) -> Vec<OaEnrichment> {
    info!(publications = canonical.len(), concurrency = concurrency, "Starting OA enrichment");

    let mut results: Vec<(usize, OaEnrichment)> = stream::iter(canonical.values().enumerate())
        .map(|(idx, publication)| async move {
            let enrichment = enrich_one(service, gate, publication.record_key(), publication.doi.clone()).await;
            (idx, enrichment)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(idx, _)| *idx);
    let enrichments: Vec<_> = results.into_iter().map(|(_, e)| e).collect();
    let with_fulltext = enrichments.iter().filter(|e| !e.fulltext_urls.is_empty()).count();
    info!(publications = enrichments.len(), with_fulltext = with_fulltext, "OA enrichment complete");
    enrichments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use crate::model::{CanonicalPublication, IdentityKey};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn location(license: &str, version: &str, pdf: Option<&str>) -> OaLocation {
        OaLocation {
            url: Some("https://example.org/landing".to_string()),
            url_for_pdf: pdf.map(str::to_string),
            version: Some(version.to_string()),
            license: Some(license.to_string()),
            ..Default::default()
        }
    }

    fn record(status: &str, locations: Vec<OaLocation>) -> OaRecord {
        OaRecord {
            doi: Some("10.1/abc".to_string()),
            is_oa: true,
            oa_status: Some(status.to_string()),
            best_oa_location: locations.first().cloned(),
            oa_locations: locations,
        }
    }

    fn gate() -> FulltextGate {
        FulltextGate::new(&OpenAccessConfig::default())
    }

    #[test]
    fn test_gate_allows_gold_published_cc_by() {
        let r = record("gold", vec![location("cc-by", "publishedVersion", Some("https://example.org/a.pdf"))]);
        assert_eq!(gate().fulltext_urls(&r), vec!["https://example.org/a.pdf"]);
    }

    #[test]
    fn test_gate_rejects_non_commercial_license() {
        let r = record("gold", vec![location("cc-by-nc", "publishedVersion", Some("https://example.org/a.pdf"))]);
        assert!(gate().fulltext_urls(&r).is_empty());
    }

    #[test]
    fn test_gate_checks_status_version_and_flag() {
        let ok = location("CC-BY", "publishedVersion", None);
        assert_eq!(gate().fulltext_urls(&record("hybrid", vec![ok.clone()])), vec!["https://example.org/landing"]);
        assert!(gate().fulltext_urls(&record("bronze", vec![ok.clone()])).is_empty());
        assert!(gate()
            .fulltext_urls(&record("green", vec![location("cc-by", "acceptedVersion", None)]))
            .is_empty());

        let mut closed = record("gold", vec![ok]);
        closed.is_oa = false;
        assert!(gate().fulltext_urls(&closed).is_empty());
    }

    #[test]
    fn test_gate_deduplicates_urls() {
        let pdf = Some("https://example.org/a.pdf");
        let r = record(
            "green",
            vec![
                location("cc-by", "publishedVersion", pdf),
                location("public-domain", "publishedVersion", pdf),
                location("cc-by-nd", "publishedVersion", Some("https://repo.org/b.pdf")),
            ],
        );
        assert_eq!(gate().fulltext_urls(&r), vec!["https://example.org/a.pdf"]);
    }

    struct FakeOa {
        records: HashMap<String, OaRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OaService for FakeOa {
        async fn fetch_by_doi(&self, doi: &str) -> Result<Option<OaRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if doi == "10.1/broken" {
                return Err(ImportError::Api {
                    code: 500,
                    message: "down".to_string(),
                });
            }
            Ok(self.records.get(doi).cloned())
        }
    }

    fn publication(doi: Option<&str>, title: &str) -> CanonicalPublication {
        CanonicalPublication {
            key: match doi {
                Some(d) => IdentityKey::Doi(d.to_string()),
                None => IdentityKey::TitleYear {
                    title: title.to_string(),
                    year: 2024,
                },
            },
            doi: doi.map(str::to_string),
            title: title.to_string(),
            pubyear: 2024,
            doctype: Some("Article".to_string()),
            ifs3_doctype: Some("Journal articles".to_string()),
            ifs3_collection_id: Some("id".to_string()),
            authors: vec![],
            contributions: vec![],
        }
    }

    #[tokio::test]
    async fn test_enrich_outcomes() {
        let mut records = HashMap::new();
        records.insert(
            "10.1/abc".to_string(),
            record("gold", vec![location("cc-by", "publishedVersion", Some("https://example.org/a.pdf"))]),
        );
        let service = CachedOaService::new(FakeOa {
            records,
            calls: AtomicUsize::new(0),
        });

        let mut canonical = CanonicalSet::new();
        for p in [
            publication(Some("10.1/abc"), "a"),
            publication(Some("10.1/missing"), "b"),
            publication(Some("10.1/broken"), "c"),
            publication(None, "d"),
        ] {
            canonical.insert(p.key.clone(), p);
        }

        let results = enrich(&canonical, &service, &gate(), 3).await;
        let outcome = |key: &str| results.iter().find(|r| r.record_key == key).unwrap().clone();

        let enriched = outcome("doi:10.1/abc");
        assert_eq!(enriched.outcome, OaOutcome::Enriched);
        assert_eq!(enriched.license.as_deref(), Some("cc-by"));
        assert_eq!(enriched.fulltext_urls.len(), 1);
        assert_eq!(outcome("doi:10.1/missing").outcome, OaOutcome::NotFound);
        assert_eq!(outcome("doi:10.1/broken").outcome, OaOutcome::Error);
        assert_eq!(outcome("title_year:2024:d").outcome, OaOutcome::SkippedNoDoi);

        enrich(&canonical, &service, &gate(), 3).await;
        // abc and missing are cached; broken is retried
        assert_eq!(service.inner.calls.load(Ordering::SeqCst), 4);
    }
}
