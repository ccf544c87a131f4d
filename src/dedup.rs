//! Cross-source deduplication.
//!
//! Two passes:
//!
//! 1. [`DedupEngine::merge`] clusters source records by normalized DOI, then by
//!    exact normalized title + publication year, and folds every cluster into
//!    one [`CanonicalPublication`] following the configured source preference.
//! 2. [`filter_catalogued`] moves publications already present in the
//!    catalog into the rejected set.
//!
//! Records carrying two different non-empty DOIs never end up in the same
//! cluster, even when their titles and years agree.

use crate::catalog::Catalog;
use crate::config::{preference_rank, SourcePreference};
use crate::error::ImportError;
use crate::mappings::{DoctypeMapping, MappedDoctype};
use crate::model::{
    AuthorMention, CanonicalAuthor, CanonicalPublication, CatalogRef, Contribution, IdentityKey,
    MatchedBy, RejectedPublication, RejectionReason, Source, SourceRecord,
};
use crate::normalize::{normalize_name_key, normalize_title};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Canonical publications keyed by identity
pub type CanonicalSet = BTreeMap<IdentityKey, CanonicalPublication>;

/// Result of the cross-source merge
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub canonical: CanonicalSet,
    pub rejected: Vec<RejectedPublication>,
    /// Records excluded before merging (duplicates and malformed)
    pub failures: Vec<ImportError>,
}

/// Result of the catalog-dedup pass
#[derive(Debug, Default)]
pub struct CatalogOutcome {
    pub kept: CanonicalSet,
    pub rejected: Vec<RejectedPublication>,
    /// Catalog errors; the affected publications were kept
    pub errors: Vec<(IdentityKey, ImportError)>,
}

struct Cluster {
    doi: Option<String>,
    members: Vec<usize>,
}

fn compatible(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Merges source records into canonical publications
pub struct DedupEngine {
    preference: SourcePreference,
    mapping: DoctypeMapping,
}

impl DedupEngine {
    pub fn new(preference: SourcePreference, mapping: DoctypeMapping) -> Self {
        Self { preference, mapping }
    }

    /// Merge records from every source. Input order only breaks preference ties.
    pub fn merge(&self, records: Vec<SourceRecord>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let records = self.screen(records, &mut outcome.failures);

        for cluster in cluster_records(&records) {
            let members: Vec<(usize, &SourceRecord)> =
                cluster.members.iter().map(|&i| (i, &records[i])).collect();
            match self.fold(cluster.doi, &members) {
                Ok(publication) => {
                    debug!(key = %publication.key, contributors = members.len(), "Merged cluster");
                    outcome.canonical.insert(publication.key.clone(), publication);
                }
                Err(publication) => {
                    warn!(key = %publication.key, "No contributor doctype maps to a collection");
                    outcome.rejected.push(RejectedPublication {
                        publication,
                        reason: RejectionReason::UnmappableDoctype,
                    });
                }
            }
        }

        info!(
            input = records.len(),
            canonical = outcome.canonical.len(),
            rejected = outcome.rejected.len(),
            failures = outcome.failures.len(),
            "Cross-source merge complete"
        );
        outcome
    }

    /// Drop malformed records and every occurrence of a repeated `(source, internal_id)`.
    fn screen(&self, records: Vec<SourceRecord>, failures: &mut Vec<ImportError>) -> Vec<SourceRecord> {
        let mut occurrences: HashMap<(Source, String), usize> = HashMap::new();
        for record in &records {
            *occurrences
                .entry((record.source, record.internal_id.clone()))
                .or_default() += 1;
        }

        let mut reported: BTreeSet<(Source, String)> = BTreeSet::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if let Err(e) = record.validate() {
                warn!(source = %record.source, internal_id = %record.internal_id, error = %e, "Excluding record");
                failures.push(e);
                continue;
            }
            let id = (record.source, record.internal_id.clone());
            if occurrences.get(&id).copied().unwrap_or(0) > 1 {
                if reported.insert(id) {
                    let e = ImportError::DuplicateSourceRecord {
                        origin: record.source,
                        internal_id: record.internal_id.clone(),
                    };
                    warn!(error = %e, "Excluding every occurrence");
                    failures.push(e);
                }
                continue;
            }
            kept.push(record);
        }
        kept
    }

    /// Fold one cluster. `Err` carries the publication when no doctype maps.
    fn fold(
        &self,
        doi: Option<String>,
        members: &[(usize, &SourceRecord)],
    ) -> std::result::Result<CanonicalPublication, CanonicalPublication> {
        let by_title = best_by(members, &self.preference.title);
        let by_year = best_by(members, &self.preference.pubyear);

        let key = match &doi {
            Some(doi) => IdentityKey::Doi(doi.clone()),
            None => IdentityKey::TitleYear {
                title: normalize_title(&by_title.title),
                year: by_year.pubyear,
            },
        };

        let mut chosen: Option<(&SourceRecord, MappedDoctype)> = None;
        let mut notes: HashMap<usize, String> = HashMap::new();
        for (idx, record) in ranked(members, &self.preference.doctype) {
            match self.mapping.resolve(record.source, &record.doctype) {
                Ok(mapped) => {
                    if chosen.is_none() {
                        chosen = Some((record, mapped));
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Contributor doctype not mapped");
                    notes.insert(idx, e.to_string());
                }
            }
        }

        let contributions = members
            .iter()
            .map(|(idx, record)| Contribution {
                source: record.source,
                internal_id: record.internal_id.clone(),
                doctype: record.doctype.clone(),
                note: notes.remove(idx),
            })
            .collect();

        let mut publication = CanonicalPublication {
            key,
            doi,
            title: by_title.title.clone(),
            pubyear: by_year.pubyear,
            doctype: None,
            ifs3_doctype: None,
            ifs3_collection_id: None,
            authors: union_authors(&ranked(members, &self.preference.authors)),
            contributions,
        };

        match chosen {
            Some((record, mapped)) => {
                publication.doctype = Some(record.doctype.clone());
                publication.ifs3_doctype = Some(mapped.collection_name);
                publication.ifs3_collection_id = Some(mapped.collection_id);
                Ok(publication)
            }
            None => Err(publication),
        }
    }
}

/// Members sorted by preference rank, ties by input order
fn ranked<'a>(members: &[(usize, &'a SourceRecord)], order: &[Source]) -> Vec<(usize, &'a SourceRecord)> {
    let mut sorted = members.to_vec();
    sorted.sort_by_key(|(idx, record)| (preference_rank(order, record.source), *idx));
    sorted
}

fn best_by<'a>(members: &[(usize, &'a SourceRecord)], order: &[Source]) -> &'a SourceRecord {
    // Clusters are never empty
    ranked(members, order)[0].1
}

/// Group record indices: shared DOI first, then exact title + year.
fn cluster_records(records: &[SourceRecord]) -> Vec<Cluster> {
    let mut by_doi: HashMap<String, usize> = HashMap::new();
    let mut doi_clusters: Vec<Cluster> = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        match record.normalized_doi() {
            Some(doi) => match by_doi.get(&doi) {
                Some(&c) => doi_clusters[c].members.push(idx),
                None => {
                    by_doi.insert(doi.clone(), doi_clusters.len());
                    doi_clusters.push(Cluster {
                        doi: Some(doi),
                        members: vec![idx],
                    });
                }
            },
            None => doi_clusters.push(Cluster {
                doi: None,
                members: vec![idx],
            }),
        }
    }

    let mut merged: Vec<Cluster> = Vec::new();
    let mut by_title_year: HashMap<IdentityKey, Vec<usize>> = HashMap::new();
    for cluster in doi_clusters {
        let keys: BTreeSet<IdentityKey> = cluster
            .members
            .iter()
            .map(|&i| records[i].title_year_key())
            .collect();

        let target = keys
            .iter()
            .filter_map(|k| by_title_year.get(k))
            .flatten()
            .copied()
            .filter(|&m| compatible(&merged[m].doi, &cluster.doi))
            .min();

        let slot = match target {
            Some(m) => {
                let into = &mut merged[m];
                into.members.extend(cluster.members);
                into.members.sort_unstable();
                if into.doi.is_none() {
                    into.doi = cluster.doi;
                }
                m
            }
            None => {
                merged.push(cluster);
                merged.len() - 1
            }
        };

        for key in keys {
            let owners = by_title_year.entry(key).or_default();
            if !owners.contains(&slot) {
                owners.push(slot);
            }
        }
    }
    merged
}

/// Union author lists, keeping the first occurrence of each cleaned name.
fn union_authors(members: &[(usize, &SourceRecord)]) -> Vec<CanonicalAuthor> {
    let mut authors: Vec<CanonicalAuthor> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (_, record) in members {
        for mention in &record.authors {
            let name_key = normalize_name_key(&mention.display_name);
            if !name_key.is_empty() {
                if let Some(&existing) = seen.get(&name_key) {
                    absorb(&mut authors[existing].mention, mention);
                    continue;
                }
                seen.insert(name_key, authors.len());
            }
            authors.push(CanonicalAuthor {
                position: authors.len(),
                source: record.source,
                internal_id: record.internal_id.clone(),
                mention: mention.clone(),
            });
        }
    }
    authors
}

fn absorb(kept: &mut AuthorMention, other: &AuthorMention) {
    if kept.orcid.is_none() {
        kept.orcid = other.orcid.clone();
    }
    if kept.internal_author_id.is_none() {
        kept.internal_author_id = other.internal_author_id.clone();
    }
    for affiliation in &other.raw_affiliations {
        if !kept.raw_affiliations.contains(affiliation) {
            kept.raw_affiliations.push(affiliation.clone());
        }
    }
    for id in &other.affiliation_ids {
        if !kept.affiliation_ids.contains(id) {
            kept.affiliation_ids.push(id.clone());
        }
    }
    kept.is_epfl_flag |= other.is_epfl_flag;
}

async fn lookup_catalog<C: Catalog + ?Sized>(
    catalog: &C,
    publication: &CanonicalPublication,
) -> crate::error::Result<Option<(MatchedBy, CatalogRef)>> {
    if let Some(doi) = &publication.doi {
        if let Some(found) = catalog.find_by_doi(doi).await? {
            return Ok(Some((MatchedBy::Doi, found)));
        }
    }
    let title = normalize_title(&publication.title);
    Ok(catalog
        .find_by_title_year(&title, publication.pubyear)
        .await?
        .map(|found| (MatchedBy::TitleYear, found)))
}

/// Split a canonical set into publications unknown to the catalog and
/// duplicates of catalogued items. Lookup errors keep the publication.
pub async fn filter_catalogued<C: Catalog + ?Sized>(
    canonical: CanonicalSet,
    catalog: &C,
    concurrency: usize,
) -> CatalogOutcome {
    info!(publications = canonical.len(), concurrency = concurrency, "Checking catalog for duplicates");

    let lookups: Vec<_> = stream::iter(canonical.values())
        .map(|publication| async move { (publication.key.clone(), lookup_catalog(catalog, publication).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut verdicts: HashMap<IdentityKey, _> = lookups.into_iter().collect();
    let mut outcome = CatalogOutcome::default();

    for (key, publication) in canonical {
        match verdicts.remove(&key) {
            Some(Ok(Some((matched_by, catalog_ref)))) => {
                info!(key = %key, matched_by = %matched_by, catalog_ref = %catalog_ref.id, "Already in catalog");
                outcome.rejected.push(RejectedPublication {
                    publication,
                    reason: RejectionReason::Duplicate { matched_by, catalog_ref },
                });
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Catalog lookup failed, keeping publication");
                outcome.errors.push((key.clone(), e));
                outcome.kept.insert(key, publication);
            }
            Some(Ok(None)) | None => {
                outcome.kept.insert(key, publication);
            }
        }
    }

    info!(
        kept = outcome.kept.len(),
        rejected = outcome.rejected.len(),
        errors = outcome.errors.len(),
        "Catalog pass complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, SnapshotRow};
    use crate::error::Result;
    use async_trait::async_trait;

    fn record(source: Source, id: &str, doi: Option<&str>, title: &str, doctype: &str) -> SourceRecord {
        SourceRecord {
            source,
            internal_id: id.to_string(),
            doi: doi.map(str::to_string),
            title: title.to_string(),
            doctype: doctype.to_string(),
            pubyear: 2024,
            authors: vec![],
        }
    }

    fn mention(name: &str) -> AuthorMention {
        AuthorMention {
            display_name: name.to_string(),
            ..Default::default()
        }
    }

    fn engine() -> DedupEngine {
        DedupEngine::new(SourcePreference::default(), DoctypeMapping::default())
    }

    #[test]
    fn test_shared_doi_merges_regardless_of_order() {
        let a = record(Source::Scopus, "S:1", Some("10.1/ABC"), "Foo", "Article");
        let b = record(Source::Wos, "W:1", Some(" https://doi.org/10.1/abc"), "Completely different", "Article");
        let c = record(Source::Openalex, "O:1", Some("10.1/abc"), "Third", "article");

        let forward = engine().merge(vec![a.clone(), b.clone(), c.clone()]);
        let backward = engine().merge(vec![c, b, a]);
        assert_eq!(forward.canonical.len(), 1);
        assert_eq!(backward.canonical.len(), 1);

        let key = IdentityKey::Doi("10.1/abc".to_string());
        let pub_f = &forward.canonical[&key];
        let pub_b = &backward.canonical[&key];
        assert_eq!(pub_f.contributions.len(), 3);
        assert_eq!(pub_f.title, "Foo");
        assert_eq!(pub_b.title, "Foo");
    }

    #[test]
    fn test_title_year_fallback_is_exact() {
        let a = record(Source::Scopus, "S:1", None, "Foo Bar", "Article");
        let b = record(Source::Wos, "W:1", None, "FOO  BAR!", "Article");
        let c = record(Source::Zenodo, "Z:1", None, "Foo Baz", "dataset");

        let outcome = engine().merge(vec![a, b, c]);
        assert_eq!(outcome.canonical.len(), 2);
        let key = IdentityKey::TitleYear {
            title: "foo bar".to_string(),
            year: 2024,
        };
        assert_eq!(outcome.canonical[&key].contributions.len(), 2);
    }

    #[test]
    fn test_title_year_needs_same_year() {
        let a = record(Source::Scopus, "S:1", None, "Foo Bar", "Article");
        let mut b = record(Source::Wos, "W:1", None, "Foo Bar", "Article");
        b.pubyear = 2023;
        assert_eq!(engine().merge(vec![a, b]).canonical.len(), 2);
    }

    #[test]
    fn test_doi_record_absorbs_doiless_title_match() {
        let a = record(Source::Zenodo, "Z:1", None, "Foo Bar", "dataset");
        let b = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo Bar", "Article");
        let outcome = engine().merge(vec![a, b]);
        assert_eq!(outcome.canonical.len(), 1);
        let publication = outcome.canonical.values().next().unwrap();
        assert_eq!(publication.key, IdentityKey::Doi("10.1/x".to_string()));
        assert_eq!(publication.doi.as_deref(), Some("10.1/x"));
    }

    #[test]
    fn test_doiless_record_joins_earliest_doi_cluster() {
        let x = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo Bar", "Article");
        let y = record(Source::Wos, "W:1", Some("10.1/y"), "Foo Bar", "Article");
        let bare = record(Source::Zenodo, "Z:1", None, "Foo Bar", "dataset");

        let doiless_owner = |records: Vec<SourceRecord>| {
            let outcome = engine().merge(records);
            assert_eq!(outcome.canonical.len(), 2);
            outcome
                .canonical
                .values()
                .find(|p| p.contributions.iter().any(|c| c.source == Source::Zenodo))
                .map(|p| p.key.clone())
                .unwrap()
        };
        assert_eq!(
            doiless_owner(vec![x.clone(), y.clone(), bare.clone()]),
            IdentityKey::Doi("10.1/x".to_string())
        );
        assert_eq!(doiless_owner(vec![y, x, bare]), IdentityKey::Doi("10.1/y".to_string()));
    }

    #[test]
    fn test_punctuation_only_titles_do_not_collapse() {
        let a = record(Source::Zenodo, "Z:1", None, "???", "dataset");
        let b = record(Source::Zenodo, "Z:2", None, "<b>!!</b>", "dataset");
        let outcome = engine().merge(vec![a, b]);
        assert!(outcome.canonical.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().all(|f| f.kind() == "malformed_source_record"));
    }

    #[test]
    fn test_different_dois_never_merge() {
        let a = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo Bar", "Article");
        let b = record(Source::Wos, "W:1", Some("10.1/y"), "Foo Bar", "Article");
        assert_eq!(engine().merge(vec![a, b]).canonical.len(), 2);
    }

    #[test]
    fn test_source_preference_conflict_follows_configuration() {
        let a = record(Source::Scopus, "S:1", Some("10.1/x"), "Scopus Title", "Article");
        let b = record(Source::Wos, "W:1", Some("10.1/x"), "WoS Title", "Review");

        let default = engine().merge(vec![a.clone(), b.clone()]);
        let publication = default.canonical.values().next().unwrap();
        assert_eq!(publication.title, "Scopus Title");
        assert_eq!(publication.doctype.as_deref(), Some("Article"));

        let preference = SourcePreference {
            title: vec![Source::Wos, Source::Scopus],
            doctype: vec![Source::Wos],
            ..Default::default()
        };
        let custom = DedupEngine::new(preference, DoctypeMapping::default()).merge(vec![a, b]);
        let publication = custom.canonical.values().next().unwrap();
        assert_eq!(publication.title, "WoS Title");
        assert_eq!(publication.doctype.as_deref(), Some("Review"));
    }

    #[test]
    fn test_unmapped_contributor_gets_note() {
        let a = record(Source::Scopus, "S:1", Some("10.1/abc"), "Foo Bar", "Conference Paper");
        let b = record(Source::Wos, "W:1", Some("10.1/abc"), "FOO BAR", "Article");
        let outcome = engine().merge(vec![a, b]);

        let publication = outcome.canonical.values().next().unwrap();
        assert_eq!(publication.ifs3_doctype.as_deref(), Some("Journal articles"));
        let scopus = &publication.contributions[0];
        assert!(scopus.note.as_deref().unwrap().starts_with("UnmappedDoctypeError"));
        assert!(publication.contributions[1].note.is_none());
    }

    #[test]
    fn test_no_mappable_doctype_is_rejected() {
        let a = record(Source::Crossref, "C:1", None, "Foo Bar", "journal-article");
        let outcome = engine().merge(vec![a]);
        assert!(outcome.canonical.is_empty());
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::UnmappableDoctype);
    }

    #[test]
    fn test_duplicate_source_ids_excluded_entirely() {
        let a = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo", "Article");
        let b = record(Source::Scopus, "S:1", Some("10.1/y"), "Bar", "Article");
        let c = record(Source::Wos, "S:1", Some("10.1/z"), "Baz", "Article");
        let outcome = engine().merge(vec![a, b, c]);

        assert_eq!(outcome.canonical.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].kind(), "duplicate_source_record");
    }

    #[test]
    fn test_malformed_records_excluded() {
        let mut a = record(Source::Scopus, "S:1", None, "Foo", "Article");
        a.title = " ".to_string();
        let outcome = engine().merge(vec![a]);
        assert!(outcome.canonical.is_empty());
        assert_eq!(outcome.failures[0].kind(), "malformed_source_record");
    }

    #[test]
    fn test_author_union_by_cleaned_name() {
        let mut a = record(Source::Wos, "W:1", Some("10.1/x"), "Foo", "Article");
        a.authors = vec![mention("Müller, Jürgen"), mention("Smith, Anna")];
        let mut b = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo", "Article");
        let mut muller = mention("MULLER, JURGEN");
        muller.orcid = Some("0000-0001".to_string());
        muller.raw_affiliations = vec!["EPFL".to_string()];
        b.authors = vec![muller, mention("")];

        let outcome = engine().merge(vec![a, b]);
        let authors = &outcome.canonical.values().next().unwrap().authors;
        // Scopus ranks first for authors
        assert_eq!(authors.len(), 3);
        assert_eq!(authors[0].source, Source::Scopus);
        assert_eq!(authors[0].mention.display_name, "MULLER, JURGEN");
        assert_eq!(authors[2].mention.display_name, "Smith, Anna");
        assert_eq!(authors[2].position, 2);

        let mut a = record(Source::Wos, "W:1", Some("10.1/x"), "Foo", "Article");
        let mut with_id = mention("Doe, J");
        with_id.internal_author_id = Some("57000".to_string());
        with_id.raw_affiliations = vec!["Lausanne".to_string()];
        a.authors = vec![with_id];
        let mut b = record(Source::Scopus, "S:1", Some("10.1/x"), "Foo", "Article");
        b.authors = vec![mention("doe j")];
        let outcome = engine().merge(vec![a, b]);
        let authors = &outcome.canonical.values().next().unwrap().authors;
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].mention.internal_author_id.as_deref(), Some("57000"));
        assert_eq!(authors[0].mention.raw_affiliations, vec!["Lausanne"]);
    }

    struct FailingCatalog;

    #[async_trait]
    impl Catalog for FailingCatalog {
        async fn find_by_doi(&self, _doi: &str) -> Result<Option<CatalogRef>> {
            Err(ImportError::Api {
                code: 503,
                message: "down".to_string(),
            })
        }

        async fn find_by_title_year(&self, _title: &str, _year: i32) -> Result<Option<CatalogRef>> {
            Ok(Some(CatalogRef { id: "never".to_string() }))
        }
    }

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_rows(vec![
            SnapshotRow {
                ref_id: "by-doi".to_string(),
                doi: Some("10.1/abc".to_string()),
                title: "An unrelated catalog title".to_string(),
                pubyear: 2019,
            },
            SnapshotRow {
                ref_id: "by-title".to_string(),
                doi: None,
                title: "Known Work".to_string(),
                pubyear: 2024,
            },
        ])
    }

    #[tokio::test]
    async fn test_catalog_doi_match_rejects_despite_title() {
        let merged = engine().merge(vec![
            record(Source::Scopus, "S:1", Some("10.1/ABC"), "Foo Bar", "Article"),
            record(Source::Scopus, "S:2", None, "Known work", "Article"),
            record(Source::Scopus, "S:3", None, "New work", "Article"),
        ]);
        let outcome = filter_catalogued(merged.canonical, &catalog(), 2).await;

        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        let by_doi = outcome
            .rejected
            .iter()
            .find(|r| r.publication.doi.is_some())
            .unwrap();
        assert_eq!(
            by_doi.reason,
            RejectionReason::Duplicate {
                matched_by: MatchedBy::Doi,
                catalog_ref: CatalogRef { id: "by-doi".to_string() }
            }
        );
        assert!(outcome
            .rejected
            .iter()
            .any(|r| r.reason.label() == "matched_by:title_year"));
    }

    #[tokio::test]
    async fn test_catalog_pass_is_idempotent() {
        let merged = engine().merge(vec![
            record(Source::Scopus, "S:1", Some("10.1/abc"), "Foo", "Article"),
            record(Source::Scopus, "S:2", None, "Known work", "Article"),
            record(Source::Scopus, "S:3", None, "New work", "Article"),
        ]);
        let catalog = catalog();
        let first = filter_catalogued(merged.canonical.clone(), &catalog, 4).await;
        let second = filter_catalogued(merged.canonical, &catalog, 1).await;

        assert_eq!(first.rejected.len(), 2);
        assert_eq!(first.rejected, second.rejected);
        assert_eq!(first.kept, second.kept);
        let labels: Vec<String> = first.rejected.iter().map(|r| r.reason.label()).collect();
        assert!(labels.contains(&"matched_by:doi".to_string()));
        assert!(labels.contains(&"matched_by:title_year".to_string()));
    }

    #[tokio::test]
    async fn test_catalog_errors_fail_open() {
        let merged = engine().merge(vec![record(Source::Scopus, "S:1", Some("10.1/abc"), "Foo", "Article")]);
        let outcome = filter_catalogued(merged.canonical, &FailingCatalog, 1).await;
        assert_eq!(outcome.kept.len(), 1);
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
