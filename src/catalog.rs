//! Lookups against the existing Infoscience catalog.
//!
//! Two implementations of [`Catalog`]: [`DspaceCatalog`] queries the DSpace-CRIS
//! discover endpoint, [`CatalogSnapshot`] answers from a CSV export held in
//! memory. Both match titles on the normalized form only, so a partial or
//! fuzzy hit never counts as a duplicate.

use crate::config::CatalogConfig;
use crate::error::{ImportError, Result};
use crate::model::CatalogRef;
use crate::normalize::{normalize_doi, normalize_title};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Number of candidates inspected for a title + year search
const TITLE_SEARCH_SIZE: usize = 10;

/// Existing-catalog lookups used by the catalog-dedup pass
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Find an item carrying this (normalized) DOI
    async fn find_by_doi(&self, doi: &str) -> Result<Option<CatalogRef>>;

    /// Find an item whose normalized title and publication year both match
    async fn find_by_title_year(&self, title: &str, year: i32) -> Result<Option<CatalogRef>>;
}

// ============================================================================
// DSpace-CRIS discover search
// ============================================================================

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<DiscoverEmbedded>,
}

#[derive(Debug, Deserialize)]
struct DiscoverEmbedded {
    #[serde(rename = "searchResult")]
    search_result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "_embedded")]
    embedded: Option<SearchObjects>,
}

#[derive(Debug, Deserialize)]
struct SearchObjects {
    #[serde(default)]
    objects: Vec<SearchObject>,
}

#[derive(Debug, Deserialize)]
struct SearchObject {
    #[serde(rename = "_embedded")]
    embedded: IndexableObjectWrapper,
}

#[derive(Debug, Deserialize)]
struct IndexableObjectWrapper {
    #[serde(rename = "indexableObject")]
    indexable_object: IndexableObject,
}

#[derive(Debug, Deserialize)]
struct IndexableObject {
    uuid: String,
    #[serde(default)]
    metadata: HashMap<String, Vec<MetadataValue>>,
}

#[derive(Debug, Deserialize)]
struct MetadataValue {
    value: Option<String>,
}

impl IndexableObject {
    fn first_value(&self, field: &str) -> Option<&str> {
        self.metadata
            .get(field)
            .and_then(|values| values.first())
            .and_then(|v| v.value.as_deref())
    }

    fn issued_year(&self) -> Option<i32> {
        self.first_value("dc.date.issued")
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }
}

impl DiscoverResponse {
    fn into_objects(self) -> Vec<IndexableObject> {
        self.embedded
            .and_then(|e| e.search_result.embedded)
            .map(|o| o.objects.into_iter().map(|o| o.embedded.indexable_object).collect())
            .unwrap_or_default()
    }
}

/// Catalog backed by the DSpace-CRIS REST discover endpoint
pub struct DspaceCatalog {
    client: reqwest::Client,
    base_url: String,
    configuration: String,
}

impl DspaceCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("infoscience-import/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            configuration: config.search_configuration.clone(),
        })
    }

    async fn search(&self, query: &str, size: usize) -> Result<Vec<IndexableObject>> {
        let url = format!("{}/discover/search/objects", self.base_url);
        let size = size.to_string();
        debug!(query = query, "Searching catalog");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("configuration", self.configuration.as_str()),
                ("dsoType", "item"),
                ("page", "0"),
                ("size", size.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ImportError::Api {
                code: response.status().as_u16() as i32,
                message: format!("DSpace discover error: {}", response.status()),
            });
        }

        let body: DiscoverResponse = response
            .json()
            .await
            .map_err(|e| ImportError::Parse(format!("Failed to parse discover response: {}", e)))?;
        Ok(body.into_objects())
    }
}

#[async_trait]
impl Catalog for DspaceCatalog {
    async fn find_by_doi(&self, doi: &str) -> Result<Option<CatalogRef>> {
        let query = format!("itemidentifier_keyword:\"{}\"", doi.replace('"', ""));
        let objects = self.search(&query, 1).await?;
        Ok(objects.into_iter().next().map(|o| CatalogRef { id: o.uuid }))
    }

    async fn find_by_title_year(&self, title: &str, year: i32) -> Result<Option<CatalogRef>> {
        let wanted = normalize_title(title);
        if wanted.is_empty() {
            return Ok(None);
        }
        let query = format!("title:({}) AND dateIssued.year:{}", wanted, year);
        let objects = self.search(&query, TITLE_SEARCH_SIZE).await?;

        let hit = objects.into_iter().find(|o| {
            o.issued_year() == Some(year)
                && o.first_value("dc.title").map(normalize_title).as_deref() == Some(wanted.as_str())
        });
        Ok(hit.map(|o| CatalogRef { id: o.uuid }))
    }
}

// ============================================================================
// In-memory snapshot
// ============================================================================

/// One row of a catalog export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub ref_id: String,
    #[serde(default)]
    pub doi: Option<String>,
    pub title: String,
    pub pubyear: i32,
}

/// Catalog answered from an exported list of existing items
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    by_doi: HashMap<String, String>,
    by_title_year: HashMap<(String, i32), String>,
}

impl CatalogSnapshot {
    pub fn from_rows(rows: impl IntoIterator<Item = SnapshotRow>) -> Self {
        let mut snapshot = Self::default();
        for row in rows {
            if let Some(doi) = row.doi.as_deref().and_then(normalize_doi) {
                snapshot.by_doi.entry(doi).or_insert_with(|| row.ref_id.clone());
            }
            let title = normalize_title(&row.title);
            if !title.is_empty() {
                snapshot.by_title_year.entry((title, row.pubyear)).or_insert(row.ref_id);
            }
        }
        snapshot
    }

    /// Load a CSV export with columns `ref_id,doi,title,pubyear`
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize::<SnapshotRow>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(path = %path.display(), items = rows.len(), "Loaded catalog snapshot");
        Ok(Self::from_rows(rows))
    }

    pub fn len(&self) -> usize {
        self.by_title_year.len().max(self.by_doi.len())
    }

    pub fn is_empty(&self) -> bool {
        self.by_doi.is_empty() && self.by_title_year.is_empty()
    }
}

#[async_trait]
impl Catalog for CatalogSnapshot {
    async fn find_by_doi(&self, doi: &str) -> Result<Option<CatalogRef>> {
        Ok(normalize_doi(doi)
            .and_then(|doi| self.by_doi.get(&doi))
            .map(|id| CatalogRef { id: id.clone() }))
    }

    async fn find_by_title_year(&self, title: &str, year: i32) -> Result<Option<CatalogRef>> {
        let wanted = normalize_title(title);
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(self
            .by_title_year
            .get(&(wanted, year))
            .map(|id| CatalogRef { id: id.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CatalogSnapshot {
        CatalogSnapshot::from_rows(vec![
            SnapshotRow {
                ref_id: "item-1".to_string(),
                doi: Some("https://doi.org/10.1/ABC".to_string()),
                title: "Old Title".to_string(),
                pubyear: 2020,
            },
            SnapshotRow {
                ref_id: "item-2".to_string(),
                doi: None,
                title: "Graphene: a Review".to_string(),
                pubyear: 2023,
            },
        ])
    }

    #[tokio::test]
    async fn test_snapshot_doi_lookup_is_normalized() {
        let snapshot = snapshot();
        let hit = snapshot.find_by_doi("10.1/abc").await.unwrap();
        assert_eq!(hit, Some(CatalogRef { id: "item-1".to_string() }));
        assert!(snapshot.find_by_doi("10.1/abd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_title_year_requires_exact_normalized_title() {
        let snapshot = snapshot();
        assert!(snapshot.find_by_title_year("GRAPHENE - a review", 2023).await.unwrap().is_some());
        assert!(snapshot.find_by_title_year("Graphene: a Review", 2022).await.unwrap().is_none());
        assert!(snapshot.find_by_title_year("Graphene: a Reviews", 2023).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_never_matches_an_empty_title() {
        let snapshot = CatalogSnapshot::from_rows(vec![SnapshotRow {
            ref_id: "item-3".to_string(),
            doi: None,
            title: "???".to_string(),
            pubyear: 2024,
        }]);
        assert!(snapshot.find_by_title_year("!!!", 2024).await.unwrap().is_none());
        assert!(snapshot.find_by_title_year("<b>?</b>", 2024).await.unwrap().is_none());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(&path, "ref_id,doi,title,pubyear\nu1,10.5/X,Some Title,2021\nu2,,Other,2020\n").unwrap();
        let snapshot = CatalogSnapshot::from_csv_path(&path).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_discover_response_parsing() {
        let body = serde_json::json!({
            "_embedded": {"searchResult": {"_embedded": {"objects": [
                {"_embedded": {"indexableObject": {
                    "uuid": "abc-123",
                    "metadata": {
                        "dc.title": [{"value": "Foo Bar"}],
                        "dc.date.issued": [{"value": "2024-03-01"}]
                    }
                }}}
            ]}}}
        });
        let parsed: DiscoverResponse = serde_json::from_value(body).unwrap();
        let objects = parsed.into_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].issued_year(), Some(2024));
        assert_eq!(objects[0].first_value("dc.title"), Some("Foo Bar"));

        let empty: DiscoverResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.into_objects().is_empty());
    }
}
