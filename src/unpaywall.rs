//! Unpaywall client.

use crate::config::OpenAccessConfig;
use crate::error::{ImportError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One hosting location of a work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaLocation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_for_pdf: Option<String>,
    #[serde(default)]
    pub url_for_landing_page: Option<String>,
    /// `publishedVersion`, `acceptedVersion` or `submittedVersion`
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub host_type: Option<String>,
}

/// OA metadata of one DOI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaRecord {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub is_oa: bool,
    #[serde(default)]
    pub oa_status: Option<String>,
    #[serde(default)]
    pub best_oa_location: Option<OaLocation>,
    #[serde(default)]
    pub oa_locations: Vec<OaLocation>,
}

impl OaRecord {
    /// Every location, falling back to the best one when the list is absent
    pub fn locations(&self) -> Vec<&OaLocation> {
        if self.oa_locations.is_empty() {
            self.best_oa_location.iter().collect()
        } else {
            self.oa_locations.iter().collect()
        }
    }
}

/// OA-metadata lookups
#[async_trait]
pub trait OaService: Send + Sync {
    /// `Ok(None)` when the service does not know the DOI
    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<OaRecord>>;
}

/// Client for api.unpaywall.org
pub struct UnpaywallClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
}

impl UnpaywallClient {
    pub fn new(config: &OpenAccessConfig) -> Result<Self> {
        if config.email.trim().is_empty() {
            return Err(ImportError::Config("Unpaywall requires a contact email".to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(format!("infoscience-import/0.1 (mailto:{})", config.email))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
        })
    }
}

#[async_trait]
impl OaService for UnpaywallClient {
    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<OaRecord>> {
        let url = format!("{}/{}", self.base_url, doi);
        let response = self
            .client
            .get(&url)
            .query(&[("email", self.email.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(doi = doi, "DOI unknown to Unpaywall");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ImportError::Api {
                code: response.status().as_u16() as i32,
                message: format!("Unpaywall error: {}", response.status()),
            });
        }

        let record: OaRecord = response
            .json()
            .await
            .map_err(|e| ImportError::Parse(format!("Failed to parse Unpaywall record: {}", e)))?;
        Ok(Some(record))
    }
}
