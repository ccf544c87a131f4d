//! EPFL person/unit directory.
//!
//! [`PersonDirectory`] is the seam the author engine talks to,
//! [`EpflDirectoryClient`] implements it over api.epfl.ch and
//! [`CachedDirectory`] memoizes any implementation for the length of a run.

use crate::cache::LookupCache;
use crate::config::DirectoryConfig;
use crate::error::{ImportError, OptionExt, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// A person search
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PersonQuery {
    /// Separate firstname and lastname fields
    Structured { firstname: String, lastname: String },
    /// One free-text name
    Combined(String),
}

impl fmt::Display for PersonQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonQuery::Structured { firstname, lastname } => write!(f, "{}, {}", lastname, firstname),
            PersonQuery::Combined(name) => f.write_str(name),
        }
    }
}

/// A directory person (the id is the SCIPER number)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdentity {
    pub person_id: String,
    pub firstname: String,
    pub lastname: String,
}

/// One accreditation of a person in a unit; rank 1 is the main one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitAffiliation {
    pub unit_id: String,
    pub unit_name: String,
    pub rank: u32,
}

/// Person and unit lookups
#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn search_person(&self, query: &PersonQuery) -> Result<Vec<PersonIdentity>>;

    /// Units of a person, ordered by rank
    async fn fetch_units(&self, person_id: &str) -> Result<Vec<UnitAffiliation>>;

    /// Type label of a unit (e.g. "Laboratoire"), `None` when it has none
    async fn fetch_unit_type(&self, unit_id: &str) -> Result<Option<String>>;
}

// ============================================================================
// api.epfl.ch
// ============================================================================

#[derive(Debug, Deserialize)]
struct PersonsResponse {
    #[serde(default)]
    persons: Vec<PersonRecord>,
}

#[derive(Debug, Deserialize)]
struct PersonRecord {
    id: Value,
    #[serde(default)]
    firstname: String,
    #[serde(default)]
    lastname: String,
}

#[derive(Debug, Deserialize)]
struct AccredsResponse {
    #[serde(default)]
    accreds: Vec<AccredRecord>,
}

#[derive(Debug, Deserialize)]
struct AccredRecord {
    order: Option<u32>,
    unit: AccredUnit,
}

#[derive(Debug, Deserialize)]
struct AccredUnit {
    id: Value,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct UnitResponse {
    unittype: Option<UnitType>,
}

#[derive(Debug, Deserialize)]
struct UnitType {
    label: Option<String>,
}

/// Ids come back as numbers or strings depending on the endpoint
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Client for the EPFL directory API (HTTP basic auth)
pub struct EpflDirectoryClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl EpflDirectoryClient {
    pub fn new(config: &DirectoryConfig, username: Option<String>, password: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("infoscience-import/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ImportError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    /// GET a path; `Ok(None)` on 404
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(path = path, "Directory entry not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ImportError::Api {
                code: response.status().as_u16() as i32,
                message: format!("EPFL API error on {}: {}", path, response.status()),
            });
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| ImportError::Parse(format!("Failed to parse {} response: {}", path, e)))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl PersonDirectory for EpflDirectoryClient {
    async fn search_person(&self, query: &PersonQuery) -> Result<Vec<PersonIdentity>> {
        let response: Option<PersonsResponse> = match query {
            PersonQuery::Structured { firstname, lastname } => {
                self.get_json("persons", &[("firstname", firstname.as_str()), ("lastname", lastname.as_str())])
                    .await?
            }
            PersonQuery::Combined(name) => self.get_json("persons", &[("query", name.as_str())]).await?,
        };

        let persons = response.map(|r| r.persons).unwrap_or_default();
        debug!(query = %query, hits = persons.len(), "Person search");
        persons
            .into_iter()
            .map(|p| {
                Ok(PersonIdentity {
                    person_id: id_string(&p.id).ok_or_parse("Person record without id")?,
                    firstname: p.firstname,
                    lastname: p.lastname,
                })
            })
            .collect()
    }

    async fn fetch_units(&self, person_id: &str) -> Result<Vec<UnitAffiliation>> {
        let response: Option<AccredsResponse> = self.get_json("accreds", &[("persid", person_id)]).await?;
        let accreds = response.map(|r| r.accreds).unwrap_or_default();

        let mut units = accreds
            .into_iter()
            .enumerate()
            .map(|(i, a)| {
                Ok(UnitAffiliation {
                    unit_id: id_string(&a.unit.id).ok_or_parse("Accreditation without unit id")?,
                    unit_name: a.unit.name,
                    rank: a.order.unwrap_or(i as u32 + 1),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        units.sort_by_key(|u| u.rank);
        Ok(units)
    }

    async fn fetch_unit_type(&self, unit_id: &str) -> Result<Option<String>> {
        let path = format!("units/{}", urlencoding::encode(unit_id));
        let response: Option<UnitResponse> = self.get_json(&path, &[]).await?;
        Ok(response
            .and_then(|r| r.unittype)
            .and_then(|t| t.label)
            .filter(|label| !label.trim().is_empty()))
    }
}

// ============================================================================
// Caching decorator
// ============================================================================

/// Wraps a directory with per-run caches for each key space
pub struct CachedDirectory<D> {
    inner: D,
    persons: LookupCache<PersonQuery, Vec<PersonIdentity>>,
    units: LookupCache<String, Vec<UnitAffiliation>>,
    unit_types: LookupCache<String, Option<String>>,
}

impl<D: PersonDirectory> CachedDirectory<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            persons: LookupCache::new("persons"),
            units: LookupCache::new("units"),
            unit_types: LookupCache::new("unit_types"),
        }
    }

    pub fn log_stats(&self) {
        let (person_hits, person_misses) = self.persons.stats();
        let (unit_hits, unit_misses) = self.units.stats();
        let (type_hits, type_misses) = self.unit_types.stats();
        info!(
            person_hits,
            person_misses, unit_hits, unit_misses, type_hits, type_misses, "Directory cache usage"
        );
    }
}

#[async_trait]
impl<D: PersonDirectory> PersonDirectory for CachedDirectory<D> {
    async fn search_person(&self, query: &PersonQuery) -> Result<Vec<PersonIdentity>> {
        self.persons
            .get_or_fetch(query.clone(), || self.inner.search_person(query))
            .await
    }

    async fn fetch_units(&self, person_id: &str) -> Result<Vec<UnitAffiliation>> {
        self.units
            .get_or_fetch(person_id.to_string(), || self.inner.fetch_units(person_id))
            .await
    }

    async fn fetch_unit_type(&self, unit_id: &str) -> Result<Option<String>> {
        self.unit_types
            .get_or_fetch(unit_id.to_string(), || self.inner.fetch_unit_type(unit_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDirectory {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl PersonDirectory for CountingDirectory {
        async fn search_person(&self, query: &PersonQuery) -> Result<Vec<PersonIdentity>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            match query {
                PersonQuery::Combined(name) if name == "boom" => Err(ImportError::Api {
                    code: 500,
                    message: "boom".to_string(),
                }),
                _ => Ok(vec![PersonIdentity {
                    person_id: "100001".to_string(),
                    firstname: "Ada".to_string(),
                    lastname: "Lovelace".to_string(),
                }]),
            }
        }

        async fn fetch_units(&self, _person_id: &str) -> Result<Vec<UnitAffiliation>> {
            Ok(vec![])
        }

        async fn fetch_unit_type(&self, _unit_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_cached_directory_memoizes_successes_only() {
        let directory = CachedDirectory::new(CountingDirectory {
            searches: AtomicUsize::new(0),
        });
        let query = PersonQuery::Structured {
            firstname: "Ada".to_string(),
            lastname: "Lovelace".to_string(),
        };
        directory.search_person(&query).await.unwrap();
        directory.search_person(&query).await.unwrap();
        assert_eq!(directory.inner.searches.load(Ordering::SeqCst), 1);

        let failing = PersonQuery::Combined("boom".to_string());
        assert!(directory.search_person(&failing).await.is_err());
        assert!(directory.search_person(&failing).await.is_err());
        assert_eq!(directory.inner.searches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_id_string_accepts_numbers_and_strings() {
        assert_eq!(id_string(&serde_json::json!(123456)).as_deref(), Some("123456"));
        assert_eq!(id_string(&serde_json::json!(" 42 ")).as_deref(), Some("42"));
        assert_eq!(id_string(&serde_json::json!(null)), None);
    }
}
