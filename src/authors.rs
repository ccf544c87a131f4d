//! Author and affiliation reconciliation.
//!
//! Every author mention of the canonical set becomes one [`ReconciledAuthor`]
//! joined to its publication by `(record_key, position)`. The engine is a
//! chain of stages, each a plain transform over an owned author list:
//!
//! | Stage    | Effect                                                      |
//! |----------|-------------------------------------------------------------|
//! | `Flag`   | decide `epfl_affiliation` from affiliations and known ids   |
//! | `Filter` | keep only EPFL-flagged authors in the working set           |
//! | `Clean`  | normalized `cleaned_name`, `firstname`, `lastname`          |
//! | `Lookup` | directory person search, sets `person_id` + `lookup_status` |
//! | `Units`  | ranked units of the person, laboratory preferred            |
//!
//! [`AuthorPipeline::run_until`] runs any prefix of the chain and always hands
//! back the full author list: authors dropped by `Filter` are carried through
//! untouched.

use crate::config::{AffiliationConfig, DirectoryConfig};
use crate::dedup::CanonicalSet;
use crate::directory::{PersonDirectory, PersonIdentity, PersonQuery, UnitAffiliation};
use crate::error::{ImportError, Result};
use crate::model::{AuthorMention, CanonicalAuthor, Source};
use crate::normalize::strip_diacritics;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const HONORIFICS: &[&str] = &["dr", "prof", "professor", "mr", "mrs", "ms", "sir", "mme", "mlle"];
const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "phd", "md", "esq"];

/// Reconciliation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Flag,
    Filter,
    Clean,
    Lookup,
    Units,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Flag, Stage::Filter, Stage::Clean, Stage::Lookup, Stage::Units];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Flag => "flag",
            Stage::Filter => "filter",
            Stage::Clean => "clean",
            Stage::Lookup => "lookup",
            Stage::Units => "units",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImportError::Parse(format!("Unknown stage: {}", s)))
    }
}

/// Outcome of the directory person search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Resolved,
    NotFound,
    Ambiguous,
    Error,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Resolved => "resolved",
            LookupStatus::NotFound => "not_found",
            LookupStatus::Ambiguous => "ambiguous",
            LookupStatus::Error => "error",
        }
    }
}

/// One author mention and everything learned about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledAuthor {
    pub record_key: String,
    pub position: usize,
    pub source: Source,
    pub internal_id: String,
    pub mention: AuthorMention,
    pub epfl_affiliation: bool,
    pub cleaned_name: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub person_id: Option<String>,
    pub unit_id: Option<String>,
    pub unit_name: Option<String>,
    pub unit_type: Option<String>,
    /// `None` until the lookup stage has run
    pub lookup_status: Option<LookupStatus>,
}

impl ReconciledAuthor {
    pub fn new(record_key: &str, author: &CanonicalAuthor) -> Self {
        Self {
            record_key: record_key.to_string(),
            position: author.position,
            source: author.source,
            internal_id: author.internal_id.clone(),
            mention: author.mention.clone(),
            epfl_affiliation: false,
            cleaned_name: None,
            firstname: None,
            lastname: None,
            person_id: None,
            unit_id: None,
            unit_name: None,
            unit_type: None,
            lookup_status: None,
        }
    }

    pub fn join_key(&self) -> (&str, usize) {
        (&self.record_key, self.position)
    }
}

/// Every author mention of the canonical set, in key then position order
pub fn collect_authors(canonical: &CanonicalSet) -> Vec<ReconciledAuthor> {
    canonical
        .values()
        .flat_map(|publication| {
            let record_key = publication.record_key();
            publication
                .authors
                .iter()
                .map(move |author| ReconciledAuthor::new(&record_key, author))
        })
        .collect()
}

// ============================================================================
// Flag
// ============================================================================

fn normalize_orcid(raw: &str) -> String {
    let raw = raw.trim().to_lowercase();
    raw.rsplit('/').next().unwrap_or(raw.as_str()).to_string()
}

/// Decides whether a mention is affiliated with EPFL
pub struct AffiliationMatcher {
    patterns: Vec<Regex>,
    institution_ids: HashSet<String>,
    known_author_ids: HashSet<String>,
}

impl AffiliationMatcher {
    pub fn new(config: &AffiliationConfig) -> Result<Self> {
        Ok(Self {
            patterns: config.compiled_patterns()?,
            institution_ids: config.institution_ids.iter().map(|id| id.trim().to_string()).collect(),
            known_author_ids: config.known_author_ids.iter().map(|id| normalize_orcid(id)).collect(),
        })
    }

    pub fn is_epfl(&self, mention: &AuthorMention) -> bool {
        let by_text = mention.raw_affiliations.iter().any(|affiliation| {
            let text = strip_diacritics(affiliation).to_lowercase();
            self.patterns.iter().any(|p| p.is_match(&text))
        });
        if by_text {
            return true;
        }

        if mention
            .affiliation_ids
            .iter()
            .any(|id| self.institution_ids.contains(id.trim()))
        {
            return true;
        }

        [&mention.internal_author_id, &mention.orcid]
            .into_iter()
            .flatten()
            .any(|id| self.known_author_ids.contains(&normalize_orcid(id)))
    }
}

/// Set `epfl_affiliation` on every author. Nobody is dropped.
pub fn flag(mut authors: Vec<ReconciledAuthor>, matcher: &AffiliationMatcher) -> Vec<ReconciledAuthor> {
    for author in &mut authors {
        author.epfl_affiliation = matcher.is_epfl(&author.mention);
    }
    let flagged = authors.iter().filter(|a| a.epfl_affiliation).count();
    info!(authors = authors.len(), epfl = flagged, "Flagged EPFL affiliations");
    authors
}

// ============================================================================
// Filter
// ============================================================================

/// Split into `(epfl, others)`, preserving order within each part
pub fn filter_epfl(authors: Vec<ReconciledAuthor>) -> (Vec<ReconciledAuthor>, Vec<ReconciledAuthor>) {
    authors.into_iter().partition(|a| a.epfl_affiliation)
}

// ============================================================================
// Clean
// ============================================================================

/// A display name split into directory search fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedName {
    /// `"Last, First"`, or just `"Last"`
    pub full: String,
    pub firstname: String,
    pub lastname: String,
}

fn is_dash(c: char) -> bool {
    matches!(c, '-' | '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{00AD}')
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '`' | '\u{02BC}' | '\u{00B4}')
}

/// Dashes to spaces, apostrophes removed, punctuation other than commas to spaces
fn scrub(raw: &str) -> String {
    strip_diacritics(raw)
        .chars()
        .filter(|c| !is_apostrophe(*c))
        .map(|c| {
            if c == ',' || c.is_alphanumeric() {
                c
            } else if is_dash(c) || !c.is_whitespace() {
                ' '
            } else {
                c
            }
        })
        .collect()
}

fn matches_word(token: &str, words: &[&str]) -> bool {
    words.iter().any(|w| w.eq_ignore_ascii_case(token))
}

/// Drop leading honorifics and trailing suffixes. With `keep_one` the last
/// remaining token is never dropped.
fn strip_titles(mut tokens: Vec<String>, keep_one: bool) -> Vec<String> {
    let floor = usize::from(keep_one);
    while tokens.len() > floor && matches_word(&tokens[0], HONORIFICS) {
        tokens.remove(0);
    }
    while tokens.len() > floor && tokens.last().is_some_and(|t| matches_word(t, SUFFIXES)) {
        tokens.pop();
    }
    tokens
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a display name into lastname and firstname.
///
/// `"Last, First"` is honoured when both sides survive cleaning; otherwise
/// the final token is the lastname. `clean_name(&clean_name(x).full)` equals
/// `clean_name(x)`.
pub fn clean_name(raw: &str) -> CleanedName {
    let scrubbed = scrub(raw);

    let comma_form = scrubbed.split_once(',').and_then(|(last, first)| {
        let last = strip_titles(tokens(last), true);
        let first = strip_titles(tokens(first), false);
        if last.is_empty() || first.is_empty() {
            None
        } else {
            Some((first.join(" "), last.join(" ")))
        }
    });

    let (firstname, lastname) = comma_form.unwrap_or_else(|| {
        let mut all = strip_titles(tokens(&scrubbed), true);
        let lastname = all.pop().unwrap_or_default();
        (strip_titles(all, false).join(" "), lastname)
    });

    let full = if firstname.is_empty() {
        lastname.clone()
    } else {
        format!("{}, {}", lastname, firstname)
    };

    CleanedName {
        full,
        firstname,
        lastname,
    }
}

/// Fill the cleaned name fields
pub fn clean(mut authors: Vec<ReconciledAuthor>) -> Vec<ReconciledAuthor> {
    for author in &mut authors {
        let cleaned = clean_name(&author.mention.display_name);
        debug!(raw = %author.mention.display_name, cleaned = %cleaned.full, "Cleaned author name");
        author.cleaned_name = Some(cleaned.full);
        author.firstname = Some(cleaned.firstname);
        author.lastname = Some(cleaned.lastname);
    }
    authors
}

// ============================================================================
// Lookup
// ============================================================================

async fn search_once<D: PersonDirectory + ?Sized>(
    directory: &D,
    query: &PersonQuery,
) -> std::result::Result<Vec<PersonIdentity>, ImportError> {
    let hits = directory.search_person(query).await;
    if let Err(e) = &hits {
        warn!(query = %query, error = %e, "Directory search failed");
    }
    hits
}

/// Structured search, then combined-name search. One hit resolves.
pub async fn resolve_person<D: PersonDirectory + ?Sized>(
    directory: &D,
    firstname: &str,
    lastname: &str,
) -> (LookupStatus, Option<PersonIdentity>) {
    let mut ambiguous = false;
    let mut failed = false;

    if !firstname.is_empty() && !lastname.is_empty() {
        let structured = PersonQuery::Structured {
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
        };
        match search_once(directory, &structured).await {
            Ok(mut hits) if hits.len() == 1 => return (LookupStatus::Resolved, hits.pop()),
            Ok(hits) => ambiguous = hits.len() > 1,
            Err(_) => failed = true,
        }
    }

    let combined = [firstname, lastname]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if combined.is_empty() {
        return (LookupStatus::NotFound, None);
    }

    match search_once(directory, &PersonQuery::Combined(combined)).await {
        Ok(mut hits) if hits.len() == 1 => (LookupStatus::Resolved, hits.pop()),
        Ok(hits) if hits.len() > 1 || ambiguous => (LookupStatus::Ambiguous, None),
        Ok(_) if failed => (LookupStatus::Error, None),
        Ok(_) => (LookupStatus::NotFound, None),
        Err(_) => (LookupStatus::Error, None),
    }
}

/// Resolve `person_id` for every author through the directory
pub async fn lookup<D: PersonDirectory + ?Sized>(
    authors: Vec<ReconciledAuthor>,
    directory: &D,
    concurrency: usize,
) -> Vec<ReconciledAuthor> {
    info!(authors = authors.len(), concurrency = concurrency, "Looking up authors in directory");

    let mut results: Vec<(usize, ReconciledAuthor)> = stream::iter(authors.into_iter().enumerate())
        .map(|(idx, mut author)| async move {
            if author.cleaned_name.is_none() {
                let cleaned = clean_name(&author.mention.display_name);
                author.cleaned_name = Some(cleaned.full);
                author.firstname = Some(cleaned.firstname);
                author.lastname = Some(cleaned.lastname);
            }
            let firstname = author.firstname.clone().unwrap_or_default();
            let lastname = author.lastname.clone().unwrap_or_default();
            let (status, person) = resolve_person(directory, &firstname, &lastname).await;
            debug!(name = ?author.cleaned_name, status = status.as_str(), "Directory lookup");
            author.lookup_status = Some(status);
            author.person_id = person.map(|p| p.person_id);
            (idx, author)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(idx, _)| *idx);
    let authors: Vec<_> = results.into_iter().map(|(_, author)| author).collect();
    let resolved = authors.iter().filter(|a| a.person_id.is_some()).count();
    info!(authors = authors.len(), resolved = resolved, "Directory lookup complete");
    authors
}

// ============================================================================
// Units
// ============================================================================

fn laboratory_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(laboratoire|laboratory)\b").unwrap_or_else(|_| Regex::new("$^").expect("Empty regex"))
    })
}

/// A unit is a laboratory when its type is one of `laboratory_types` or its
/// name says so
fn is_laboratory(unit: &UnitAffiliation, unit_type: Option<&str>, laboratory_types: &[String]) -> bool {
    let by_type = unit_type.is_some_and(|t| laboratory_types.iter().any(|lab| lab.eq_ignore_ascii_case(t.trim())));
    by_type || laboratory_name_regex().is_match(&unit.unit_name)
}

/// First laboratory unit by rank, else the first unit by rank.
///
/// A unit whose type cannot be fetched is judged by its name alone.
pub async fn select_unit<D: PersonDirectory + ?Sized>(
    directory: &D,
    person_id: &str,
    laboratory_types: &[String],
) -> Result<Option<(UnitAffiliation, Option<String>)>> {
    let mut units = directory.fetch_units(person_id).await?;
    units.sort_by_key(|u| u.rank);

    let mut first_type: Option<Option<String>> = None;
    for unit in &units {
        let unit_type = match directory.fetch_unit_type(&unit.unit_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(unit_id = %unit.unit_id, error = %e, "Unit type lookup failed");
                None
            }
        };
        if is_laboratory(unit, unit_type.as_deref(), laboratory_types) {
            return Ok(Some((unit.clone(), unit_type)));
        }
        if first_type.is_none() {
            first_type = Some(unit_type);
        }
    }

    Ok(units
        .into_iter()
        .next()
        .map(|unit| (unit, first_type.flatten())))
}

/// Attach the selected unit to every resolved author
pub async fn units<D: PersonDirectory + ?Sized>(
    authors: Vec<ReconciledAuthor>,
    directory: &D,
    laboratory_types: &[String],
    concurrency: usize,
) -> Vec<ReconciledAuthor> {
    let mut results: Vec<(usize, ReconciledAuthor)> = stream::iter(authors.into_iter().enumerate())
        .map(|(idx, mut author)| async move {
            if let Some(person_id) = author.person_id.clone() {
                match select_unit(directory, &person_id, laboratory_types).await {
                    Ok(Some((unit, unit_type))) => {
                        author.unit_id = Some(unit.unit_id);
                        author.unit_name = Some(unit.unit_name);
                        author.unit_type = unit_type;
                    }
                    Ok(None) => debug!(person_id = %person_id, "Person has no units"),
                    Err(e) => warn!(person_id = %person_id, error = %e, "Unit lookup failed"),
                }
            }
            (idx, author)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(idx, _)| *idx);
    let authors: Vec<_> = results.into_iter().map(|(_, author)| author).collect();
    let with_unit = authors.iter().filter(|a| a.unit_id.is_some()).count();
    info!(authors = authors.len(), with_unit = with_unit, "Unit selection complete");
    authors
}

// ============================================================================
// Chain
// ============================================================================

/// The stage chain bound to its collaborators
pub struct AuthorPipeline<'a, D: PersonDirectory + ?Sized> {
    matcher: AffiliationMatcher,
    directory: &'a D,
    laboratory_types: Vec<String>,
    concurrency: usize,
}

impl<'a, D: PersonDirectory + ?Sized> AuthorPipeline<'a, D> {
    pub fn new(affiliation: &AffiliationConfig, directory_config: &DirectoryConfig, directory: &'a D) -> Result<Self> {
        Ok(Self {
            matcher: AffiliationMatcher::new(affiliation)?,
            directory,
            laboratory_types: directory_config.laboratory_unit_types.clone(),
            concurrency: directory_config.concurrency,
        })
    }

    /// Run stages up to and including `until`; returns every input author,
    /// in input order.
    pub async fn run_until(&self, authors: Vec<ReconciledAuthor>, until: Stage) -> Vec<ReconciledAuthor> {
        let authors = flag(authors, &self.matcher);
        if until == Stage::Flag {
            return authors;
        }

        let order: Vec<(String, usize)> = authors
            .iter()
            .map(|a| (a.record_key.clone(), a.position))
            .collect();
        let (mut working, others) = filter_epfl(authors);

        if until >= Stage::Clean {
            working = clean(working);
        }
        if until >= Stage::Lookup {
            working = lookup(working, self.directory, self.concurrency).await;
        }
        if until >= Stage::Units {
            working = units(working, self.directory, &self.laboratory_types, self.concurrency).await;
        }

        overlay(order, working, others)
    }
}

/// Restore the original order after the filtered part was processed
fn overlay(
    order: Vec<(String, usize)>,
    working: Vec<ReconciledAuthor>,
    others: Vec<ReconciledAuthor>,
) -> Vec<ReconciledAuthor> {
    let mut by_key: HashMap<(String, usize), ReconciledAuthor> = working
        .into_iter()
        .chain(others)
        .map(|a| ((a.record_key.clone(), a.position), a))
        .collect();
    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}
