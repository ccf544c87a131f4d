//! # infoscience-import
//!
//! Deduplication and reconciliation core of the Infoscience import pipeline
//!
//! ## Modules
//!
//! - [`input`] - JSON Lines source records
//! - [`dedup`] - Cross-source merge and catalog filtering
//! - [`catalog`] - Existing-catalog lookups (DSpace-CRIS, CSV snapshot)
//! - [`mappings`] - Source doctype to Infoscience collection table
//! - [`authors`] - EPFL author and affiliation reconciliation stages
//! - [`directory`] - EPFL person/unit directory client
//! - [`enrich`] - Open-access enrichment and full-text gate
//! - [`unpaywall`] - Unpaywall client
//! - [`tables`] - CSV checkpoint tables
//! - [`report`] - Run summary
//! - [`pipeline`] - One batch run
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use infoscience_import::catalog::CatalogSnapshot;
//! use infoscience_import::config::PipelineConfig;
//! use infoscience_import::pipeline::ImportPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut pipeline = ImportPipeline::new(PipelineConfig::default(), "./output/run")?;
//!     let result = pipeline.dedup(&["scopus.jsonl", "wos.jsonl"], &CatalogSnapshot::default()).await?;
//!     println!("{} publications to import", result.canonical.len());
//!     pipeline.finish()?;
//!     Ok(())
//! }
//! ```

pub mod authors;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod directory;
pub mod enrich;
pub mod error;
pub mod input;
pub mod mappings;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod tables;
pub mod unpaywall;

pub use error::{ImportError, Result};
