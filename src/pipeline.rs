//! One batch run: dedup, author reconciliation and OA enrichment.
//!
//! Every step writes its checkpoint table into the run folder and adds its
//! section to the [`RunSummary`]. Steps can also start from an earlier run's
//! checkpoint via [`ImportPipeline::load_checkpoint`].

use crate::authors::{collect_authors, AuthorPipeline, ReconciledAuthor, Stage};
use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::dedup::{filter_catalogued, CanonicalSet, DedupEngine};
use crate::directory::PersonDirectory;
use crate::enrich::{enrich, FulltextGate, OaEnrichment};
use crate::error::Result;
use crate::input::load_inputs;
use crate::model::RejectedPublication;
use crate::report::{AuthorSummary, DedupSummary, OaSummary, RunSummary, SUMMARY_FILE};
use crate::tables::{self, AUTHORS_FILE, OPEN_ACCESS_FILE, PUBLICATIONS_FILE, RECONCILED_AUTHORS_FILE, REJECTED_FILE};
use crate::unpaywall::OaService;
use std::path::{Path, PathBuf};
use tracing::info;

/// Output of the dedup step
#[derive(Debug, Default)]
pub struct DedupResult {
    pub canonical: CanonicalSet,
    /// Unmappable publications first, then catalog duplicates
    pub rejected: Vec<RejectedPublication>,
}

pub struct ImportPipeline {
    config: PipelineConfig,
    output_folder: PathBuf,
    summary: RunSummary,
}

impl ImportPipeline {
    /// Create the run folder if needed
    pub fn new(config: PipelineConfig, output_folder: impl Into<PathBuf>) -> Result<Self> {
        let output_folder = output_folder.into();
        std::fs::create_dir_all(&output_folder)?;
        Ok(Self {
            config,
            output_folder,
            summary: RunSummary::start(),
        })
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Rebuild the canonical set from the `Publications.csv` and `Authors.csv`
    /// of a previous run folder
    pub fn load_checkpoint(&self, folder: &Path) -> Result<CanonicalSet> {
        tables::read_canonical_set(&folder.join(PUBLICATIONS_FILE), &folder.join(AUTHORS_FILE))
    }

    /// Load, merge and catalog-filter the source records, then write
    /// `Publications.csv`, `Rejected.csv` and `Authors.csv`
    pub async fn dedup<C, P>(&mut self, inputs: &[P], catalog: &C) -> Result<DedupResult>
    where
        C: Catalog + ?Sized,
        P: AsRef<Path>,
    {
        let loaded = load_inputs(inputs)?;
        let mut summary = DedupSummary::from_inputs(&loaded.records, &loaded.malformed);

        let engine = DedupEngine::new(self.config.source_preference.clone(), self.config.doctype_mapping()?);
        let merge = engine.merge(loaded.records);
        summary.record_merge(&merge);

        let catalog_outcome = filter_catalogued(merge.canonical, catalog, self.config.catalog.concurrency).await;
        summary.record_catalog(&catalog_outcome);

        let mut rejected = merge.rejected;
        rejected.extend(catalog_outcome.rejected);
        let result = DedupResult {
            canonical: catalog_outcome.kept,
            rejected,
        };

        tables::write_publications(&self.output_folder.join(PUBLICATIONS_FILE), &result.canonical)?;
        tables::write_rejected(&self.output_folder.join(REJECTED_FILE), &result.rejected)?;
        tables::write_authors(&self.output_folder.join(AUTHORS_FILE), &result.canonical)?;

        info!(
            canonical = result.canonical.len(),
            rejected = result.rejected.len(),
            "Dedup complete"
        );
        self.summary.dedup = Some(summary);
        Ok(result)
    }

    /// Run author stages up to `until` and write `ReconciledAuthors.csv`
    pub async fn authors<D: PersonDirectory + ?Sized>(
        &mut self,
        canonical: &CanonicalSet,
        directory: &D,
        until: Stage,
    ) -> Result<Vec<ReconciledAuthor>> {
        let pipeline = AuthorPipeline::new(&self.config.affiliation, &self.config.directory, directory)?;
        let authors = pipeline.run_until(collect_authors(canonical), until).await;

        tables::write_reconciled_authors(&self.output_folder.join(RECONCILED_AUTHORS_FILE), &authors)?;
        let summary = AuthorSummary::new(&authors);
        info!(
            until = %until,
            authors = summary.total,
            epfl = summary.epfl,
            resolved = summary.resolved(),
            "Author reconciliation complete"
        );
        self.summary.authors = Some(summary);
        Ok(authors)
    }

    /// OA enrichment of every publication, written to `OpenAccess.csv`
    pub async fn enrich<S: OaService + ?Sized>(
        &mut self,
        canonical: &CanonicalSet,
        service: &S,
    ) -> Result<Vec<OaEnrichment>> {
        let gate = FulltextGate::new(&self.config.open_access);
        let enrichments = enrich(canonical, service, &gate, self.config.open_access.concurrency).await;

        tables::write_open_access(&self.output_folder.join(OPEN_ACCESS_FILE), &enrichments)?;
        self.summary.open_access = Some(OaSummary::new(&enrichments));
        Ok(enrichments)
    }

    /// Stamp and write `summary.json`
    pub fn finish(mut self) -> Result<RunSummary> {
        self.summary.finish();
        self.summary.save(&self.output_folder.join(SUMMARY_FILE))?;
        Ok(self.summary)
    }
}
