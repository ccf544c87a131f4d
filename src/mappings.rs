//! Source doctype → Infoscience collection lookup table.

use crate::error::{ImportError, Result};
use crate::model::Source;
use std::collections::HashMap;

const JOURNAL_ARTICLES: &str = "Journal articles";
const BOOKS: &str = "Books and Book parts";
const DATASETS: &str = "Datasets and Code";
const CONFERENCES: &str = "Conferences, Workshops, Symposiums, and Seminars";
const REPORTS: &str = "Reports, Documentation, and Standards";
const IMAGES: &str = "Images, Videos, Interactive resources, and Design";

const WOS_DOCTYPES: &[(&str, &str)] = &[
    ("Article", JOURNAL_ARTICLES),
    ("Editorial Material", JOURNAL_ARTICLES),
    ("Letter", JOURNAL_ARTICLES),
    ("Review", JOURNAL_ARTICLES),
];

const SCOPUS_DOCTYPES: &[(&str, &str)] = &[
    ("Article", JOURNAL_ARTICLES),
    ("Article in Press", JOURNAL_ARTICLES),
    ("Data Paper", JOURNAL_ARTICLES),
    ("Editorial", JOURNAL_ARTICLES),
    ("Letter", JOURNAL_ARTICLES),
    ("Review", JOURNAL_ARTICLES),
    ("Business Article", JOURNAL_ARTICLES),
];

const OPENALEX_DOCTYPES: &[(&str, &str)] = &[
    ("article", JOURNAL_ARTICLES),
    ("book", BOOKS),
    ("book-chapter", BOOKS),
    ("dataset", DATASETS),
    ("dissertation", "EPFL thesis"),
    ("editorial", JOURNAL_ARTICLES),
    ("letter", JOURNAL_ARTICLES),
    ("review", JOURNAL_ARTICLES),
    ("report", REPORTS),
    ("standard", REPORTS),
    ("preprint", "Preprints and Working Papers"),
];

const ZENODO_DOCTYPES: &[(&str, &str)] = &[
    ("dataset", DATASETS),
    ("lesson", "Teaching Materials"),
    ("physicalobject", "Other"),
    ("presentation", CONFERENCES),
    ("poster", CONFERENCES),
    ("publication/article", JOURNAL_ARTICLES),
    ("publication/book", BOOKS),
    ("publication/conferencepaper", CONFERENCES),
    ("publication/deliverable", REPORTS),
    ("publication/journal", JOURNAL_ARTICLES),
    ("publication/report", REPORTS),
    ("publication/section", BOOKS),
    ("publication/thesis", "Student works"),
    ("image/diagram", IMAGES),
    ("image/drawing", IMAGES),
    ("image/figure", IMAGES),
    ("image/photo", IMAGES),
    ("image/plot", IMAGES),
    ("image/other", IMAGES),
    ("software", DATASETS),
    ("video", IMAGES),
    ("model", DATASETS),
    ("other", DATASETS),
];

/// Collection name → DSpace collection UUID
const COLLECTIONS: &[(&str, &str)] = &[
    ("Patents", "ce5a1b89-cfb3-40eb-bdd2-dcb021e755b7"),
    ("Teaching Materials", "c7e018d4-2349-46dd-a8a4-c32cf5f5f9a1"),
    (IMAGES, "329f8cd3-dc1a-4228-9557-b27366d71d41"),
    ("Newspaper, Magazine, or Blog post", "971cc7fa-b177-46e3-86a9-cfac93042e9d"),
    ("Other", "0066acb2-d5c0-49a0-b273-581df34961cc"),
    (DATASETS, "33a1cd32-7980-495b-a2bb-f34c478869d8"),
    ("Student works", "305e3dad-f918-48f6-9309-edbeb7cced14"),
    ("EPFL thesis", "4af344ef-0fb2-4593-a234-78d57f3df621"),
    (REPORTS, "d5ec2987-2ee5-4754-971b-aca7ab4f9ab7"),
    ("Preprints and Working Papers", "d8dada3a-c4bd-4c6f-a6d7-13f1b4564fa4"),
    (BOOKS, "1a71fba2-2fc5-4c02-9447-f292e25ce6c1"),
    (CONFERENCES, "e91ecd9f-56a2-4b2f-b7cc-f03e03d2643d"),
    (JOURNAL_ARTICLES, "8a8d3310-6535-4d3a-90b6-2a4428097b5b"),
];

/// A doctype that resolved to a known collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDoctype {
    pub collection_name: String,
    pub collection_id: String,
}

/// Per-source doctype table plus the collection id table
#[derive(Debug, Clone)]
pub struct DoctypeMapping {
    doctypes: HashMap<Source, HashMap<String, String>>,
    collections: HashMap<String, String>,
}

impl DoctypeMapping {
    /// Empty table, mostly for tests
    pub fn empty() -> Self {
        Self {
            doctypes: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    pub fn add_collection(&mut self, name: &str, id: &str) {
        self.collections.insert(name.to_string(), id.to_string());
    }

    pub fn add_doctype(&mut self, source: Source, doctype: &str, collection_name: &str) {
        self.doctypes
            .entry(source)
            .or_default()
            .insert(doctype.to_string(), collection_name.to_string());
    }

    /// Resolve a native doctype. A doctype whose collection has no id is unmapped.
    pub fn resolve(&self, source: Source, doctype: &str) -> Result<MappedDoctype> {
        let unmapped = || ImportError::UnmappedDoctype {
            origin: source,
            doctype: doctype.to_string(),
        };

        let collection_name = self
            .doctypes
            .get(&source)
            .and_then(|table| table.get(doctype.trim()))
            .ok_or_else(unmapped)?;
        let collection_id = self.collections.get(collection_name).ok_or_else(unmapped)?;

        Ok(MappedDoctype {
            collection_name: collection_name.clone(),
            collection_id: collection_id.clone(),
        })
    }
}

impl Default for DoctypeMapping {
    fn default() -> Self {
        let mut mapping = Self::empty();
        for (name, id) in COLLECTIONS {
            mapping.add_collection(name, id);
        }

        let tables: [(Source, &[(&str, &str)]); 5] = [
            (Source::Wos, WOS_DOCTYPES),
            (Source::Scopus, SCOPUS_DOCTYPES),
            (Source::Openalex, OPENALEX_DOCTYPES),
            (Source::OpenalexCrossref, OPENALEX_DOCTYPES),
            (Source::Zenodo, ZENODO_DOCTYPES),
        ];
        for (source, table) in tables {
            for (doctype, collection) in table {
                mapping.add_doctype(source, doctype, collection);
            }
        }
        mapping
    }
}
