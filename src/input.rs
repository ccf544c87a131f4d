//! JSON Lines loading of harvested source records.
//!
//! One `SourceRecord` per line. Lines that do not deserialize are counted as
//! malformed and skipped; only I/O failures abort the load.

use crate::error::{ImportError, Result};
use crate::model::SourceRecord;
use std::path::Path;
use tracing::{info, warn};

/// Records read from one or more input files, in file then line order
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<SourceRecord>,
    pub malformed: Vec<ImportError>,
}

impl LoadedRecords {
    pub fn extend(&mut self, other: LoadedRecords) {
        self.records.extend(other.records);
        self.malformed.extend(other.malformed);
    }
}

/// Parse JSON Lines text. `origin` only labels error messages.
pub fn parse_jsonl(text: &str, origin: &str) -> LoadedRecords {
    let mut loaded = LoadedRecords::default();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SourceRecord>(line) {
            Ok(record) => loaded.records.push(record),
            Err(e) => {
                let err = ImportError::MalformedSourceRecord(format!("{}:{}: {}", origin, line_no + 1, e));
                warn!(origin = origin, line = line_no + 1, error = %e, "Skipping malformed source record");
                loaded.malformed.push(err);
            }
        }
    }

    loaded
}

/// Read one JSON Lines file
pub fn load_jsonl(path: &Path) -> Result<LoadedRecords> {
    let text = std::fs::read_to_string(path)?;
    let loaded = parse_jsonl(&text, &path.display().to_string());
    info!(
        path = %path.display(),
        records = loaded.records.len(),
        malformed = loaded.malformed.len(),
        "Loaded source records"
    );
    Ok(loaded)
}

/// Read several files, concatenating them in the given order
pub fn load_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedRecords> {
    let mut all = LoadedRecords::default();
    for path in paths {
        all.extend(load_jsonl(path.as_ref())?);
    }
    Ok(all)
}
