//! Dataset ingestion
//!
//! Thin CSV adapter feeding the replay core: header row, blank lines
//! skipped, ragged rows tolerated, header names normalized to
//! lower_snake_case. Cell values stay as text; the normalizer decides what
//! is numeric.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::{Record, RecordValue};

/// Lower-case a header and collapse each whitespace run into one `_`.
///
/// "FFTE Heat Temperature 1" -> "ffte_heat_temperature_1"
pub fn normalize_field_name(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Errors while loading a dataset file.
#[derive(Debug)]
pub enum DatasetError {
    Open { path: PathBuf, source: std::io::Error },
    Csv(csv::Error),
    NoHeader,
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => write!(f, "cannot open {}: {}", path.display(), source),
            Self::Csv(e) => write!(f, "csv error: {}", e),
            Self::NoHeader => write!(f, "csv input has no header row"),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Csv(e) => Some(e),
            Self::NoHeader => None,
        }
    }
}

impl From<csv::Error> for DatasetError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

/// Ordered, finite sequence of records. Fixed once replay starts.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load a CSV file with a header row.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_csv_reader(file)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            "📂 Dataset loaded"
        );
        Ok(dataset)
    }

    /// Parse CSV from any reader.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(normalize_field_name).collect();
        if headers.iter().all(String::is_empty) {
            return Err(DatasetError::NoHeader);
        }

        let mut records = Vec::new();
        for (line, row) in rdr.records().enumerate() {
            let row = row?;
            // Extra cells beyond the header have no name and are dropped.
            let record: Record = headers
                .iter()
                .zip(row.iter())
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, cell)| (name.clone(), RecordValue::Text(cell.to_string())))
                .collect();
            if row.len() != headers.len() {
                debug!(line = line + 2, cells = row.len(), headers = headers.len(), "ragged csv row");
            }
            records.push(record);
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}
