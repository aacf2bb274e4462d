use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GreinError;

/// Requests everything the catalog holds.
pub const MAX_OVERVIEW_DATASETS: u64 = 1_000_000;

/// Label given to the first column of every count matrix.
pub const GENE_COLUMN: &str = "gene";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = GreinError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.');
        if !is_valid {
            return Err(GreinError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum CountMode {
    #[value(name = "RAW")]
    Raw,
    #[value(name = "NORMALIZED")]
    Normalized,
}

impl CountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountMode::Raw => "RAW",
            CountMode::Normalized => "NORMALIZED",
        }
    }

    pub fn is_normalized(&self) -> bool {
        matches!(self, CountMode::Normalized)
    }
}

impl fmt::Display for CountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountMode {
    type Err = GreinError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RAW" => Ok(CountMode::Raw),
            "NORMALIZED" => Ok(CountMode::Normalized),
            other => Err(GreinError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescription {
    #[serde(rename = "Study link")]
    pub study_link: String,
    #[serde(rename = "Species")]
    pub species: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Summary")]
    pub summary: String,
}

pub type MetadataRecord = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataTable {
    /// Column labels in the order the UI lists them.
    pub labels: Vec<String>,
    pub samples: BTreeMap<String, MetadataRecord>,
}

impl MetadataTable {
    pub fn get(&self, sample: &str) -> Option<&MetadataRecord> {
        self.samples.get(sample)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountRow {
    pub gene: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountMatrix {
    pub samples: Vec<String>,
    pub rows: Vec<CountRow>,
}

impl CountMatrix {
    /// Header row as it appears in the tabular form, gene label first.
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(GENE_COLUMN)
            .chain(self.samples.iter().map(String::as_str))
            .collect()
    }

    pub fn value(&self, gene: &str, sample: &str) -> Option<f64> {
        let column = self.samples.iter().position(|name| name == sample)?;
        self.rows
            .iter()
            .find(|row| row.gene == gene)
            .and_then(|row| row.values.get(column).copied())
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.header().join(","));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.gene);
            for value in &row.values {
                out.push(',');
                if value.is_nan() {
                    out.push_str("NA");
                } else {
                    out.push_str(&value.to_string());
                }
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverviewEntry {
    pub geo_accession: String,
    #[serde(rename = "no_samples")]
    pub sample_count: u64,
    pub species: String,
    pub title: String,
    #[serde(rename = "study_summary")]
    pub summary: String,
}

/// Result of one dataset fetch. `None` marks a part the server could not
/// serve (5xx), which is distinct from an empty table.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetRecord {
    pub dataset_id: DatasetId,
    pub mode: CountMode,
    pub fetched_at: String,
    pub description: Option<DatasetDescription>,
    pub metadata: Option<MetadataTable>,
    pub count_matrix: Option<CountMatrix>,
}
