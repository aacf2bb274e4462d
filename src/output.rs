use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::{CountMatrix, DatasetRecord, OverviewEntry};
use crate::error::GreinError;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_dataset(record: &DatasetRecord) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_overview(entries: &[OverviewEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Writes the count matrix as CSV through a temporary sibling file.
pub fn write_counts_csv(matrix: &CountMatrix, path: &Utf8Path) -> Result<(), GreinError> {
    let tmp = path.with_extension("csv.tmp");
    fs::write(tmp.as_std_path(), matrix.to_csv())
        .map_err(|err| GreinError::Filesystem(format!("write {tmp}: {err}")))?;
    fs::rename(tmp.as_std_path(), path.as_std_path())
        .map_err(|err| GreinError::Filesystem(format!("rename to {path}: {err}")))?;
    Ok(())
}
