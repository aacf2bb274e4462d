use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::domain::{
    CountMatrix, CountRow, DatasetDescription, MetadataRecord, MetadataTable, OverviewEntry,
};
use crate::error::GreinError;

/// How R renders a missing character value.
pub const ABSENT_VALUE: &str = "character(0)";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}([-a-zA-Z0-9()@:%_+.~#?&/=]*)",
    )
    .expect("url pattern compiles")
});
static HEADER_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<th>(.*?)</th>").expect("header pattern compiles"));
static GSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GSE[0-9]{3,}").expect("accession pattern compiles"));

pub fn parse_json(resource: &str, body: &str) -> Result<Value, GreinError> {
    serde_json::from_str(body)
        .map_err(|err| GreinError::Format(format!("{resource} is not valid JSON: {err}")))
}

fn data_rows<'a>(raw: &'a Value, resource: &str) -> Result<&'a Vec<Value>, GreinError> {
    raw.get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| GreinError::Format(format!("{resource} payload has no data array")))
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn present(value: String) -> String {
    if value == ABSENT_VALUE { String::new() } else { value }
}

pub fn format_description(raw: &Value) -> Result<DatasetDescription, GreinError> {
    let mut description = DatasetDescription::default();
    for row in data_rows(raw, "description")? {
        let (Some(field), Some(value)) = (
            row.get(0).and_then(Value::as_str),
            row.get(1).map(cell_text),
        ) else {
            continue;
        };
        match field {
            "Study link" => {
                let link = URL_RE.find(&value).ok_or_else(|| {
                    GreinError::Format(format!("study link without a URL: {value:?}"))
                })?;
                description.study_link = link.as_str().to_string();
            }
            "Species" => description.species = present(value),
            "Title" => description.title = present(value),
            "Summary" => description.summary = present(value),
            _ => {}
        }
    }
    Ok(description)
}

/// Sample count the description reports in its second row, if readable.
pub fn description_sample_count(raw: &Value) -> Option<u64> {
    let cell = raw.pointer("/data/1/1")?;
    cell.as_u64()
        .or_else(|| cell.as_str().and_then(|text| text.trim().parse().ok()))
}

/// Column labels of the first HTML table found in the given UI fragments,
/// in document order.
pub fn extract_metadata_labels<'a, I>(fragments: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(table) = fragments
        .into_iter()
        .find(|fragment| fragment.contains("<table class"))
    else {
        return Vec::new();
    };
    let unescaped = table.replace('\\', "");
    HEADER_CELL_RE
        .captures_iter(&unescaped)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Pairs each raw row with `labels` by position and indexes the records by
/// the row's second field. Surplus values or labels are dropped.
pub fn format_metadata(raw: &Value, labels: &[String]) -> Result<MetadataTable, GreinError> {
    let mut table = MetadataTable {
        labels: labels.to_vec(),
        ..MetadataTable::default()
    };
    let mut mismatch_reported = false;
    for row in data_rows(raw, "metadata")? {
        let cells = row
            .as_array()
            .ok_or_else(|| GreinError::Format("metadata row is not an array".to_string()))?;
        let key = cells
            .get(1)
            .map(cell_text)
            .ok_or_else(|| GreinError::Format("metadata row without a sample id".to_string()))?;
        if cells.len() != labels.len() && !mismatch_reported {
            warn!(
                labels = labels.len(),
                values = cells.len(),
                "metadata labels and row width differ, truncating to the shorter"
            );
            mismatch_reported = true;
        }
        let record: MetadataRecord = labels
            .iter()
            .cloned()
            .zip(cells.iter().cloned())
            .collect();
        table.samples.insert(key, record);
    }
    Ok(table)
}

/// Parses the downloaded CSV; the first header cell becomes `gene`.
pub fn format_count_matrix(text: &str) -> Result<CountMatrix, GreinError> {
    let mut records = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_csv_record);
    let header = records
        .next()
        .ok_or_else(|| GreinError::Format("count matrix is empty".to_string()))??;
    let samples = header.into_iter().skip(1).collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let mut fields = record?.into_iter();
        let gene = fields.next().unwrap_or_default();
        let values = fields
            .enumerate()
            .map(|(column, field)| {
                parse_count(&field).ok_or_else(|| {
                    GreinError::Format(format!(
                        "count matrix row {} ({gene}), column {}: not a number: {field:?}",
                        index + 1,
                        samples.get(column).map(String::as_str).unwrap_or("?"),
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != samples.len() {
            return Err(GreinError::Format(format!(
                "count matrix row {} has {} values, expected {}",
                index + 1,
                values.len(),
                samples.len()
            )));
        }
        rows.push(CountRow { gene, values });
    }
    Ok(CountMatrix { samples, rows })
}

/// `NA` and empty cells are missing values; anything else must be numeric.
fn parse_count(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == "NA" {
        return Some(f64::NAN);
    }
    field.parse().ok()
}

fn parse_csv_record(line: &str) -> Result<Vec<String>, GreinError> {
    let line = line.trim_end_matches('\r');
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(ch) = chars.next() {
        match (quoted, ch) {
            (true, '"') if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            (true, '"') => quoted = false,
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (_, ch) => field.push(ch),
        }
    }
    if quoted {
        return Err(GreinError::Format(format!(
            "unterminated quote in count matrix line: {line}"
        )));
    }
    fields.push(field);
    Ok(fields)
}

/// First `GSE` accession in free text, or an empty string.
pub fn format_geo_accession(text: &str) -> String {
    GSE_RE
        .find(text)
        .map(|found| found.as_str().to_string())
        .unwrap_or_default()
}

pub fn format_overview(raw: &Value) -> Result<Vec<OverviewEntry>, GreinError> {
    data_rows(raw, "overview")?
        .iter()
        .map(|row| {
            let cells = row
                .as_array()
                .filter(|cells| cells.len() >= 5)
                .ok_or_else(|| {
                    GreinError::Format(format!("overview row is not a 5-tuple: {row}"))
                })?;
            let sample_count = cells[1]
                .as_u64()
                .or_else(|| cells[1].as_str().and_then(|text| text.trim().parse().ok()))
                .ok_or_else(|| {
                    GreinError::Format(format!("overview sample count is not a number: {}", cells[1]))
                })?;
            Ok(OverviewEntry {
                geo_accession: format_geo_accession(&cell_text(&cells[0])),
                sample_count,
                species: cell_text(&cells[2]),
                title: cell_text(&cells[3]),
                summary: cell_text(&cells[4]),
            })
        })
        .collect()
}
