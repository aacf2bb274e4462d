//! Payloads for every protocol step. Streamed commands become SockJS send
//! bodies (a JSON array holding one enveloped Shiny message); form commands
//! become DataTables server-side request bodies for the direct endpoints.

use serde_json::{Value, json};

use crate::domain::{CountMode, DatasetId};
use crate::frame::MESSAGE_ENVELOPE;

/// Rows requested with the description table.
pub const DESCRIPTION_ROWS: u64 = 100;

/// Leading metadata columns the server renders itself and that are not
/// requested as column descriptors.
pub const FIXED_METADATA_COLUMNS: usize = 5;

const SESSION_OPEN: &str = r#"["0#0|o|"]"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SessionOpen,
    UiInit { dataset: DatasetId },
    MethodUpdate { dataset: DatasetId },
    ClientParameter { dataset: DatasetId },
    StreamDataset { dataset: DatasetId },
    StreamDatasetNormalized { dataset: DatasetId },
    MetadataLabels { dataset: DatasetId },
    CountMatrixMethod { dataset: DatasetId, mode: CountMode },
    OverviewStreaming,
    OverviewUpdate,
    DescriptionFormData { samples: u64 },
    MetadataFormData { columns: usize, samples: u64 },
    OverviewFormData { count: u64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SessionOpen => "session open",
            Command::UiInit { .. } => "ui init",
            Command::MethodUpdate { .. } => "method update",
            Command::ClientParameter { .. } => "client parameter",
            Command::StreamDataset { .. } => "stream dataset",
            Command::StreamDatasetNormalized { .. } => "stream normalized dataset",
            Command::MetadataLabels { .. } => "metadata labels",
            Command::CountMatrixMethod { .. } => "count matrix method",
            Command::OverviewStreaming => "overview streaming",
            Command::OverviewUpdate => "overview update",
            Command::DescriptionFormData { .. } => "description form",
            Command::MetadataFormData { .. } => "metadata form",
            Command::OverviewFormData { .. } => "overview form",
        }
    }

    /// Whether the payload goes to the `xhr_send` endpoint.
    pub fn is_streamed(&self) -> bool {
        !matches!(
            self,
            Command::DescriptionFormData { .. }
                | Command::MetadataFormData { .. }
                | Command::OverviewFormData { .. }
        )
    }

    pub fn encode(&self) -> String {
        match self {
            Command::SessionOpen => SESSION_OPEN.to_string(),
            Command::UiInit { dataset } => shiny_message(json!({
                "method": "init",
                "data": {
                    "gse": dataset.as_str(),
                    "tabs": "Explore dataset",
                    ".clientdata_url_search": format!("?gse={dataset}"),
                    ".clientdata_url_hash_initial": "",
                    ".clientdata_allowDataUriScheme": true,
                    ".clientdata_pixelratio": 1,
                    ".clientdata_singletons": "",
                }
            })),
            Command::MethodUpdate { dataset } => shiny_message(json!({
                "method": "update",
                "data": {
                    "gse": dataset.as_str(),
                    "tabs": "Explore dataset",
                    "explore_tabs": "Description",
                }
            })),
            Command::ClientParameter { dataset } => shiny_message(json!({
                "method": "update",
                "data": {
                    "gse": dataset.as_str(),
                    ".clientdata_output_geo_summary_hidden": false,
                    ".clientdata_output_metadata_full_hidden": false,
                    ".clientdata_output_downloadcounts_hidden": false,
                }
            })),
            Command::StreamDataset { dataset } => shiny_message(json!({
                "method": "update",
                "data": {
                    "gse": dataset.as_str(),
                    "load_dataset": 1,
                    "normalized": false,
                }
            })),
            Command::StreamDatasetNormalized { dataset } => shiny_message(json!({
                "method": "update",
                "data": {
                    "gse": dataset.as_str(),
                    "normalized": true,
                }
            })),
            Command::MetadataLabels { dataset } => shiny_message(json!({
                "method": "update",
                "data": {
                    "gse": dataset.as_str(),
                    "explore_tabs": "Metadata",
                }
            })),
            Command::CountMatrixMethod { dataset, mode } => {
                let count_type = match mode {
                    CountMode::Raw => "raw",
                    CountMode::Normalized => "normalized",
                };
                shiny_message(json!({
                    "method": "update",
                    "data": {
                        "gse": dataset.as_str(),
                        "explore_tabs": "Count matrix",
                        "count_type": count_type,
                    }
                }))
            }
            Command::OverviewStreaming => shiny_message(json!({
                "method": "init",
                "data": {
                    "tabs": "Datasets",
                    ".clientdata_url_search": "",
                    ".clientdata_url_hash_initial": "",
                    ".clientdata_allowDataUriScheme": true,
                    ".clientdata_pixelratio": 1,
                    ".clientdata_singletons": "",
                }
            })),
            Command::OverviewUpdate => shiny_message(json!({
                "method": "update",
                "data": {
                    "tabs": "Datasets",
                    ".clientdata_output_datatable_hidden": false,
                }
            })),
            Command::DescriptionFormData { samples } => DataTablesForm {
                columns: (0..2).collect(),
                length: *samples,
            }
            .encode(),
            Command::MetadataFormData { columns, samples } => DataTablesForm {
                columns: (1..=columns.saturating_sub(FIXED_METADATA_COLUMNS)).collect(),
                length: *samples,
            }
            .encode(),
            Command::OverviewFormData { count } => DataTablesForm {
                columns: (0..5).collect(),
                length: *count,
            }
            .encode(),
        }
    }
}

fn shiny_message(body: Value) -> String {
    Value::Array(vec![Value::String(format!("{MESSAGE_ENVELOPE}{body}"))]).to_string()
}

/// Server-side processing request of a DataTables widget.
struct DataTablesForm {
    columns: Vec<usize>,
    length: u64,
}

impl DataTablesForm {
    fn encode(&self) -> String {
        let mut pairs: Vec<(String, String)> = vec![("draw".into(), "1".into())];
        for index in &self.columns {
            let key = |field: &str| format!("columns[{index}]{field}");
            pairs.push((key("[data]"), index.to_string()));
            pairs.push((key("[name]"), String::new()));
            pairs.push((key("[searchable]"), "true".into()));
            pairs.push((key("[orderable]"), "true".into()));
            pairs.push((key("[search][value]"), String::new()));
            pairs.push((key("[search][regex]"), "false".into()));
        }
        pairs.push(("start".into(), "0".into()));
        pairs.push(("length".into(), self.length.to_string()));
        pairs.push(("search[value]".into(), String::new()));
        pairs.push(("search[regex]".into(), "false".into()));
        pairs.push(("search[caseInsensitive]".into(), "true".into()));
        pairs.push(("search[smart]".into(), "true".into()));
        pairs.push(("escape".into(), "true".into()));
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }
}
