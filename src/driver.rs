use std::time::Instant;

use tracing::{debug, info};

use crate::command::{Command, DESCRIPTION_ROWS};
use crate::config::{ClientConfig, Endpoints};
use crate::domain::{
    CountMode, DatasetId, DatasetRecord, MAX_OVERVIEW_DATASETS, OverviewEntry,
};
use crate::error::{GreinError, StepContext};
use crate::format;
use crate::handshake::{Session, handshake};
use crate::requester::{self, Resource};
use crate::transport::{CancelToken, Connector, FetchControl, HttpConnector};

/// Sample count assumed when the description does not report one.
pub const DEFAULT_SAMPLE_COUNT: u64 = 100;

/// Entry point for both flows. Every call opens its own transport and
/// session; nothing is shared between calls except configuration.
pub struct GreinClient<C: Connector> {
    connector: C,
    config: ClientConfig,
    endpoints: Endpoints,
    cancel: CancelToken,
}

impl GreinClient<HttpConnector> {
    pub fn new(config: ClientConfig) -> Result<Self, GreinError> {
        let connector = HttpConnector::new(config.clone())?;
        Self::with_connector(connector, config)
    }
}

impl<C: Connector> GreinClient<C> {
    pub fn with_connector(connector: C, config: ClientConfig) -> Result<Self, GreinError> {
        let endpoints = config.endpoints()?;
        Ok(Self {
            connector,
            config,
            endpoints,
            cancel: CancelToken::new(),
        })
    }

    /// Fetches observe `cancel` at every blocking point.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Validates both arguments before any network activity.
    pub fn fetch_dataset(&self, dataset_id: &str, mode: &str) -> Result<DatasetRecord, GreinError> {
        let mode: CountMode = mode.parse()?;
        let dataset: DatasetId = dataset_id.parse()?;
        self.fetch_dataset_with(&dataset, mode)
    }

    pub fn fetch_dataset_with(
        &self,
        dataset: &DatasetId,
        mode: CountMode,
    ) -> Result<DatasetRecord, GreinError> {
        let started = Instant::now();
        info!(dataset = %dataset, mode = %mode, "fetching dataset");
        let mut session = self.open_session()?;

        session
            .send(&Command::UiInit {
                dataset: dataset.clone(),
            })
            .step("ui init")?;
        // the server does not acknowledge ui init; it emits one burst and
        // drops the channel
        session.next_frame().step("ui init")?;
        session.reopen_stream().step("ui init")?;

        for command in [
            Command::MethodUpdate {
                dataset: dataset.clone(),
            },
            Command::ClientParameter {
                dataset: dataset.clone(),
            },
            Command::StreamDataset {
                dataset: dataset.clone(),
            },
        ] {
            session.send_and_ack(&command).step(command.name())?;
        }
        if mode.is_normalized() {
            let command = Command::StreamDatasetNormalized {
                dataset: dataset.clone(),
            };
            session.send_and_ack(&command).step(command.name())?;
        }
        debug!("data received from GREIN");

        let description_raw = requester::fetch_optional(
            &mut session,
            &self.endpoints,
            Resource::Description,
            dataset,
            Some(
                Command::DescriptionFormData {
                    samples: DESCRIPTION_ROWS,
                }
                .encode(),
            ),
        )
        .step("description request")?
        .map(|body| format::parse_json("description", &body))
        .transpose()
        .step("description request")?;

        let labels_command = Command::MetadataLabels {
            dataset: dataset.clone(),
        };
        let ui_frames = session
            .send_and_ack(&labels_command)
            .step(labels_command.name())?;
        let labels = format::extract_metadata_labels(ui_frames.iter().map(|frame| frame.text()));
        debug!(labels = labels.len(), "metadata labels parsed");

        let samples = description_raw
            .as_ref()
            .and_then(format::description_sample_count)
            .unwrap_or(DEFAULT_SAMPLE_COUNT);
        let metadata_raw = requester::fetch_optional(
            &mut session,
            &self.endpoints,
            Resource::Metadata,
            dataset,
            Some(
                Command::MetadataFormData {
                    columns: labels.len(),
                    samples,
                }
                .encode(),
            ),
        )
        .step("metadata request")?;

        let counts_command = Command::CountMatrixMethod {
            dataset: dataset.clone(),
            mode,
        };
        session
            .send_and_ack(&counts_command)
            .step(counts_command.name())?;
        let counts_raw = requester::fetch_optional(
            &mut session,
            &self.endpoints,
            Resource::CountMatrix,
            dataset,
            None,
        )
        .step("count matrix request")?;
        debug!("count matrix received");
        drop(session);

        let description = description_raw
            .as_ref()
            .map(format::format_description)
            .transpose()
            .step("description formatting")?;
        let metadata = metadata_raw
            .map(|body| {
                format::parse_json("metadata", &body)
                    .and_then(|raw| format::format_metadata(&raw, &labels))
            })
            .transpose()
            .step("metadata formatting")?;
        let count_matrix = counts_raw
            .map(|body| format::format_count_matrix(&body))
            .transpose()
            .step("count matrix formatting")?;

        info!(
            dataset = %dataset,
            elapsed_ms = started.elapsed().as_millis() as u64,
            description = description.is_some(),
            metadata = metadata.is_some(),
            count_matrix = count_matrix.is_some(),
            "dataset fetched"
        );
        Ok(DatasetRecord {
            dataset_id: dataset.clone(),
            mode,
            fetched_at: chrono::Utc::now().to_rfc3339(),
            description,
            metadata,
            count_matrix,
        })
    }

    /// Catalog entries; `None` asks for every dataset.
    pub fn fetch_overview(&self, count: Option<u64>) -> Result<Vec<OverviewEntry>, GreinError> {
        let count = count.unwrap_or(MAX_OVERVIEW_DATASETS);
        info!(count, "fetching overview");
        let mut session = self.open_session()?;

        for command in [Command::OverviewStreaming, Command::OverviewUpdate] {
            session.send_and_ack(&command).step(command.name())?;
        }
        let body = requester::fetch_required(
            &mut session,
            &self.endpoints,
            Resource::Overview,
            Some(Command::OverviewFormData { count }.encode()),
        )
        .step("overview request")?;
        drop(session);

        let entries = format::parse_json("overview", &body)
            .and_then(|raw| format::format_overview(&raw))
            .step("overview formatting")?;
        info!(entries = entries.len(), "overview fetched");
        Ok(entries)
    }

    fn control(&self) -> FetchControl {
        FetchControl::new(self.config.read_timeout, Some(self.config.operation_timeout))
            .with_cancel(self.cancel.clone())
    }

    fn open_session(&self) -> Result<Session<C::Transport>, GreinError> {
        let control = self.control();
        let transport = self.connector.connect(&control).step("connect")?;
        handshake(transport, control).step("handshake")
    }
}
