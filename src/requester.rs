use tracing::{debug, warn};

use crate::config::Endpoints;
use crate::domain::DatasetId;
use crate::error::GreinError;
use crate::handshake::{Session, SessionId};
use crate::nonce;
use crate::transport::{DirectRequest, Transport, direct_headers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Description,
    Metadata,
    CountMatrix,
    Overview,
}

impl Resource {
    pub fn label(&self) -> &'static str {
        match self {
            Resource::Description => "dataset description",
            Resource::Metadata => "metadata",
            Resource::CountMatrix => "count matrix",
            Resource::Overview => "overview",
        }
    }

    /// Session-scoped path; every call draws a fresh nonce where the
    /// endpoint takes one.
    pub fn path(&self, session: &SessionId) -> String {
        let session = session.as_str();
        match self {
            Resource::Description => format!(
                "session/{session}/dataobj/geo_summary?w=&nonce={}",
                nonce::nonce()
            ),
            Resource::Metadata => format!(
                "session/{session}/dataobj/metadata_full?w=&nonce={}",
                nonce::nonce()
            ),
            Resource::CountMatrix => format!("session/{session}/download/downloadcounts?w="),
            Resource::Overview => format!(
                "session/{session}/dataobj/datatable?w=&nonce={}",
                nonce::nonce()
            ),
        }
    }
}

pub fn build_request(
    endpoints: &Endpoints,
    resource: Resource,
    session: &SessionId,
    dataset: Option<&DatasetId>,
    body: Option<String>,
) -> DirectRequest {
    DirectRequest {
        url: endpoints.join(&resource.path(session)),
        headers: direct_headers(endpoints, dataset.map(DatasetId::as_str)),
        body,
    }
}

/// Fetches a dataset part. A 5xx answer means the server could not build it
/// and yields `None`; any other failure status is an error.
pub fn fetch_optional<T: Transport>(
    session: &mut Session<T>,
    endpoints: &Endpoints,
    resource: Resource,
    dataset: &DatasetId,
    body: Option<String>,
) -> Result<Option<String>, GreinError> {
    session.control().check()?;
    let request = build_request(endpoints, resource, session.id(), Some(dataset), body);
    debug!(resource = resource.label(), url = %request.url, "direct request");
    let response = session.direct(&request)?;
    if response.is_success() {
        return Ok(Some(response.body));
    }
    if response.is_server_error() {
        warn!(
            resource = resource.label(),
            status = response.status,
            "server could not produce {}, treating it as unavailable",
            resource.label()
        );
        return Ok(None);
    }
    Err(GreinError::DataStatus {
        resource: resource.label().to_string(),
        status: response.status,
        message: response.body,
    })
}

/// Like `fetch_optional`, but every non-success status is an error.
pub fn fetch_required<T: Transport>(
    session: &mut Session<T>,
    endpoints: &Endpoints,
    resource: Resource,
    body: Option<String>,
) -> Result<String, GreinError> {
    session.control().check()?;
    let request = build_request(endpoints, resource, session.id(), None, body);
    debug!(resource = resource.label(), url = %request.url, "direct request");
    let response = session.direct(&request)?;
    if !response.is_success() {
        return Err(GreinError::DataStatus {
            resource: resource.label().to_string(),
            status: response.status,
            message: response.body,
        });
    }
    Ok(response.body)
}
