use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::{ClientConfig, Endpoints};
use crate::error::GreinError;
use crate::nonce;

const POLL_SLICE: Duration = Duration::from_millis(100);

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
pub const JSON_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time budget and cancellation shared by every blocking step of one fetch.
#[derive(Debug, Clone)]
pub struct FetchControl {
    pub read_timeout: Duration,
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl FetchControl {
    pub fn new(read_timeout: Duration, operation_timeout: Option<Duration>) -> Self {
        Self {
            read_timeout,
            deadline: operation_timeout.map(|limit| Instant::now() + limit),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fails when the fetch was cancelled or ran past its deadline.
    pub fn check(&self) -> Result<(), GreinError> {
        if self.cancel.is_cancelled() {
            return Err(GreinError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(GreinError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// How long the next blocking read may wait.
    pub fn read_budget(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .read_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.read_timeout,
        }
    }

    /// Per-request timeout clipped to the remaining deadline.
    pub fn request_budget(&self, request_timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => {
                request_timeout.min(deadline.saturating_duration_since(Instant::now()))
            }
            None => request_timeout,
        }
    }
}

/// Forward-only lines of one opened streaming response.
pub trait LineSource: Send {
    /// `Ok(None)` once the server closed the channel.
    fn next_line(&mut self, control: &FetchControl) -> Result<Option<String>, GreinError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectResponse {
    pub status: u16,
    pub body: String,
}

impl DirectResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

pub trait Transport: Send {
    fn open_stream(&mut self, control: &FetchControl) -> Result<Box<dyn LineSource>, GreinError>;
    fn send(&mut self, body: &str, control: &FetchControl) -> Result<(), GreinError>;
    /// Returns whatever status the server answered with; callers decide what is fatal.
    fn direct_request(
        &mut self,
        request: &DirectRequest,
        control: &FetchControl,
    ) -> Result<DirectResponse, GreinError>;
}

/// Builds one transport per fetch; `connect` performs the initial GET.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(&self, control: &FetchControl) -> Result<Self::Transport, GreinError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: ClientConfig,
    endpoints: Endpoints,
}

impl HttpConnector {
    pub fn new(config: ClientConfig) -> Result<Self, GreinError> {
        let endpoints = config.endpoints()?;
        Ok(Self { config, endpoints })
    }

    fn build_client(&self) -> Result<Client, GreinError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent)
                .map_err(|err| GreinError::InvalidConfig(err.to_string()))?,
        );
        Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|err| GreinError::Connection {
                url: self.endpoints.root().to_string(),
                message: err.to_string(),
            })
    }
}

impl Connector for HttpConnector {
    type Transport = HttpTransport;

    fn connect(&self, control: &FetchControl) -> Result<HttpTransport, GreinError> {
        control.check()?;
        let client = self.build_client()?;
        let root = self.endpoints.root().to_string();
        debug!(url = %root, "requesting session");
        let response = client
            .get(&root)
            .timeout(control.request_budget(self.config.request_timeout))
            .send()
            .map_err(|err| GreinError::Connection {
                url: root.clone(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(GreinError::Connection {
                url: root,
                message: format!("status {}", response.status().as_u16()),
            });
        }
        debug!("connected to GREIN");
        let token = nonce::url_token();
        Ok(HttpTransport {
            client,
            stream_url: self.endpoints.stream_url(&token),
            send_url: self.endpoints.send_url(&token),
            request_timeout: self.config.request_timeout,
            stream_timeout: self.config.stream_timeout,
        })
    }
}

pub struct HttpTransport {
    client: Client,
    stream_url: String,
    send_url: String,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl HttpTransport {
    fn status_error(response: reqwest::blocking::Response) -> GreinError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "streaming request failed".to_string());
        GreinError::StreamingStatus { status, message }
    }
}

impl Transport for HttpTransport {
    fn open_stream(&mut self, control: &FetchControl) -> Result<Box<dyn LineSource>, GreinError> {
        control.check()?;
        // bounded by the fetch deadline so the reader thread cannot outlive it
        let request = self
            .client
            .post(&self.stream_url)
            .timeout(control.request_budget(self.stream_timeout));

        let (opened_tx, opened_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let response = match request.send() {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    let _ = opened_tx.send(Err(HttpTransport::status_error(response)));
                    return;
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(GreinError::Streaming(err.to_string())));
                    return;
                }
            };
            if opened_tx.send(Ok(())).is_err() {
                return;
            }
            for line in BufReader::new(response).lines() {
                let failed = line.is_err();
                if tx.send(line.map_err(|err| err.to_string())).is_err() || failed {
                    break;
                }
            }
        });

        match recv_bounded(&opened_rx, control, control.request_budget(self.request_timeout))? {
            Some(Ok(())) => Ok(Box::new(ChannelLines { rx })),
            Some(Err(err)) => Err(err),
            None => Err(GreinError::Streaming(
                "stream reader exited before a response arrived".to_string(),
            )),
        }
    }

    fn send(&mut self, body: &str, control: &FetchControl) -> Result<(), GreinError> {
        control.check()?;
        let response = self
            .client
            .post(&self.send_url)
            .timeout(control.request_budget(self.request_timeout))
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body.to_string())
            .send()
            .map_err(|err| GreinError::Streaming(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::status_error(response));
        }
        Ok(())
    }

    fn direct_request(
        &mut self,
        request: &DirectRequest,
        control: &FetchControl,
    ) -> Result<DirectResponse, GreinError> {
        control.check()?;
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(control.request_budget(self.request_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().map_err(|err| GreinError::DataFetch {
            resource: request.url.clone(),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| GreinError::DataFetch {
            resource: request.url.clone(),
            message: err.to_string(),
        })?;
        Ok(DirectResponse { status, body })
    }
}

/// Lines pumped off the streaming response by a reader thread, so each
/// wait can be bounded and interrupted.
struct ChannelLines {
    rx: Receiver<Result<String, String>>,
}

impl LineSource for ChannelLines {
    fn next_line(&mut self, control: &FetchControl) -> Result<Option<String>, GreinError> {
        match recv_bounded(&self.rx, control, control.read_budget())? {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(message)) => Err(GreinError::Streaming(format!(
                "channel closed unexpectedly: {message}"
            ))),
            None => Ok(None),
        }
    }
}

/// Waits up to `budget` for the next value, polling `control` in short
/// slices. `Ok(None)` once the sender is gone.
fn recv_bounded<T>(
    rx: &Receiver<T>,
    control: &FetchControl,
    budget: Duration,
) -> Result<Option<T>, GreinError> {
    let started = Instant::now();
    loop {
        control.check()?;
        let waited = started.elapsed();
        if waited >= budget {
            return Err(GreinError::ReadTimeout(budget));
        }
        match rx.recv_timeout(POLL_SLICE.min(budget - waited)) {
            Ok(value) => return Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
        }
    }
}

/// Standard header set for session-scoped data requests.
pub fn direct_headers(endpoints: &Endpoints, dataset: Option<&str>) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", FORM_CONTENT_TYPE.to_string()),
        ("Accept", JSON_ACCEPT.to_string()),
        ("Origin", endpoints.origin().to_string()),
        ("Referer", endpoints.referer(dataset)),
    ]
}
