#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use grein_loader::config::ClientConfig;
use grein_loader::error::GreinError;
use grein_loader::transport::{
    Connector, DirectRequest, DirectResponse, FetchControl, LineSource, Transport,
};

/// Everything the scripted server saw.
#[derive(Debug, Default)]
pub struct Log {
    pub connects: usize,
    pub opens: usize,
    pub sends: Vec<String>,
    pub requests: Vec<DirectRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    /// One transcript per `open_stream` call, in order.
    pub streams: Vec<Vec<String>>,
    /// First entry whose fragment occurs in the request URL answers it.
    pub responses: Vec<(String, DirectResponse)>,
}

impl Script {
    pub fn respond(mut self, fragment: &str, status: u16, body: &str) -> Self {
        self.responses.push((
            fragment.to_string(),
            DirectResponse {
                status,
                body: body.to_string(),
            },
        ));
        self
    }
}

pub struct ScriptedConnector {
    script: Script,
    log: Arc<Mutex<Log>>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }
}

impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    fn connect(&self, control: &FetchControl) -> Result<ScriptedTransport, GreinError> {
        control.check()?;
        self.log.lock().unwrap().connects += 1;
        Ok(ScriptedTransport {
            streams: self.script.streams.clone().into(),
            responses: self.script.responses.clone(),
            log: Arc::clone(&self.log),
        })
    }
}

pub struct ScriptedTransport {
    streams: VecDeque<Vec<String>>,
    responses: Vec<(String, DirectResponse)>,
    log: Arc<Mutex<Log>>,
}

impl Transport for ScriptedTransport {
    fn open_stream(&mut self, control: &FetchControl) -> Result<Box<dyn LineSource>, GreinError> {
        control.check()?;
        self.log.lock().unwrap().opens += 1;
        let lines = self
            .streams
            .pop_front()
            .ok_or_else(|| GreinError::StreamingStatus {
                status: 404,
                message: "no stream scripted".to_string(),
            })?;
        Ok(Box::new(ScriptedLines::new(lines)))
    }

    fn send(&mut self, body: &str, control: &FetchControl) -> Result<(), GreinError> {
        control.check()?;
        self.log.lock().unwrap().sends.push(body.to_string());
        Ok(())
    }

    fn direct_request(
        &mut self,
        request: &DirectRequest,
        control: &FetchControl,
    ) -> Result<DirectResponse, GreinError> {
        control.check()?;
        self.log.lock().unwrap().requests.push(request.clone());
        Ok(self
            .responses
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(DirectResponse {
                status: 404,
                body: "not found".to_string(),
            }))
    }
}

pub struct ScriptedLines {
    lines: VecDeque<String>,
}

impl ScriptedLines {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines: lines.into(),
        }
    }
}

impl LineSource for ScriptedLines {
    fn next_line(&mut self, control: &FetchControl) -> Result<Option<String>, GreinError> {
        control.check()?;
        Ok(self.lines.pop_front())
    }
}

pub fn control() -> FetchControl {
    FetchControl::new(Duration::from_secs(5), Some(Duration::from_secs(30)))
}

pub fn config() -> ClientConfig {
    ClientConfig {
        base_url: "http://grein.test/apps/grein/".to_string(),
        ..ClientConfig::default()
    }
}

pub fn prelude() -> String {
    "h".repeat(2048)
}

/// `a[...]` frame carrying one enveloped Shiny message.
pub fn message(body: &str) -> String {
    format!(
        "a{}",
        Value::Array(vec![Value::String(format!("0#0|m|{body}"))])
    )
}

pub fn ack() -> String {
    r#"a["ACK 1"]"#.to_string()
}

pub fn config_frame(session_id: &str) -> String {
    message(&format!(
        r#"{{"config":{{"workerId":"w1","sessionId":"{session_id}","user":null}}}}"#
    ))
}

pub fn handshake_lines(session_id: &str) -> Vec<String> {
    vec![prelude(), "o".to_string(), config_frame(session_id), ack()]
}

/// Inner JSON of a streamed command body.
pub fn decode_command(body: &str) -> Value {
    let outer: Vec<String> = serde_json::from_str(body).unwrap();
    let inner = outer[0].strip_prefix("0#0|m|").unwrap();
    serde_json::from_str(inner).unwrap()
}
