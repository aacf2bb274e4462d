//! Frames of the SockJS `xhr_streaming` channel as GREIN's Shiny server
//! emits them, one per line:
//!
//! - a long run of `h` characters (the streaming prelude) or `o`: channel open
//! - `h`: heartbeat
//! - `a[...]`: JSON array of messages; Shiny messages carry the `0#0|m|`
//!   multiplexing envelope in front of their JSON body
//! - `c[...]`: channel close

use serde_json::Value;

use crate::error::GreinError;
use crate::transport::{FetchControl, LineSource};

pub const OPEN_SENTINEL: &str = "hhhhhhhhhh";
pub const MESSAGE_TAG: char = 'a';
pub const CLOSE_PREFIX: &str = "c[";
pub const MESSAGE_ENVELOPE: &str = "0#0|m|";
pub const ACK_MARKER: &str = "ACK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open,
    Heartbeat,
    /// The JSON array text following the `a` frame tag.
    Message(String),
    Close,
    Unrecognized(String),
}

pub fn classify(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(payload) = line
        .strip_prefix(MESSAGE_TAG)
        .filter(|payload| payload.starts_with('['))
    {
        return Frame::Message(payload.to_string());
    }
    if line.contains(OPEN_SENTINEL) || line == "o" {
        return Frame::Open;
    }
    if line == "h" {
        return Frame::Heartbeat;
    }
    if line.starts_with(CLOSE_PREFIX) {
        return Frame::Close;
    }
    Frame::Unrecognized(line.to_string())
}

impl Frame {
    /// Raw text carried by the frame, escapes intact.
    pub fn text(&self) -> &str {
        match self {
            Frame::Message(payload) | Frame::Unrecognized(payload) => payload,
            Frame::Open | Frame::Heartbeat | Frame::Close => "",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Frame::Open)
    }

    pub fn is_ack(&self) -> bool {
        self.text().contains(ACK_MARKER)
    }

    /// String elements of a message frame, unescaped by the JSON decoder.
    pub fn messages(&self) -> Result<Vec<String>, GreinError> {
        match self {
            Frame::Message(payload) => serde_json::from_str::<Vec<String>>(payload).map_err(|err| {
                GreinError::Streaming(format!("undecodable message frame: {err}"))
            }),
            _ => Ok(Vec::new()),
        }
    }

    /// JSON bodies of the enveloped Shiny messages in this frame. Elements
    /// without the envelope (acknowledgments and the like) are skipped.
    pub fn decode(&self) -> Result<Vec<Value>, GreinError> {
        self.messages()?
            .iter()
            .filter_map(|message| message.strip_prefix(MESSAGE_ENVELOPE))
            .map(|body| {
                serde_json::from_str(body).map_err(|err| {
                    GreinError::Streaming(format!("undecodable message body: {err}"))
                })
            })
            .collect()
    }
}

/// Frame-level view over one opened streaming channel.
pub struct FrameReader {
    lines: Box<dyn LineSource>,
}

impl FrameReader {
    pub fn new(lines: Box<dyn LineSource>) -> Self {
        Self { lines }
    }

    /// Next frame, or `None` once the channel closed.
    pub fn next_frame(&mut self, control: &FetchControl) -> Result<Option<Frame>, GreinError> {
        Ok(self.lines.next_line(control)?.map(|line| classify(&line)))
    }

    /// Reads frames until one satisfies `predicate` and returns everything
    /// read, that frame included.
    pub fn drain_until<P>(
        &mut self,
        control: &FetchControl,
        mut predicate: P,
    ) -> Result<Vec<Frame>, GreinError>
    where
        P: FnMut(&Frame) -> bool,
    {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(control)? {
            let done = predicate(&frame);
            frames.push(frame);
            if done {
                return Ok(frames);
            }
        }
        Err(GreinError::Protocol("no acknowledgment".to_string()))
    }

    pub fn drain_until_ack(&mut self, control: &FetchControl) -> Result<Vec<Frame>, GreinError> {
        self.drain_until(control, Frame::is_ack)
    }
}
