use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::command::Command;
use crate::error::GreinError;
use crate::frame::{Frame, FrameReader};
use crate::transport::{DirectRequest, DirectResponse, FetchControl, Transport};

/// Server-issued session identifier. Only `handshake` creates one, so holding
/// a `SessionId` proves the session is usable for scoped requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One fetch's view of the server: the transport, the streaming channel
/// positioned after the last acknowledgment, and the session id.
pub struct Session<T: Transport> {
    transport: T,
    reader: FrameReader,
    id: SessionId,
    control: FetchControl,
}

/// Opens the streaming channel, waits for it to come up, sends the session
/// open command and reads frames up to the acknowledgment, picking the
/// session id out of the configuration message on the way.
pub fn handshake<T: Transport>(
    mut transport: T,
    control: FetchControl,
) -> Result<Session<T>, GreinError> {
    let mut reader = FrameReader::new(transport.open_stream(&control)?);
    reader
        .drain_until(&control, Frame::is_open)
        .map_err(|err| match err {
            GreinError::Protocol(_) => {
                GreinError::Protocol("streaming channel never opened".to_string())
            }
            other => other,
        })?;
    debug!("connection initialized");

    transport.send(&Command::SessionOpen.encode(), &control)?;
    let frames = reader.drain_until_ack(&control)?;
    let id = find_session_id(&frames)?
        .ok_or_else(|| GreinError::Protocol("session id never found".to_string()))?;
    debug!(session = %id, "session established");

    Ok(Session {
        transport,
        reader,
        id,
        control,
    })
}

fn find_session_id(frames: &[Frame]) -> Result<Option<SessionId>, GreinError> {
    for frame in frames {
        for message in frame.decode()? {
            if let Some(id) = session_id_field(&message) {
                return Ok(Some(SessionId(id.to_string())));
            }
        }
    }
    Ok(None)
}

fn session_id_field(message: &Value) -> Option<&str> {
    message
        .pointer("/config/sessionId")
        .or_else(|| message.get("sessionId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

impl<T: Transport> Session<T> {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn control(&self) -> &FetchControl {
        &self.control
    }

    pub fn send(&mut self, command: &Command) -> Result<(), GreinError> {
        debug!(step = command.name(), "streaming command");
        self.transport.send(&command.encode(), &self.control)
    }

    /// Sends `command` and drains the channel through its acknowledgment.
    pub fn send_and_ack(&mut self, command: &Command) -> Result<Vec<Frame>, GreinError> {
        self.send(command)?;
        self.reader.drain_until_ack(&self.control)
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, GreinError> {
        self.reader.next_frame(&self.control)
    }

    /// Replaces the streaming channel with a freshly opened one.
    pub fn reopen_stream(&mut self) -> Result<(), GreinError> {
        debug!("opening new connection");
        self.reader = FrameReader::new(self.transport.open_stream(&self.control)?);
        Ok(())
    }

    pub fn direct(&mut self, request: &DirectRequest) -> Result<DirectResponse, GreinError> {
        self.transport.direct_request(request, &self.control)
    }
}
