//! Wire frames: server events, client requests and acknowledgements

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Frame;
use crate::error::Result;
use crate::topics::{post_topic, TopicId};

/// An event the gateway can push to clients.
///
/// The implementor serializes to the `data` part of the frame and `name`
/// becomes the `event` field:
///
/// ```json
/// {"event": "commentAdded", "data": {"_id": "...", "postId": "42"}}
/// ```
///
/// Give each event its own type (or enum variant) with a fixed field set
/// rather than passing untyped JSON around.
pub trait GatewayEvent: Serialize + Send + Sync {
    /// Event name as seen by clients
    fn name(&self) -> &str;
}

/// Untyped event, for tooling and tests
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct JsonEvent {
    #[serde(skip)]
    name: String,
    data: Value,
}

impl JsonEvent {
    /// Create a new event; `data` should be a JSON object
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl GatewayEvent for JsonEvent {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    event: &'a str,
    data: &'a T,
}

/// Serialize an event into the frame every target connection shares
pub fn encode<E: GatewayEvent + ?Sized>(event: &E) -> Result<Frame> {
    let text = serde_json::to_string(&Envelope {
        event: event.name(),
        data: event,
    })?;
    Ok(Frame::from(text))
}

/// Event name of acknowledgement frames
pub const ACK_EVENT: &str = "ack";

/// Acknowledgement for an accepted join/leave request.
///
/// Echoes the request's `ack` id when the client sent one. Never carries
/// membership information.
pub fn ack_frame(ack: Option<u64>) -> Frame {
    let mut frame = serde_json::json!({
        "event": ACK_EVENT,
        "data": { "ok": true },
    });
    if let Some(id) = ack {
        frame["ack"] = id.into();
    }
    Frame::from(frame.to_string())
}

/// A raw message received from a client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Optional request id echoed in the acknowledgement
    #[serde(default)]
    pub ack: Option<u64>,
}

/// A well-formed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Join(TopicId),
    Leave(TopicId),
}

impl ClientMessage {
    /// Parse a text frame; `None` if it is not a client message
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Interpret the message.
    ///
    /// Returns `None` for unknown events and for join/leave requests that
    /// carry no topic; those are ignored without acknowledgement.
    ///
    /// `joinPost` / `leavePost` with `{"postId": ...}` are accepted as
    /// shorthands for the `post:<id>` topic.
    pub fn request(&self) -> Option<ClientRequest> {
        match self.event.as_str() {
            "joinTopic" => self.field("topicId").map(ClientRequest::Join),
            "leaveTopic" => self.field("topicId").map(ClientRequest::Leave),
            "joinPost" => self
                .field("postId")
                .map(|id| ClientRequest::Join(post_topic(&id))),
            "leavePost" => self
                .field("postId")
                .map(|id| ClientRequest::Leave(post_topic(&id))),
            _ => None,
        }
    }

    fn field(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
