//! Routing decisions for inbound frames.
//!
//! Only the envelope is read: the `event` name and an optional `target`.
//! Everything else in the frame is passed through untouched.

use holoroom_common::protocol::{
    SessionId, EVENT_PLAYER_DATA, EVENT_PLAYER_DISCONNECTED, EVENT_WELCOME, FIELD_EVENT,
    FIELD_SENDER, FIELD_TARGET,
};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Forward the inbound frame unchanged to every session but the sender.
    Broadcast,
    /// Deliver a rewritten frame to a single session.
    Direct { target: SessionId, frame: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no event name")]
    MissingEvent,
    #[error("{0} frame has no target")]
    MissingTarget(String),
    #[error("invalid target {0:?}")]
    InvalidTarget(String),
    #[error("{0} is reserved for the relay")]
    ReservedEvent(String),
}

/// Decides where a frame from `sender` goes.
///
/// Pose data is always broadcast verbatim. Every other frame must name a
/// target; it loses its `target` field and gains a `sender` field.
pub fn route_frame(sender: SessionId, text: &str) -> Result<Delivery, EnvelopeError> {
    let mut fields: Map<String, Value> =
        serde_json::from_str(text).map_err(|_| EnvelopeError::NotAnObject)?;

    let event = fields
        .get(FIELD_EVENT)
        .and_then(Value::as_str)
        .ok_or(EnvelopeError::MissingEvent)?
        .to_string();

    if event == EVENT_WELCOME || event == EVENT_PLAYER_DISCONNECTED {
        return Err(EnvelopeError::ReservedEvent(event));
    }
    // pose data is never targeted, even if the frame names a target
    if event == EVENT_PLAYER_DATA {
        return Ok(Delivery::Broadcast);
    }

    let Some(target) = fields.remove(FIELD_TARGET) else {
        return Err(EnvelopeError::MissingTarget(event));
    };

    let target = target
        .as_str()
        .and_then(|raw| raw.parse::<SessionId>().ok())
        .ok_or_else(|| EnvelopeError::InvalidTarget(target.to_string()))?;

    fields.insert(FIELD_SENDER.to_string(), Value::String(sender.to_string()));
    let frame = Value::Object(fields).to_string();

    Ok(Delivery::Direct { target, frame })
}
