//! Relay wire protocol.
//!
//! Every frame on the relay socket is a JSON object whose `event` field names
//! the message. Client frames that address a single peer carry a `target`
//! field; the relay swaps it for a `sender` field on delivery and otherwise
//! forwards the frame untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub const EVENT_WELCOME: &str = "welcome";
pub const EVENT_PLAYER_DATA: &str = "playerdata";
pub const EVENT_PLAYER_DISCONNECTED: &str = "playerdisconnected";
pub const EVENT_OFFER: &str = "webrtc-offer";
pub const EVENT_ANSWER: &str = "webrtc-answer";
pub const EVENT_CANDIDATE: &str = "webrtc-candidate";

/// Envelope field holding the event name.
pub const FIELD_EVENT: &str = "event";
/// Envelope field naming the addressee of a client frame.
pub const FIELD_TARGET: &str = "target";
/// Envelope field naming the origin of a relayed frame.
pub const FIELD_SENDER: &str = "sender";

/// Opaque identifier the relay assigns to each connected socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::protocol(format!("invalid session id {s:?}: {e}")))
    }
}

/// Position and orientation of one tracked hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandSample {
    pub position: [f32; 3],
    /// Unit quaternion, `[x, y, z, w]`.
    pub orientation: [f32; 4],
}

impl HandSample {
    pub fn is_finite(&self) -> bool {
        all_finite(&self.position) && all_finite(&self.orientation)
    }
}

/// One broadcast unit of a user's pose state.
///
/// Every pose field is optional; a snapshot only carries the groups that had
/// tracking data when it was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSnapshot {
    pub session_id: SessionId,
    pub display_name: String,
    /// Accumulated locomotion drift in world units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_offset: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headset_position: Option<[f32; 3]>,
    /// Unit quaternion, `[x, y, z, w]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headset_orientation: Option<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_hand: Option<HandSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_hand: Option<HandSample>,
}

impl PoseSnapshot {
    pub fn new(session_id: SessionId, display_name: impl Into<String>) -> Self {
        Self {
            session_id,
            display_name: display_name.into(),
            ground_offset: None,
            headset_position: None,
            headset_orientation: None,
            left_hand: None,
            right_hand: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description exchanged during audio negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    #[serde(rename = "playerdata")]
    PlayerData(PoseSnapshot),
    #[serde(rename = "webrtc-offer")]
    Offer {
        target: SessionId,
        description: SessionDescription,
    },
    #[serde(rename = "webrtc-answer")]
    Answer {
        target: SessionId,
        description: SessionDescription,
    },
    #[serde(rename = "webrtc-candidate")]
    Candidate {
        target: SessionId,
        candidate: IceCandidate,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Frames the relay delivers to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// First frame on every socket: the id the relay assigned to it.
    #[serde(rename = "welcome")]
    Welcome { session_id: SessionId },
    #[serde(rename = "playerdata")]
    PlayerData(PoseSnapshot),
    #[serde(rename = "playerdisconnected")]
    PlayerDisconnected { session_id: SessionId },
    #[serde(rename = "webrtc-offer")]
    Offer {
        sender: SessionId,
        description: SessionDescription,
    },
    #[serde(rename = "webrtc-answer")]
    Answer {
        sender: SessionId,
        description: SessionDescription,
    },
    #[serde(rename = "webrtc-candidate")]
    Candidate {
        sender: SessionId,
        candidate: IceCandidate,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn all_finite(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite())
}
