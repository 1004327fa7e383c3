//! Signaling envelope format.
//!
//! Every frame is one JSON object with a `type` discriminator. Inbound frames
//! are decoded leniently into [`Inbound`] so that an unknown `type` or a bad
//! `to_device_id` can be classified instead of failing the whole frame.
//! Outbound frames are always a well-formed [`Envelope`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use peerlink_core::DeviceId;

/// The closed set of envelope kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// Trickled ICE candidate.
    IceCandidate,
    /// Error report.
    Error,
}

impl EnvelopeKind {
    /// Wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::Error => "error",
        }
    }

    /// Parse the wire spelling. `None` for anything outside the closed set.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "ice-candidate" => Some(Self::IceCandidate),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{type, sdp}` payload of offers and answers. Relayed as an opaque object:
/// only its presence is checked, so clients may send any shape they agree on.
pub type SessionDescription = Map<String, Value>;

/// `{candidate, sdpMLineIndex, sdpMid}` payload of ICE candidates. Relayed as
/// an opaque object, like [`SessionDescription`].
pub type IceCandidate = Map<String, Value>;

/// A complete envelope as written to the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Discriminator.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Sender, always set by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_device_id: Option<DeviceId>,
    /// Recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_device_id: Option<DeviceId>,
    /// Offer/answer payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    /// ICE candidate payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    /// Error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// An `error` envelope carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Error,
            from_device_id: None,
            to_device_id: None,
            sdp: None,
            candidate: None,
            error: Some(message.into()),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame that is not a JSON object with a string `type`.
#[derive(Debug, Error)]
#[error("malformed envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Reasons a routable envelope is refused. `Display` is the text sent back
/// to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// `to_device_id` absent or empty.
    #[error("to_device_id is required for {0}")]
    MissingTarget(EnvelopeKind),
    /// `to_device_id` is not a hyphenated UUID string.
    #[error("invalid to_device_id")]
    InvalidTarget,
    /// Offer or answer without an `sdp` object.
    #[error("sdp is required for {0}")]
    MissingSdp(EnvelopeKind),
    /// ICE candidate without a `candidate` object.
    #[error("candidate is required for ice-candidate")]
    MissingCandidate,
    /// Offer to a device the registry does not know.
    #[error("target device not found")]
    TargetNotFound,
    /// Offer to a device owned by another account.
    #[error("devices must belong to the same user")]
    AccountMismatch,
    /// Registry lookup failed while checking an offer.
    #[error("failed to verify target device")]
    RegistryUnavailable,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    to_device_id: Option<Value>,
    #[serde(default)]
    sdp: Option<Value>,
    #[serde(default)]
    candidate: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Offer, answer or ICE candidate awaiting validation.
    Route(RouteRequest),
    /// Client-reported error.
    Error(Option<String>),
    /// `type` outside the closed set.
    Unknown(String),
}

/// An offer, answer or ICE candidate as the client sent it.
#[derive(Debug)]
pub struct RouteRequest {
    kind: EnvelopeKind,
    to_device_id: Option<Value>,
    sdp: Option<Value>,
    candidate: Option<Value>,
}

impl RouteRequest {
    /// Which routed kind this is.
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Check required fields and stamp the sender. Any client-supplied
    /// `from_device_id` was already discarded at decode time.
    pub fn validate(self, from: DeviceId) -> Result<Envelope, Rejection> {
        let target = match self.to_device_id {
            None | Some(Value::Null) => return Err(Rejection::MissingTarget(self.kind)),
            Some(Value::String(raw)) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Err(Rejection::MissingTarget(self.kind));
                }
                parse_target(raw).ok_or(Rejection::InvalidTarget)?
            }
            Some(_) => return Err(Rejection::InvalidTarget),
        };

        let (sdp, candidate) = match self.kind {
            EnvelopeKind::IceCandidate => {
                let candidate = object(self.candidate).ok_or(Rejection::MissingCandidate)?;
                (None, Some(candidate))
            }
            kind => {
                let sdp = object(self.sdp).ok_or(Rejection::MissingSdp(kind))?;
                (Some(sdp), None)
            }
        };

        Ok(Envelope {
            kind: self.kind,
            from_device_id: Some(from),
            to_device_id: Some(target),
            sdp,
            candidate,
            error: None,
        })
    }
}

/// Only the canonical 36-character hyphenated form is a device id on the
/// wire; braced, URN and simple spellings are refused.
fn parse_target(raw: &str) -> Option<DeviceId> {
    if raw.len() != 36 {
        return None;
    }
    DeviceId::parse(raw).ok()
}

fn object(value: Option<Value>) -> Option<Map<String, Value>> {
    match value {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, DecodeError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    let Some(kind) = EnvelopeKind::from_wire(&raw.kind) else {
        return Ok(Inbound::Unknown(raw.kind));
    };
    Ok(match kind {
        EnvelopeKind::Error => Inbound::Error(match raw.error {
            Some(Value::String(msg)) => Some(msg),
            _ => None,
        }),
        routed => Inbound::Route(RouteRequest {
            kind: routed,
            to_device_id: raw.to_device_id,
            sdp: raw.sdp,
            candidate: raw.candidate,
        }),
    })
}
