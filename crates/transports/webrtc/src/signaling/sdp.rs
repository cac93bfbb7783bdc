//! Session description codec
//!
//! A description travels as base64 over the JSON form used by browsers,
//! `{"type":"offer","sdp":"v=0..."}`. The same encoding is used on the
//! signaling channel and on the in-band negotiation stream.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Offer/answer type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An immutable session description: a type tag and an opaque body
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

    /// A rollback carries no body
    pub fn rollback() -> Self {
        Self {
            kind: SdpKind::Rollback,
            sdp: String::new(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }

    /// Convert into the engine's description, parsing the body
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(self.sdp.clone()),
            SdpKind::Rollback => {
                let mut rollback = RTCSessionDescription::default();
                rollback.sdp_type = RTCSdpType::Rollback;
                return Ok(rollback);
            }
        };
        parsed.map_err(|e| Error::SdpError(format!("Failed to parse {:?}: {}", self.kind, e)))
    }

    /// Convert from the engine's description
    pub fn from_rtc(desc: &RTCSessionDescription) -> Result<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Answer => SdpKind::Answer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            RTCSdpType::Rollback => SdpKind::Rollback,
            other => {
                return Err(Error::SdpError(format!(
                    "unsupported description type {}",
                    other
                )))
            }
        };
        Ok(Self {
            kind,
            sdp: desc.sdp.clone(),
        })
    }
}

/// Encode a description into a transport-safe string
pub fn encode_sdp(desc: &SessionDescription) -> Result<String> {
    let json = serde_json::to_vec(desc)
        .map_err(|e| Error::SerializationError(format!("Failed to encode SDP: {}", e)))?;
    Ok(STANDARD.encode(json))
}

/// Decode a description produced by [`encode_sdp`]
///
/// # Errors
///
/// Returns [`Error::MalformedDescription`] for anything that is not base64 of
/// a JSON description.
pub fn decode_sdp(encoded: &str) -> Result<SessionDescription> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::MalformedDescription(format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::MalformedDescription(format!("invalid description: {}", e)))
}
