//! Signaling codecs
//!
//! Everything that crosses the signaling channel during the initial handshake
//! (and the negotiation stream afterwards) is encoded here:
//!
//! - [`SessionDescription`] offers/answers as base64 JSON ([`encode_sdp`], [`decode_sdp`])
//! - trickled candidates as a protobuf [`IceCandidate`] with explicit field presence

mod candidate;
mod sdp;

pub use candidate::{
    candidate_from_wire, candidate_init_to_wire, candidate_to_wire, decode_candidate,
    encode_candidate, IceCandidate,
};
pub use sdp::{decode_sdp, encode_sdp, SdpKind, SessionDescription};
