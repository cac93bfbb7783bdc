//! ICE candidate wire message
//!
//! Candidates discovered in trickle mode are sent over the signaling channel
//! as a protobuf message. The optional fields use proto3 explicit presence,
//! so an absent field stays absent instead of collapsing to `""` or `0`.

use crate::{Error, Result};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};

/// Wire form of an ICE candidate
#[derive(Clone, PartialEq, prost::Message)]
pub struct IceCandidate {
    /// Candidate attribute line (`candidate:...`)
    #[prost(string, tag = "1")]
    pub candidate: String,

    /// Media description identifier
    #[prost(string, optional, tag = "2")]
    pub sdp_mid: Option<String>,

    /// Media line index
    #[prost(uint32, optional, tag = "3")]
    pub sdpm_line_index: Option<u32>,

    /// ICE credential fragment
    #[prost(string, optional, tag = "4")]
    pub username_fragment: Option<String>,
}

/// Convert an engine candidate init to its wire form
pub fn candidate_init_to_wire(init: &RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate.clone(),
        sdp_mid: init.sdp_mid.clone(),
        sdpm_line_index: init.sdp_mline_index.map(u32::from),
        username_fragment: init.username_fragment.clone(),
    }
}

/// Convert a gathered local candidate to its wire form
pub fn candidate_to_wire(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate
        .to_json()
        .map_err(|e| Error::IceCandidateError(format!("Failed to serialize candidate: {}", e)))?;
    Ok(candidate_init_to_wire(&init))
}

/// Convert a wire candidate back into the engine's form
///
/// # Errors
///
/// Returns [`Error::MalformedCandidate`] when the media line index does not
/// fit the engine's 16-bit field.
pub fn candidate_from_wire(wire: &IceCandidate) -> Result<RTCIceCandidateInit> {
    let sdp_mline_index = wire
        .sdpm_line_index
        .map(|index| {
            u16::try_from(index).map_err(|_| {
                Error::MalformedCandidate(format!("media line index {} out of range", index))
            })
        })
        .transpose()?;

    Ok(RTCIceCandidateInit {
        candidate: wire.candidate.clone(),
        sdp_mid: wire.sdp_mid.clone(),
        sdp_mline_index,
        username_fragment: wire.username_fragment.clone(),
    })
}

/// Decode a wire candidate from protobuf bytes
pub fn decode_candidate(bytes: &[u8]) -> Result<IceCandidate> {
    use prost::Message as _;
    IceCandidate::decode(bytes)
        .map_err(|e| Error::MalformedCandidate(format!("invalid candidate message: {}", e)))
}

/// Encode a wire candidate to protobuf bytes
pub fn encode_candidate(candidate: &IceCandidate) -> Vec<u8> {
    use prost::Message as _;
    candidate.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_CANDIDATE: &str =
        "candidate:1966762134 1 udp 2130706431 192.168.1.20 50000 typ host";

    fn init(
        mid: Option<&str>,
        index: Option<u16>,
        ufrag: Option<&str>,
    ) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: HOST_CANDIDATE.to_string(),
            sdp_mid: mid.map(str::to_string),
            sdp_mline_index: index,
            username_fragment: ufrag.map(str::to_string),
        }
    }

    fn assert_same_init(actual: &RTCIceCandidateInit, expected: &RTCIceCandidateInit) {
        assert_eq!(actual.candidate, expected.candidate);
        assert_eq!(actual.sdp_mid, expected.sdp_mid);
        assert_eq!(actual.sdp_mline_index, expected.sdp_mline_index);
        assert_eq!(actual.username_fragment, expected.username_fragment);
    }

    #[test]
    fn test_every_presence_combination_survives() {
        for mid in [None, Some("0"), Some("")] {
            for index in [None, Some(0u16), Some(3)] {
                for ufrag in [None, Some("abcd")] {
                    let original = init(mid, index, ufrag);
                    let wire = candidate_init_to_wire(&original);
                    let bytes = encode_candidate(&wire);
                    let decoded = decode_candidate(&bytes).unwrap();
                    assert_eq!(decoded, wire);
                    assert_same_init(&candidate_from_wire(&decoded).unwrap(), &original);
                }
            }
        }
    }

    #[test]
    fn test_absent_fields_are_not_defaulted() {
        let wire = candidate_init_to_wire(&init(None, None, None));
        assert_eq!(wire.sdp_mid, None);
        assert_eq!(wire.sdpm_line_index, None);
        assert_eq!(wire.username_fragment, None);

        let decoded = decode_candidate(&encode_candidate(&wire)).unwrap();
        assert_eq!(decoded.sdp_mid, None);
        assert_eq!(decoded.sdpm_line_index, None);
    }

    #[test]
    fn test_present_zero_values_stay_present() {
        let wire = candidate_init_to_wire(&init(Some(""), Some(0), None));
        let decoded = decode_candidate(&encode_candidate(&wire)).unwrap();
        assert_eq!(decoded.sdp_mid.as_deref(), Some(""));
        assert_eq!(decoded.sdpm_line_index, Some(0));
    }

    #[test]
    fn test_out_of_range_line_index() {
        let wire = IceCandidate {
            candidate: HOST_CANDIDATE.to_string(),
            sdp_mid: None,
            sdpm_line_index: Some(70_000),
            username_fragment: None,
        };
        assert!(matches!(
            candidate_from_wire(&wire),
            Err(Error::MalformedCandidate(_))
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_candidate(&[0xff, 0xff, 0xff]).is_err());
    }
}
