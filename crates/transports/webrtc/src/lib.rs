//! WebRTC transport for RPC
//!
//! This crate establishes a peer-to-peer, ordered and reliable byte stream
//! over a WebRTC peer connection, used as the carrier for an RPC framework
//! between a client (initiator) and a server (responder).
//!
//! # Features
//!
//! - **Role-specific engines**: mDNS posture, loopback candidates, relay delay, IPv4 only
//! - **Gather-first or trickle handshakes**: complete descriptions or incremental candidates
//! - **In-band renegotiation**: perfect negotiation over a dedicated `negotiation` stream
//! - **Fail-fast stream guard**: stream faults before RPC hand-off close the connection
//! - **Diagnostics**: remote candidates by type and the selected candidate pair
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  RPC layer (framing, dispatch)                         │
//! │  ↑ DataStream "data" (id 0) + Connection lifecycle     │
//! │  establish_initiator / establish_responder             │
//! │  ├─ engine: role-specific webrtc API                   │
//! │  ├─ signaling: SDP codec (base64 JSON),                │
//! │  │   candidate codec (protobuf)                        │
//! │  ├─ channels: negotiated streams, ErrorGuard           │
//! │  ├─ peer::negotiation: "negotiation" stream (id 1)     │
//! │  └─ stats: candidate types, selected pair              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rtcrpc_webrtc::PeerConfig;
//!
//! let config = PeerConfig {
//!     disable_trickle: true,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ice_servers.len(), 1);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rtcrpc_webrtc::{establish_initiator, establish_responder, CancelContext, PeerConfig};
//!
//! # async fn example() -> rtcrpc_webrtc::Result<()> {
//! let config = PeerConfig {
//!     disable_trickle: true,
//!     ..PeerConfig::local_only()
//! };
//! let ctx = CancelContext::background();
//!
//! let (client, _client_stream) = establish_initiator(&config, &Default::default(), &ctx).await?;
//! let offer = client.encoded_local_description().await?;
//!
//! let (server, _server_stream) =
//!     establish_responder(&offer, &config, &Default::default(), &ctx).await?;
//! client
//!     .set_remote_answer(&server.encoded_local_description().await?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod peer;
pub mod signaling;
pub mod stats;

pub use channels::{DataStream, DataStreamState, StreamSpec, DATA_STREAM, NEGOTIATION_STREAM};
pub use config::{default_ice_servers, IceServerConfig, PeerConfig, DEFAULT_STUN_URL};
pub use context::{CancelContext, CancelHandle};
pub use engine::{build_api, EngineOptions, Role};
pub use error::{Error, Result};
pub use peer::{
    establish_initiator, establish_responder, Connection, NegotiationState, Politeness,
    SignalingState,
};
pub use signaling::{decode_sdp, encode_sdp, IceCandidate, SdpKind, SessionDescription};
pub use stats::{CandidateCategory, ConnectionStats, SelectedPair};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
