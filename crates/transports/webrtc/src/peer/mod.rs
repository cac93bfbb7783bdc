//! Peer connection establishment and renegotiation
//!
//! Handles both handshake roles, the connection handle, and the in-band
//! perfect-negotiation state machine.

pub mod connection;
pub mod establish;
pub mod negotiation;

pub use connection::Connection;
pub use establish::{establish_initiator, establish_responder};
pub use negotiation::{
    ChannelSender, NegotiationOutcome, NegotiationPeer, NegotiationSender, NegotiationState,
    Negotiator, Politeness, RtcPeer, SignalingState,
};
