//! Negotiated data streams
//!
//! Every stream of a connection is pre-negotiated: its identifier is fixed by
//! role and never announced in-band. This module provides:
//!
//! - [`DataStream`] - the ordered, reliable handle handed to the RPC layer
//! - [`StreamSpec`] with the well-known [`DATA_STREAM`] and [`NEGOTIATION_STREAM`]
//! - [`ErrorGuard`] - closes the connection on faults before the RPC layer takes over
//!
//! # Example
//!
//! ```ignore
//! use rtcrpc_webrtc::{establish_initiator, CancelContext, PeerConfig};
//!
//! let (connection, stream) =
//!     establish_initiator(&PeerConfig::default(), &Default::default(), &CancelContext::background())
//!         .await?;
//!
//! stream.on_message(|bytes| async move {
//!     tracing::debug!(len = bytes.len(), "rpc frame");
//! });
//! ```

mod data_channel;
mod guard;

pub use data_channel::{
    open_negotiated_stream, DataStream, DataStreamState, DataStreamStats, StreamSpec,
    DATA_STREAM, NEGOTIATION_STREAM,
};
pub use guard::{classify_stream_error, Closer, ErrorGuard, StreamFault};
