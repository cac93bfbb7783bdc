//! Established connection handle
//!
//! Owned by the establisher until it is handed to the RPC layer, which then
//! owns its lifecycle. Teardown runs once no matter how many times, or from
//! where, [`Connection::close`] is called.

use super::negotiation::{NegotiationState, Negotiator, RtcPeer, SignalingState};
use crate::channels::Closer;
use crate::engine::Role;
use crate::signaling::{
    candidate_from_wire, candidate_to_wire, decode_sdp, encode_sdp, IceCandidate, SdpKind,
    SessionDescription,
};
use crate::stats::{selected_pair_from_engine, ConnectionStats, SelectedPair, StatsSample};
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::sctp_transport::sctp_transport_state::RTCSctpTransportState;

/// A negotiated peer session
pub struct Connection {
    role: Role,
    peer_connection: Arc<RTCPeerConnection>,
    closed: AtomicBool,
    closed_tx: Arc<watch::Sender<bool>>,
    negotiator: Option<Arc<Negotiator<RtcPeer>>>,
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        peer_connection: Arc<RTCPeerConnection>,
        negotiator: Option<Arc<Negotiator<RtcPeer>>>,
    ) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        // A failed connection is as unusable as a closed one
        let unusable_tx = Arc::clone(&closed_tx);
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let unusable_tx = Arc::clone(&unusable_tx);
                Box::pin(async move {
                    debug!(?role, ?state, "peer connection state changed");
                    if matches!(
                        state,
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                    ) {
                        unusable_tx.send_replace(true);
                    }
                })
            },
        ));

        Arc::new(Self {
            role,
            peer_connection,
            closed: AtomicBool::new(false),
            closed_tx,
            negotiator,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the underlying RTCPeerConnection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.peer_connection.signaling_state().into()
    }

    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.peer_connection.ice_connection_state()
    }

    /// Renegotiation flags (responder only)
    pub async fn negotiation_state(&self) -> Option<NegotiationState> {
        match &self.negotiator {
            Some(negotiator) => Some(negotiator.state().await),
            None => None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Produce an offer or answer and commit it as the local description
    pub(crate) async fn commit_local(&self, kind: SdpKind) -> Result<SessionDescription> {
        self.ensure_open()?;

        let desc = match kind {
            SdpKind::Offer => self.peer_connection.create_offer(None).await,
            SdpKind::Answer => self.peer_connection.create_answer(None).await,
            other => {
                return Err(Error::SdpError(format!(
                    "cannot produce a local {:?}",
                    other
                )))
            }
        }
        .map_err(|e| Error::SdpError(format!("Failed to create {:?}: {}", kind, e)))?;

        self.peer_connection
            .set_local_description(desc.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        debug!(role = ?self.role, ?kind, "committed local description");
        SessionDescription::from_rtc(&desc)
    }

    /// Create and commit an offer, returning it encoded (initiator, trickle mode)
    pub async fn create_offer(&self) -> Result<String> {
        encode_sdp(&self.commit_local(SdpKind::Offer).await?)
    }

    /// Create and commit an answer to the applied offer, returning it encoded
    /// (responder, trickle mode)
    pub async fn create_answer(&self) -> Result<String> {
        encode_sdp(&self.commit_local(SdpKind::Answer).await?)
    }

    /// Current local description.
    ///
    /// With trickle disabled this already carries every gathered candidate.
    pub async fn local_description(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("no local description".to_string()))?;
        SessionDescription::from_rtc(&desc)
    }

    /// Current local description, encoded for the signaling channel
    pub async fn encoded_local_description(&self) -> Result<String> {
        encode_sdp(&self.local_description().await?)
    }

    /// Apply the responder's encoded answer (initiator side of the handshake)
    pub async fn set_remote_answer(&self, encoded: &str) -> Result<()> {
        self.ensure_open()?;

        let answer = decode_sdp(encoded)?;
        if !matches!(answer.kind, SdpKind::Answer | SdpKind::Pranswer) {
            return Err(Error::SdpError(format!(
                "expected an answer, got {:?}",
                answer.kind
            )));
        }

        self.peer_connection
            .set_remote_description(answer.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    /// Add a candidate trickled by the remote side
    pub async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.ensure_open()?;

        let init = candidate_from_wire(candidate)?;
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Receive locally gathered candidates in wire form.
    ///
    /// `None` marks the end of gathering.
    pub fn on_local_candidate<F, Fut>(&self, handler: F)
    where
        F: Fn(Option<IceCandidate>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let wire = match candidate.as_ref().map(candidate_to_wire).transpose() {
                        Ok(wire) => wire,
                        Err(e) => {
                            warn!(error = %e, "dropping local candidate");
                            return;
                        }
                    };
                    handler(wire).await;
                })
            }));
    }

    /// Watch ICE connectivity transitions
    pub fn on_connectivity_change<F, Fut>(&self, handler: F)
    where
        F: Fn(RTCIceConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let role = self.role;
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    debug!(?role, %state, "ICE connection state changed");
                    handler(state).await;
                })
            }));
    }

    async fn stats_samples(&self) -> Vec<StatsSample> {
        let report = self.peer_connection.get_stats().await;
        report
            .reports
            .values()
            .map(StatsSample::from_report)
            .collect()
    }

    /// Point-in-time diagnostics
    pub async fn stats(&self) -> Result<ConnectionStats> {
        self.ensure_open()?;
        Ok(ConnectionStats::from_samples(&self.stats_samples().await))
    }

    /// The pair carrying traffic, once ICE is connected and SCTP is up
    pub async fn selected_candidate_pair(&self) -> Option<SelectedPair> {
        if self.is_closed()
            || self.ice_connection_state() != RTCIceConnectionState::Connected
            || self.peer_connection.sctp().state() != RTCSctpTransportState::Connected
        {
            return None;
        }

        let pair = self
            .peer_connection
            .sctp()
            .transport()
            .ice_transport()
            .get_selected_candidate_pair()
            .await?;
        selected_pair_from_engine(&pair, &self.stats_samples().await)
    }

    /// Check if the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve once the connection is closed or has failed
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives as long as self
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the connection. Only the first call tears down.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(role = ?self.role, "closing connection");
        let result = self.peer_connection.close().await;
        self.closed_tx.send_replace(true);

        result.map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

#[async_trait]
impl Closer for Connection {
    async fn close(&self) -> Result<()> {
        Connection::close(self).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}
