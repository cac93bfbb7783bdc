//! In-band renegotiation ("perfect negotiation")
//!
//! After the initial handshake, new offers and answers travel over the
//! negotiation stream instead of the signaling channel. Simultaneous offers
//! are resolved by fixed politeness: the polite side rolls back and accepts,
//! the impolite side drops the remote offer and keeps its own.
//!
//! All three state flags live behind one async mutex. An outgoing offer sets
//! `making_offer` under the lock and releases it while the offer is produced,
//! so an inbound offer arriving meanwhile observes the collision.

use crate::engine::Role;
use crate::signaling::{decode_sdp, encode_sdp, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, error};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

/// Collision behaviour of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Politeness {
    /// Rolls back its own offer on collision and accepts the remote one
    Polite,
    /// Drops a colliding remote offer
    Impolite,
}

impl From<Role> for Politeness {
    fn from(role: Role) -> Self {
        match role {
            Role::Initiator => Politeness::Polite,
            Role::Responder => Politeness::Impolite,
        }
    }
}

/// Offer/answer signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            _ => SignalingState::Closed,
        }
    }
}

/// The connection operations renegotiation needs
#[async_trait]
pub trait NegotiationPeer: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    /// The committed local description, with candidates gathered so far
    async fn local_description(&self) -> Result<SessionDescription>;
    fn signaling_state(&self) -> SignalingState;
}

/// Outbound half of the negotiation stream.
///
/// Called with the state lock held, so implementations must only buffer.
#[async_trait]
pub trait NegotiationSender: Send + Sync {
    async fn send_description(&self, encoded: String) -> Result<()>;
}

/// Snapshot of the negotiation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiationState {
    /// The negotiation stream is open
    pub channel_open: bool,
    /// A local offer is being produced
    pub making_offer: bool,
    /// The last inbound offer collided and was dropped
    pub ignore_offer: bool,
}

/// Result of one negotiation event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Negotiation stream not open yet; nothing happened
    Suppressed,
    /// A new offer was committed and sent
    OfferSent,
    /// Producing or sending the offer failed; logged
    Abandoned,
    /// A remote offer was applied and answered
    AnswerSent,
    /// A remote answer was applied
    RemoteApplied,
    /// A colliding remote offer was dropped
    IgnoredOffer,
    /// The message did not decode; dropped
    Malformed,
    /// Applying the remote description or answering failed; logged
    Failed,
}

/// Perfect-negotiation state machine for one connection
pub struct Negotiator<P> {
    peer: P,
    politeness: Politeness,
    sender: OnceLock<Arc<dyn NegotiationSender>>,
    state: Mutex<NegotiationState>,
}

fn logged<T>(result: Result<T>, step: &str) -> Option<T> {
    result
        .map_err(|e| error!(error = %e, "renegotiation: error {}", step))
        .ok()
}

impl<P: NegotiationPeer> Negotiator<P> {
    pub fn new(peer: P, politeness: Politeness) -> Self {
        Self {
            peer,
            politeness,
            sender: OnceLock::new(),
            state: Mutex::new(NegotiationState::default()),
        }
    }

    pub fn politeness(&self) -> Politeness {
        self.politeness
    }

    /// Attach the outbound half of the negotiation stream. Later calls are ignored.
    pub fn attach_sender(&self, sender: Arc<dyn NegotiationSender>) {
        if self.sender.set(sender).is_err() {
            debug!("negotiation sender already attached");
        }
    }

    /// Current flags
    pub async fn state(&self) -> NegotiationState {
        *self.state.lock().await
    }

    /// The negotiation stream reported open
    pub async fn on_channel_open(&self) {
        self.state.lock().await.channel_open = true;
        debug!("negotiation stream open");
    }

    /// Local parameters changed and a new offer is warranted
    pub async fn on_negotiation_needed(&self) -> NegotiationOutcome {
        let sender = {
            let mut state = self.state.lock().await;
            let sender = match self.sender.get() {
                Some(sender) if state.channel_open => Arc::clone(sender),
                _ => {
                    debug!("negotiation needed before negotiation stream is open");
                    return NegotiationOutcome::Suppressed;
                }
            };
            state.making_offer = true;
            sender
        };

        let outcome = match self.send_offer(sender.as_ref()).await {
            Some(()) => NegotiationOutcome::OfferSent,
            None => NegotiationOutcome::Abandoned,
        };

        self.state.lock().await.making_offer = false;
        outcome
    }

    async fn send_offer(&self, sender: &dyn NegotiationSender) -> Option<()> {
        let offer = logged(self.peer.create_offer().await, "creating offer")?;
        logged(
            self.peer.set_local_description(offer).await,
            "setting local description",
        )?;
        let committed = logged(self.peer.local_description().await, "reading local description")?;
        let encoded = logged(encode_sdp(&committed), "encoding offer")?;
        logged(sender.send_description(encoded).await, "sending offer")
    }

    /// A message arrived on the negotiation stream
    pub async fn on_message(&self, message: &str) -> NegotiationOutcome {
        let mut state = self.state.lock().await;

        let Some(desc) = logged(decode_sdp(message), "decoding description") else {
            return NegotiationOutcome::Malformed;
        };

        let offer_collision = desc.is_offer()
            && (state.making_offer || self.peer.signaling_state() != SignalingState::Stable);
        let polite = self.politeness == Politeness::Polite;

        state.ignore_offer = !polite && offer_collision;
        if state.ignore_offer {
            debug!(polite, offer_collision, "ignoring colliding offer");
            return NegotiationOutcome::IgnoredOffer;
        }

        if offer_collision {
            debug!(polite, offer_collision, "rolling back local offer");
            if logged(
                self.peer
                    .set_local_description(SessionDescription::rollback())
                    .await,
                "rolling back local offer",
            )
            .is_none()
            {
                return NegotiationOutcome::Failed;
            }
        }

        let is_offer = desc.is_offer();
        if logged(
            self.peer.set_remote_description(desc).await,
            "setting remote description",
        )
        .is_none()
        {
            return NegotiationOutcome::Failed;
        }

        if !is_offer {
            return NegotiationOutcome::RemoteApplied;
        }

        match self.send_answer().await {
            Some(()) => NegotiationOutcome::AnswerSent,
            None => NegotiationOutcome::Failed,
        }
    }

    async fn send_answer(&self) -> Option<()> {
        let sender = logged(
            self.sender
                .get()
                .cloned()
                .ok_or_else(|| Error::DataChannelError("negotiation stream not attached".into())),
            "sending answer",
        )?;
        let answer = logged(self.peer.create_answer().await, "creating answer")?;
        logged(
            self.peer.set_local_description(answer).await,
            "setting local description",
        )?;
        let committed = logged(self.peer.local_description().await, "reading local description")?;
        let encoded = logged(encode_sdp(&committed), "encoding answer")?;
        logged(sender.send_description(encoded).await, "sending answer")
    }
}

impl<P> std::fmt::Debug for Negotiator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("politeness", &self.politeness)
            .field("sender_attached", &self.sender.get().is_some())
            .finish()
    }
}

/// [`NegotiationPeer`] over the engine's peer connection
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc }
    }
}

#[async_trait]
impl NegotiationPeer for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        SessionDescription::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        SessionDescription::from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("no local description".to_string()))?;
        SessionDescription::from_rtc(&desc)
    }

    fn signaling_state(&self) -> SignalingState {
        self.pc.signaling_state().into()
    }
}

/// [`NegotiationSender`] over the negotiation stream
pub struct ChannelSender {
    channel: Arc<RTCDataChannel>,
}

impl ChannelSender {
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NegotiationSender for ChannelSender {
    async fn send_description(&self, encoded: String) -> Result<()> {
        self.channel
            .send_text(encoded)
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannelError(format!("Failed to send description: {}", e)))
    }
}

impl Negotiator<RtcPeer> {
    /// Route the connection's negotiation-needed events here.
    ///
    /// Each event runs on its own task: the engine raises it from its
    /// operation queue, which the offer/answer calls also use.
    pub fn watch_negotiation_needed(self: &Arc<Self>, pc: &RTCPeerConnection) {
        let negotiator = Arc::downgrade(self);
        pc.on_negotiation_needed(Box::new(move || {
            let negotiator = negotiator.clone();
            Box::pin(async move {
                if let Some(negotiator) = negotiator.upgrade() {
                    tokio::spawn(async move {
                        negotiator.on_negotiation_needed().await;
                    });
                }
            })
        }));
    }

    /// Bind the negotiation stream: open events, inbound messages, outbound sends.
    ///
    /// Inbound messages are handled in arrival order on the stream's own task.
    pub fn attach_channel(self: &Arc<Self>, channel: &Arc<RTCDataChannel>) {
        self.attach_sender(Arc::new(ChannelSender::new(Arc::clone(channel))));

        let negotiator = Arc::downgrade(self);
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                if let Some(negotiator) = negotiator.upgrade() {
                    negotiator.on_channel_open().await;
                }
            })
        }));

        let negotiator = Arc::downgrade(self);
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let negotiator = negotiator.clone();
            Box::pin(async move {
                let Some(negotiator) = negotiator.upgrade() else {
                    return;
                };
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        negotiator.on_message(&text).await;
                    }
                    Err(e) => error!(error = %e, "renegotiation: error decoding description"),
                }
            })
        }));
    }
}
