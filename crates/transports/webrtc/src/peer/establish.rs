//! Connection establishment for both roles
//!
//! Neither establisher waits for ICE connectivity. With trickle disabled they
//! block until candidate gathering completes so the local description is
//! complete; otherwise the caller exchanges descriptions and candidates
//! through [`Connection`].

use super::connection::Connection;
use super::negotiation::{Negotiator, RtcPeer};
use crate::channels::{
    open_negotiated_stream, Closer, DataStream, ErrorGuard, StreamSpec, DATA_STREAM,
    NEGOTIATION_STREAM,
};
use crate::config::PeerConfig;
use crate::context::CancelContext;
use crate::engine::{build_api, EngineOptions, Role};
use crate::signaling::{decode_sdp, SdpKind};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Dial: create the connection and the `data` stream.
///
/// With `disable_trickle` set, also commits an offer and waits for gathering;
/// read it back with [`Connection::encoded_local_description`].
#[instrument(skip_all, fields(trickle = !config.disable_trickle))]
pub async fn establish_initiator(
    config: &PeerConfig,
    options: &EngineOptions,
    ctx: &CancelContext,
) -> Result<(Arc<Connection>, DataStream)> {
    config.validate()?;

    let peer_connection = new_peer_connection(Role::Initiator, config, options).await?;
    let connection = Connection::new(Role::Initiator, peer_connection, None);

    let stream = guarded(&connection, initiator_setup(&connection, config, ctx)).await?;
    info!("initiator connection established");
    Ok((connection, stream))
}

/// Answer: create the connection, the `data` and `negotiation` streams, and
/// apply the initiator's encoded offer.
///
/// With `disable_trickle` set, also commits the answer and waits for gathering.
/// The connection keeps renegotiating over the `negotiation` stream for its
/// whole life.
#[instrument(skip_all, fields(trickle = !config.disable_trickle))]
pub async fn establish_responder(
    encoded_offer: &str,
    config: &PeerConfig,
    options: &EngineOptions,
    ctx: &CancelContext,
) -> Result<(Arc<Connection>, DataStream)> {
    config.validate()?;

    let peer_connection = new_peer_connection(Role::Responder, config, options).await?;

    // Stream creation can itself raise negotiation-needed
    let negotiator = Arc::new(Negotiator::new(
        RtcPeer::new(Arc::clone(&peer_connection)),
        Role::Responder.into(),
    ));
    negotiator.watch_negotiation_needed(&peer_connection);

    let connection = Connection::new(
        Role::Responder,
        peer_connection,
        Some(Arc::clone(&negotiator)),
    );

    let stream = guarded(
        &connection,
        responder_setup(&connection, &negotiator, encoded_offer, config, ctx),
    )
    .await?;
    info!("responder connection established");
    Ok((connection, stream))
}

async fn new_peer_connection(
    role: Role,
    config: &PeerConfig,
    options: &EngineOptions,
) -> Result<Arc<RTCPeerConnection>> {
    let api = build_api(role, options)?;
    let peer_connection = api
        .new_peer_connection(config.to_rtc_configuration())
        .await
        .map_err(|e| Error::EngineConstruction(format!("Failed to create peer connection: {}", e)))?;
    Ok(Arc::new(peer_connection))
}

/// Run `setup`, closing the connection if it fails
async fn guarded<T>(
    connection: &Arc<Connection>,
    setup: impl Future<Output = Result<T>>,
) -> Result<T> {
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(role = ?connection.role(), error = %e, "establishment failed; closing connection");
            if let Err(close_err) = connection.close().await {
                warn!(error = %close_err, "error closing connection");
            }
            Err(e)
        }
    }
}

async fn initiator_setup(
    connection: &Arc<Connection>,
    config: &PeerConfig,
    ctx: &CancelContext,
) -> Result<DataStream> {
    let data = open_guarded_stream(connection, DATA_STREAM).await?;

    if config.disable_trickle {
        commit_and_gather(connection, SdpKind::Offer, config, ctx).await?;
    }

    Ok(DataStream::new(DATA_STREAM, data))
}

async fn responder_setup(
    connection: &Arc<Connection>,
    negotiator: &Arc<Negotiator<RtcPeer>>,
    encoded_offer: &str,
    config: &PeerConfig,
    ctx: &CancelContext,
) -> Result<DataStream> {
    let data = open_guarded_stream(connection, DATA_STREAM).await?;
    let negotiation = open_guarded_stream(connection, NEGOTIATION_STREAM).await?;
    negotiator.attach_channel(&negotiation);

    let offer = decode_sdp(encoded_offer)?;
    if !offer.is_offer() {
        return Err(Error::SdpError(format!(
            "expected an offer, got {:?}",
            offer.kind
        )));
    }

    connection
        .peer_connection()
        .set_remote_description(offer.to_rtc()?)
        .await
        .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
    debug!("applied remote offer");

    if config.disable_trickle {
        commit_and_gather(connection, SdpKind::Answer, config, ctx).await?;
    }

    Ok(DataStream::new(DATA_STREAM, data))
}

/// Open a negotiated stream whose faults close the connection until the RPC
/// layer installs its own error handler
async fn open_guarded_stream(
    connection: &Arc<Connection>,
    spec: StreamSpec,
) -> Result<Arc<RTCDataChannel>> {
    let channel = open_negotiated_stream(connection.peer_connection(), spec).await?;

    let closer: Arc<dyn Closer> = connection.clone();
    ErrorGuard::new(spec.label, Arc::downgrade(&closer)).attach(&channel);
    Ok(channel)
}

/// Commit a local offer/answer, then wait for gathering or the context
async fn commit_and_gather(
    connection: &Connection,
    kind: SdpKind,
    config: &PeerConfig,
    ctx: &CancelContext,
) -> Result<()> {
    // Subscribe before committing so the completion cannot be missed
    let mut gathered = connection
        .peer_connection()
        .gathering_complete_promise()
        .await;
    connection.commit_local(kind).await?;

    let ctx = match config.gather_timeout() {
        Some(timeout) => ctx.clone().with_timeout(timeout),
        None => ctx.clone(),
    };

    tokio::select! {
        biased;
        err = ctx.done() => {
            debug!(error = %err, "stopped waiting for candidate gathering");
            Err(err)
        }
        _ = gathered.recv() => {
            debug!("candidate gathering complete");
            Ok(())
        }
    }
}
