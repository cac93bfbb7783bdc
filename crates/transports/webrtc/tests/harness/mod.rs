//! Loopback test harness
//!
//! Runs an initiator and a responder in one process and carries the
//! signaling exchange in memory.

#![allow(dead_code)]

use rtcrpc_webrtc::signaling::{decode_candidate, encode_candidate};
use rtcrpc_webrtc::{
    establish_initiator, establish_responder, CancelContext, Connection, DataStream,
    EngineOptions, PeerConfig, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,rtcrpc_webrtc=debug")
        .try_init();
}

/// Host and loopback candidates only, bounded gathering
pub fn local_config(disable_trickle: bool) -> PeerConfig {
    PeerConfig {
        disable_trickle,
        gather_timeout_ms: Some(10_000),
        ..PeerConfig::local_only()
    }
}

/// Both ends of an established connection
pub struct LoopbackPair {
    pub initiator: Arc<Connection>,
    pub initiator_stream: DataStream,
    pub responder: Arc<Connection>,
    pub responder_stream: DataStream,
}

impl LoopbackPair {
    /// Complete descriptions, no candidate exchange
    pub async fn gather_first() -> Result<Self> {
        let config = local_config(true);
        let options = EngineOptions::default();
        let ctx = CancelContext::background();

        let (initiator, initiator_stream) = establish_initiator(&config, &options, &ctx).await?;
        let offer = initiator.encoded_local_description().await?;

        let (responder, responder_stream) =
            establish_responder(&offer, &config, &options, &ctx).await?;
        let answer = responder.encoded_local_description().await?;
        initiator.set_remote_answer(&answer).await?;

        Ok(Self {
            initiator,
            initiator_stream,
            responder,
            responder_stream,
        })
    }

    /// Trickled candidates carried as encoded wire messages
    pub async fn trickle() -> Result<Self> {
        let config = local_config(false);
        let options = EngineOptions::default();
        let ctx = CancelContext::background();

        let (initiator, initiator_stream) = establish_initiator(&config, &options, &ctx).await?;
        let from_initiator = collect_candidates(&initiator);
        let offer = initiator.create_offer().await?;

        let (responder, responder_stream) =
            establish_responder(&offer, &config, &options, &ctx).await?;
        let from_responder = collect_candidates(&responder);
        let answer = responder.create_answer().await?;
        initiator.set_remote_answer(&answer).await?;

        forward_candidates(from_initiator, Arc::clone(&responder));
        forward_candidates(from_responder, Arc::clone(&initiator));

        Ok(Self {
            initiator,
            initiator_stream,
            responder,
            responder_stream,
        })
    }

    /// Wait until both data streams are open
    pub async fn wait_open(&self, timeout: Duration) -> std::result::Result<(), String> {
        tokio::time::timeout(timeout, async {
            while !(self.initiator_stream.is_open() && self.responder_stream.is_open()) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .map_err(|_| {
            format!(
                "streams not open after {:?}: initiator={:?} responder={:?}",
                timeout,
                self.initiator_stream.state(),
                self.responder_stream.state()
            )
        })
    }

    pub async fn shutdown(self) {
        let _ = self.initiator.close().await;
        let _ = self.responder.close().await;
    }
}

fn collect_candidates(connection: &Connection) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.on_local_candidate(move |candidate| {
        let tx = tx.clone();
        async move {
            if let Some(candidate) = candidate {
                let _ = tx.send(encode_candidate(&candidate));
            }
        }
    });
    rx
}

fn forward_candidates(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, to: Arc<Connection>) {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let result = match decode_candidate(&bytes) {
                Ok(candidate) => to.add_remote_candidate(&candidate).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(error = %e, "failed to forward candidate");
            }
        }
    });
}
