//! Pre-negotiated data streams
//!
//! Both streams of a connection are created with fixed identifiers agreed by
//! role, so neither side waits for an in-band channel announcement.

use crate::{Error, Result};
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Label and fixed identifier of a negotiated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub label: &'static str,
    pub id: u16,
}

/// Carries RPC bytes
pub const DATA_STREAM: StreamSpec = StreamSpec {
    label: "data",
    id: 0,
};

/// Carries encoded descriptions for renegotiation (responder side)
pub const NEGOTIATION_STREAM: StreamSpec = StreamSpec {
    label: "negotiation",
    id: 1,
};

/// Open an ordered, reliable stream with a pre-agreed identifier
pub async fn open_negotiated_stream(
    peer_connection: &RTCPeerConnection,
    spec: StreamSpec,
) -> Result<Arc<RTCDataChannel>> {
    let init = RTCDataChannelInit {
        ordered: Some(true),
        negotiated: Some(spec.id),
        ..Default::default()
    };

    let channel = peer_connection
        .create_data_channel(spec.label, Some(init))
        .await
        .map_err(|e| {
            Error::DataChannelError(format!("Failed to create '{}' stream: {}", spec.label, e))
        })?;

    debug!(label = spec.label, id = spec.id, "opened negotiated stream");
    Ok(channel)
}

/// Data stream state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStreamState {
    /// Stream is being created
    Connecting,
    /// Stream is open and ready for messages
    Open,
    /// Stream is closing
    Closing,
    /// Stream is closed
    Closed,
}

impl From<RTCDataChannelState> for DataStreamState {
    fn from(state: RTCDataChannelState) -> Self {
        match state {
            RTCDataChannelState::Open => DataStreamState::Open,
            RTCDataChannelState::Closing => DataStreamState::Closing,
            RTCDataChannelState::Closed => DataStreamState::Closed,
            _ => DataStreamState::Connecting,
        }
    }
}

/// Stream statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataStreamStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Messages sent count
    pub messages_sent: u64,
    /// Messages received count
    pub messages_received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

/// Ordered, reliable byte stream handed to the RPC layer
///
/// Cloning shares the underlying channel and counters.
#[derive(Clone)]
pub struct DataStream {
    spec: StreamSpec,
    rtc_channel: Arc<RTCDataChannel>,
    counters: Arc<Counters>,
}

impl DataStream {
    pub(crate) fn new(spec: StreamSpec, rtc_channel: Arc<RTCDataChannel>) -> Self {
        Self {
            spec,
            rtc_channel,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Stream label
    pub fn label(&self) -> &str {
        self.spec.label
    }

    /// Fixed stream identifier
    pub fn id(&self) -> u16 {
        self.spec.id
    }

    /// Current state
    pub fn state(&self) -> DataStreamState {
        self.rtc_channel.ready_state().into()
    }

    /// Check if the stream is open
    pub fn is_open(&self) -> bool {
        self.state() == DataStreamState::Open
    }

    /// Send raw bytes
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        let sent = self
            .rtc_channel
            .send(&Bytes::copy_from_slice(data))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send: {}", e)))?;

        self.counters
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    /// Send a UTF-8 string message
    pub async fn send_text(&self, text: impl Into<String>) -> Result<usize> {
        self.ensure_open()?;

        let sent = self
            .rtc_channel
            .send_text(text.into())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send text: {}", e)))?;

        self.counters
            .bytes_sent
            .fetch_add(sent as u64, Ordering::Relaxed);
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    fn ensure_open(&self) -> Result<()> {
        let state = self.state();
        if state != DataStreamState::Open {
            return Err(Error::DataChannelError(format!(
                "Stream '{}' is not open (state: {:?})",
                self.spec.label, state
            )));
        }
        Ok(())
    }

    /// Set the handler for incoming messages
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let handler = Arc::new(handler);

        self.rtc_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let counters = Arc::clone(&counters);
                let handler = Arc::clone(&handler);

                Box::pin(async move {
                    counters
                        .bytes_received
                        .fetch_add(msg.data.len() as u64, Ordering::Relaxed);
                    counters.messages_received.fetch_add(1, Ordering::Relaxed);
                    handler(msg.data).await;
                })
            }));
    }

    /// Set the handler fired once the stream opens
    pub fn on_open<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.rtc_channel
            .on_open(Box::new(move || Box::pin(handler())));
    }

    /// Set the handler fired when the stream closes
    pub fn on_close<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.rtc_channel.on_close(Box::new(move || {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler().await })
        }));
    }

    /// Replace the error handler.
    ///
    /// Until this is called the stream carries the connection's
    /// [`ErrorGuard`](crate::channels::ErrorGuard), which closes the whole
    /// connection on any non-teardown fault.
    pub fn on_error<F, Fut>(&self, handler: F)
    where
        F: Fn(webrtc::Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.rtc_channel.on_error(Box::new(move |err| {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler(err).await })
        }));
    }

    /// Snapshot of the byte/message counters
    pub fn stats(&self) -> DataStreamStats {
        DataStreamStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
        }
    }

    /// Get the underlying RTCDataChannel
    pub fn rtc_channel(&self) -> &Arc<RTCDataChannel> {
        &self.rtc_channel
    }

    /// Close the stream (the connection stays up)
    pub async fn close(&self) -> Result<()> {
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close stream: {}", e)))?;

        debug!("Stream '{}' closed", self.spec.label);
        Ok(())
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("label", &self.spec.label)
            .field("id", &self.spec.id)
            .field("state", &self.state())
            .finish()
    }
}
