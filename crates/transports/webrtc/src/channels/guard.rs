//! Fail-fast error handling for streams not yet owned by the RPC layer

use crate::Result;
use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::{Arc, Weak};
use tracing::error;
use webrtc::data_channel::RTCDataChannel;
use webrtc::{data, sctp};

/// Something the guard can shut down
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// How a stream fault was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFault {
    /// Expected while the connection is torn down; swallowed
    Teardown,
    /// Anything else; the owning connection is closed
    Fatal,
}

/// SCTP faults raised while the association is being torn down: a stream
/// reset sent after the association left the established state, or an ABORT
/// chunk from either side
fn is_teardown(err: &sctp::Error) -> bool {
    matches!(
        err,
        sctp::Error::ErrResetPacketInStateNotExist | sctp::Error::ErrChunk
    )
}

fn sctp_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a sctp::Error> {
    if let Some(e) = err.downcast_ref::<sctp::Error>() {
        return Some(e);
    }
    match err.downcast_ref::<data::Error>() {
        Some(data::Error::Sctp(e)) => return Some(e),
        Some(_) => return None,
        None => {}
    }
    match err.downcast_ref::<webrtc::Error>() {
        Some(webrtc::Error::Sctp(e)) | Some(webrtc::Error::Data(data::Error::Sctp(e))) => Some(e),
        _ => None,
    }
}

/// Classify a stream error by walking its source chain
pub fn classify_stream_error(err: &(dyn StdError + 'static)) -> StreamFault {
    let mut current = Some(err);
    while let Some(e) = current {
        if sctp_cause(e).is_some_and(is_teardown) {
            return StreamFault::Teardown;
        }
        current = e.source();
    }
    StreamFault::Fatal
}

/// Error callback shared by every stream of a connection
///
/// Holds the connection weakly so an attached stream never keeps a dropped
/// connection alive.
pub struct ErrorGuard {
    label: String,
    target: Weak<dyn Closer>,
}

impl ErrorGuard {
    pub fn new(label: impl Into<String>, target: Weak<dyn Closer>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            target,
        })
    }

    /// Handle one stream error
    pub async fn on_error(&self, err: &(dyn StdError + Send + Sync + 'static)) -> StreamFault {
        let fault = classify_stream_error(err);
        if fault == StreamFault::Teardown {
            return fault;
        }

        error!(
            stream = %self.label,
            error = %err,
            "premature data channel error before WebRTC channel association"
        );

        if let Some(target) = self.target.upgrade() {
            if let Err(e) = target.close().await {
                error!(stream = %self.label, "failed to close connection after stream fault: {}", e);
            }
        }
        fault
    }

    /// Install the guard as `channel`'s error callback.
    ///
    /// The close runs on its own task since connection teardown waits on the
    /// stream's read loop, which is the caller of this callback.
    pub fn attach(self: &Arc<Self>, channel: &RTCDataChannel) {
        let guard = Arc::clone(self);
        channel.on_error(Box::new(move |err: webrtc::Error| {
            let guard = Arc::clone(&guard);
            Box::pin(async move {
                tokio::spawn(async move {
                    guard.on_error(&err).await;
                });
            })
        }));
    }
}

impl std::fmt::Debug for ErrorGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorGuard")
            .field("label", &self.label)
            .field("target_alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCloser {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl Closer for CountingCloser {
        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("association failed")]
    struct Wrapped(#[source] webrtc::Error);

    fn guard_for(closer: &Arc<CountingCloser>) -> Arc<ErrorGuard> {
        let as_closer: Arc<dyn Closer> = closer.clone();
        ErrorGuard::new("data", Arc::downgrade(&as_closer))
    }

    #[tokio::test]
    async fn test_teardown_reset_is_swallowed() {
        let closer = Arc::new(CountingCloser::default());
        let guard = guard_for(&closer);

        let err = webrtc::Error::Sctp(sctp::Error::ErrResetPacketInStateNotExist);
        assert_eq!(guard.on_error(&err).await, StreamFault::Teardown);
        assert_eq!(closer.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_chunk_is_swallowed() {
        let closer = Arc::new(CountingCloser::default());
        let guard = guard_for(&closer);

        let err = webrtc::Error::Sctp(sctp::Error::ErrChunk);
        assert_eq!(guard.on_error(&err).await, StreamFault::Teardown);

        // The stream read loop reports SCTP faults wrapped in the data layer error
        let err = webrtc::Error::Data(data::Error::Sctp(sctp::Error::ErrChunk));
        assert_eq!(guard.on_error(&err).await, StreamFault::Teardown);
        assert_eq!(closer.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unrelated_error_closes_once() {
        let closer = Arc::new(CountingCloser::default());
        let guard = guard_for(&closer);

        let err = webrtc::Error::ErrConnectionClosed;
        assert_eq!(guard.on_error(&err).await, StreamFault::Fatal);
        assert_eq!(closer.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_sctp_errors_are_fatal() {
        let closer = Arc::new(CountingCloser::default());
        let guard = guard_for(&closer);

        let err = webrtc::Error::Sctp(sctp::Error::ErrStreamClosed);
        assert_eq!(guard.on_error(&err).await, StreamFault::Fatal);
        assert_eq!(closer.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classification_follows_source_chain() {
        let err = Wrapped(webrtc::Error::Sctp(sctp::Error::ErrResetPacketInStateNotExist));
        assert_eq!(classify_stream_error(&err), StreamFault::Teardown);

        let err = Wrapped(webrtc::Error::ErrConnectionClosed);
        assert_eq!(classify_stream_error(&err), StreamFault::Fatal);
    }

    #[test]
    fn test_bare_sctp_error_is_classified() {
        assert_eq!(
            classify_stream_error(&sctp::Error::ErrChunk),
            StreamFault::Teardown
        );
        assert_eq!(
            classify_stream_error(&data::Error::Sctp(sctp::Error::ErrResetPacketInStateNotExist)),
            StreamFault::Teardown
        );
    }

    #[tokio::test]
    async fn test_dropped_connection_is_not_resurrected() {
        let closer = Arc::new(CountingCloser::default());
        let guard = guard_for(&closer);
        drop(closer);

        let err = webrtc::Error::ErrConnectionClosed;
        assert_eq!(guard.on_error(&err).await, StreamFault::Fatal);
    }
}
