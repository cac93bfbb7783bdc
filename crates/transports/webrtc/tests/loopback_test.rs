//! Loopback connectivity tests
//!
//! These bring up a full ICE/DTLS/SCTP session between two in-process peers
//! and need working local UDP networking.
//!
//! ```bash
//! cargo test --test loopback_test -- --ignored --nocapture
//! ```

mod harness;

use bytes::Bytes;
use harness::{init_logging, LoopbackPair};
use rtcrpc_webrtc::channels::open_negotiated_stream;
use rtcrpc_webrtc::{decode_sdp, SdpKind, SignalingState, NEGOTIATION_STREAM};
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

const OPEN_TIMEOUT: Duration = Duration::from_secs(20);

async fn round_trip(pair: &LoopbackPair) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    pair.responder_stream.on_message(move |data| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(data);
        }
    });

    pair.initiator_stream.send(b"ping").await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message not delivered")
        .unwrap();
    assert_eq!(&received[..], b"ping");

    assert_eq!(pair.initiator_stream.stats().messages_sent, 1);
    assert_eq!(pair.responder_stream.stats().bytes_received, 4);
}

#[tokio::test]
#[ignore] // needs local UDP networking
async fn test_gather_first_pair_connects() {
    init_logging();

    let pair = LoopbackPair::gather_first().await.unwrap();
    pair.wait_open(OPEN_TIMEOUT).await.unwrap();

    round_trip(&pair).await;

    let state = pair.responder.negotiation_state().await.unwrap();
    assert!(state.channel_open);

    let stats = pair.responder.stats().await.unwrap();
    assert!(!stats.id.is_empty());
    assert!(!stats.remote_candidates.is_empty());

    let selected = pair.initiator.selected_candidate_pair().await;
    assert!(selected.is_some(), "no selected pair once connected");

    pair.shutdown().await;
}

#[tokio::test]
#[ignore] // needs local UDP networking
async fn test_trickle_pair_connects() {
    init_logging();

    let pair = LoopbackPair::trickle().await.unwrap();
    pair.wait_open(OPEN_TIMEOUT).await.unwrap();

    round_trip(&pair).await;

    pair.shutdown().await;
}

#[tokio::test]
#[ignore] // needs local UDP networking
async fn test_closing_one_side_leaves_other_usable_for_close() {
    init_logging();

    let pair = LoopbackPair::gather_first().await.unwrap();
    pair.wait_open(OPEN_TIMEOUT).await.unwrap();

    pair.initiator.close().await.unwrap();
    assert!(!pair.initiator_stream.is_open());
    assert!(pair.initiator_stream.send(b"late").await.is_err());

    pair.responder.close().await.unwrap();
    pair.responder.close().await.unwrap();
}

#[tokio::test]
#[ignore] // needs local UDP networking
async fn test_renegotiation_over_negotiation_stream() {
    init_logging();

    let pair = LoopbackPair::gather_first().await.unwrap();
    pair.wait_open(OPEN_TIMEOUT).await.unwrap();

    // The initiator binds its end of the responder's negotiation stream
    let negotiation = open_negotiated_stream(pair.initiator.peer_connection(), NEGOTIATION_STREAM)
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    negotiation.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(String::from_utf8_lossy(&msg.data).into_owned());
        })
    }));

    tokio::time::timeout(Duration::from_secs(5), async {
        while negotiation.ready_state() != RTCDataChannelState::Open {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("negotiation stream not open");

    let offer = pair.initiator.create_offer().await.unwrap();
    negotiation.send_text(offer).await.unwrap();

    let encoded = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no answer on the negotiation stream")
        .unwrap();
    let answer = decode_sdp(&encoded).unwrap();
    assert_eq!(answer.kind, SdpKind::Answer);
    assert!(answer.sdp.contains("m=application"));

    pair.initiator.set_remote_answer(&encoded).await.unwrap();
    assert_eq!(pair.initiator.signaling_state(), SignalingState::Stable);
    assert_eq!(pair.responder.signaling_state(), SignalingState::Stable);

    // Exactly one answer per offer
    assert!(
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .is_err(),
        "unexpected second description"
    );

    let state = pair.responder.negotiation_state().await.unwrap();
    assert!(!state.ignore_offer);
    assert!(!state.making_offer);

    round_trip(&pair).await;
    pair.shutdown().await;
}
