//! First-time pairing against the simulated pump.

mod common;

use std::time::Duration;

use common::{SimLink, SimPump, states_until};
use insight_link::client::PumpConfigBuilder;
use insight_link::core::{PAIRING_CONFIRMED, PAIRING_PENDING, PAIRING_REJECTED};
use insight_link::storage::MemoryPairingStore;
use insight_link::transport::SatlCommand;
use insight_link::{ConnectionLock, ConnectionState, InsightPump, SessionError};

use ConnectionState::*;

#[tokio::test]
async fn test_fresh_pairing_reaches_connected() {
    let (link, mut streams) = SimLink::new();
    let store = MemoryPairingStore::new();
    let pump = InsightPump::builder(link).store(store.clone()).spawn();
    let mut states = pump.subscribe().await.unwrap();

    let lock = ConnectionLock::new();
    pump.request_connection(lock).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;

    let code = sim.pair_until_display().await;
    let seen = states_until(&mut states, WaitingForCodeConfirmation).await;
    assert_eq!(
        seen,
        vec![
            Disconnected,
            Connecting,
            ConnectionRequest,
            KeyRequest,
            VerifyDisplayRequest,
            WaitingForCodeConfirmation,
        ]
    );
    assert_eq!(pump.verification_code().await.unwrap(), Some(code.clone()));
    assert_eq!(code.len(), 12);
    assert!(!store.is_paired());

    pump.confirm_code().await.unwrap();
    sim.answer_confirm(PAIRING_CONFIRMED).await;
    sim.bind().await;

    let seen = states_until(&mut states, Connected).await;
    assert_eq!(seen, vec![VerifyConfirmRequest, AppBind, Connected]);

    let status = pump.status().await.unwrap();
    assert!(status.is_paired);
    assert!(status.last_failure.is_none());
    assert_eq!(pump.verification_code().await.unwrap(), None);

    let client = pump.pairing_data().await.unwrap().unwrap();
    let pump_view = sim.session.clone().unwrap();
    assert_eq!(client.comm_id, common::PUMP_COMM_ID);
    assert_eq!(client.incoming_key, pump_view.outgoing_key);
    assert_eq!(client.last_sent_nonce, pump_view.last_received_nonce);
    assert_eq!(client.last_received_nonce, pump_view.last_sent_nonce);

    assert!(store.is_paired());
    assert_eq!(store.load(), Some(client));
}

#[tokio::test]
async fn test_pending_confirmation_is_polled() {
    let (link, mut streams) = SimLink::new();
    let config = PumpConfigBuilder::new()
        .verification_heartbeat(Duration::from_millis(20))
        .build();
    let pump = InsightPump::builder(link).config(config).spawn();
    let mut states = pump.subscribe().await.unwrap();

    pump.request_connection(ConnectionLock::new()).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;
    sim.pair_until_display().await;
    assert!(states.wait_for(WaitingForCodeConfirmation).await);

    pump.confirm_code().await.unwrap();
    sim.answer_confirm(PAIRING_PENDING).await;
    sim.answer_confirm(PAIRING_PENDING).await;
    sim.answer_confirm(PAIRING_CONFIRMED).await;
    sim.bind().await;

    let seen = states_until(&mut states, Connected).await;
    assert_eq!(
        seen,
        vec![
            VerifyConfirmRequest,
            VerifyConfirmRequest,
            VerifyConfirmRequest,
            AppBind,
            Connected,
        ]
    );
}

#[tokio::test]
async fn test_operator_rejects_code() {
    let (link, mut streams) = SimLink::new();
    let store = MemoryPairingStore::new();
    let pump = InsightPump::builder(link).store(store.clone()).spawn();
    let mut states = pump.subscribe().await.unwrap();

    let lock = ConnectionLock::new();
    pump.request_connection(lock).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;
    sim.pair_until_display().await;
    assert!(states.wait_for(WaitingForCodeConfirmation).await);

    pump.reject_code().await.unwrap();
    assert_eq!(states.recv().await, Some(Disconnected));
    assert!(sim.try_recv_packet().await.is_none());

    let status = pump.status().await.unwrap();
    assert!(!status.is_paired);
    assert!(matches!(
        status.last_failure.as_deref(),
        Some(SessionError::PairingRejected)
    ));
    assert_eq!(pump.pairing_data().await.unwrap(), None);
    assert!(!store.is_paired());
    assert_eq!(store.load(), None);
}

#[tokio::test]
async fn test_pump_rejects_code() {
    let (link, mut streams) = SimLink::new();
    let store = MemoryPairingStore::new();
    let pump = InsightPump::builder(link).store(store.clone()).spawn();
    let mut states = pump.subscribe().await.unwrap();

    pump.request_connection(ConnectionLock::new()).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;
    sim.pair_until_display().await;
    assert!(states.wait_for(WaitingForCodeConfirmation).await);

    pump.confirm_code().await.unwrap();
    sim.answer_confirm(PAIRING_REJECTED).await;

    // unpaired sessions do not retry
    let seen = states_until(&mut states, Disconnected).await;
    assert_eq!(seen, vec![VerifyConfirmRequest, Disconnected]);
    let failure = pump.last_failure().await.unwrap().unwrap();
    assert!(failure.is_pairing_failure());
    assert!(!store.is_paired());
}

#[tokio::test]
async fn test_incompatible_version() {
    let (link, mut streams) = SimLink::new();
    let pump = InsightPump::builder(link).spawn();
    let mut states = pump.subscribe().await.unwrap();
    assert_eq!(states.recv().await, Some(Disconnected));

    pump.request_connection(ConnectionLock::new()).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;
    let request = sim.recv_packet().await;
    assert_eq!(
        hex::encode(request.as_bytes()),
        "88cceeff1f00e0ff200902000000000000000000000000000000000000097d0000000000000000"
    );
    sim.send_unkeyed(SatlCommand::ConnectionResponse, &[1]).await;

    let seen = states_until(&mut states, Disconnected).await;
    assert_eq!(seen, vec![Connecting, ConnectionRequest, Disconnected]);
    assert!(matches!(
        pump.last_failure().await.unwrap().as_deref(),
        Some(SessionError::IncompatibleVersion)
    ));
}

#[tokio::test]
async fn test_corrupted_crc_during_pairing() {
    let (link, mut streams) = SimLink::new();
    let pump = InsightPump::builder(link).spawn();
    let mut states = pump.subscribe().await.unwrap();

    pump.request_connection(ConnectionLock::new()).await.unwrap();
    let mut sim = SimPump::accept(&mut streams, None).await;
    sim.expect(SatlCommand::ConnectionRequest).await;

    let mut packet = insight_link::transport::encode_packet(
        SatlCommand::ConnectionResponse,
        common::PUMP_COMM_ID,
        &[0],
        None,
    )
    .unwrap();
    packet[29] ^= 0xFF;
    sim.send_raw(&packet).await;

    assert!(states.wait_for(ConnectionRequest).await);
    assert!(states.wait_for(Disconnected).await);
    let failure = pump.last_failure().await.unwrap().unwrap();
    assert!(matches!(
        *failure,
        SessionError::Frame(insight_link::core::FrameError::InvalidCrc { .. })
    ));
}
