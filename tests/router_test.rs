//! Frame pipeline tests: blacklist, dedup rings, rate limiting.
//!
//! Run with: cargo test --test router_test

mod common;

use common::{drive, fast_cfg, station};
use meshboard::config::Config;
use meshboard::radio::RadioEvent;
use meshboard::types::NodeId;

const ALICE: NodeId = NodeId(0xabcd_0001);
const EVE: NodeId = NodeId(0xeeee_0001);

#[tokio::test]
async fn blacklisted_sources_are_silent() {
    let mut st = station(Config { peers: vec![EVE], ..fast_cfg() });
    st.sup.store().blacklist_add(EVE).unwrap();

    st.link.inject_text(EVE, "p should not appear").await;
    st.link.inject_text(EVE, "?").await;
    // even sync control from a blacklisted peer is dropped
    st.link.inject_text(EVE, "#SYNC INV ids=1,2,3").await;
    drive(&mut st).await;

    assert!(st.link.take_sent().is_empty());
    assert_eq!(st.sup.store().post_count().unwrap(), 0);
}

#[tokio::test]
async fn duplicate_packet_ids_process_once() {
    let mut st = station(fast_cfg());
    st.link.inject_frame(ALICE, 0, Some(77), "p once").await;
    st.link.inject_frame(ALICE, 0, Some(77), "p once").await;
    drive(&mut st).await;

    assert_eq!(st.sup.store().post_count().unwrap(), 1);
    assert_eq!(st.link.take_sent().len(), 1);
}

#[tokio::test]
async fn fingerprint_window_suppresses_transport_echo() {
    let mut st = station(fast_cfg());
    // same text through two transports arrives with two packet ids
    st.link.inject_frame(ALICE, 0, Some(1), "p echoed").await;
    st.link.inject_frame(ALICE, 0, Some(2), "p echoed").await;
    drive(&mut st).await;

    assert_eq!(st.sup.store().post_count().unwrap(), 1);
    assert_eq!(st.link.take_sent().len(), 1);
}

#[tokio::test]
async fn rate_limit_allows_one_reply_but_still_flushes() {
    let mut st = station(Config { rate_limit_sec: 30.0, ..fast_cfg() });
    st.sup.store().dm_enqueue(ALICE, None, "waiting", 0, 3600).unwrap();

    st.link.inject_frame(ALICE, 0, Some(1), "r").await;
    st.link.inject_frame(ALICE, 0, Some(2), "status").await;
    drive(&mut st).await;

    let sent = st.link.take_sent();
    let replies: Vec<_> = sent.iter().filter(|f| !f.text.starts_with("[DM]")).collect();
    let dms: Vec<_> = sent.iter().filter(|f| f.text.starts_with("[DM]")).collect();
    // second command suppressed, but both frames flushed the outbox
    assert_eq!(replies.len(), 1, "{:?}", replies);
    assert_eq!(dms.len(), 1);
    assert_eq!(dms[0].text, "[DM] waiting");
}

#[tokio::test]
async fn non_text_frames_only_flush() {
    let mut st = station(fast_cfg());
    st.sup.store().dm_enqueue(ALICE, None, "psst", 0, 3600).unwrap();

    st.link.inject_non_text(ALICE).await;
    drive(&mut st).await;

    let sent = st.link.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "[DM] psst");
}

#[tokio::test]
async fn replies_reuse_the_inbound_channel() {
    let mut st = station(fast_cfg());
    st.link.inject_frame(ALICE, 3, Some(5), "p channeled").await;
    drive(&mut st).await;

    let sent = st.link.take_sent();
    assert_eq!(sent[0].channel, 3);
    assert_eq!(sent[0].text, "posted #1");
}

#[tokio::test]
async fn inbound_stamps_the_receive_clock() {
    let mut st = station(fast_cfg());
    let state = st.sup.link_state();
    let far = meshboard::types::now() + 1000;
    assert!(state.last_rx_age(far) > 900);

    st.link.inject_text(ALICE, "?").await;
    drive(&mut st).await;
    assert!(state.last_rx_age(meshboard::types::now()) <= 1);
}

#[tokio::test]
async fn link_errors_nudge_the_watchdog() {
    let mut st = station(fast_cfg());
    let state = st.sup.link_state();
    let notified = state.reconnect_hint.notified();
    st.router
        .handle_event(RadioEvent::LinkError("usb gone".into()))
        .await;
    // the hint is observable without blocking
    tokio::time::timeout(std::time::Duration::from_millis(50), notified)
        .await
        .expect("reconnect hint");
}

#[tokio::test]
async fn reconnect_resets_the_clock_and_reopens() {
    let st = station(fast_cfg());
    let _ = st.sup.start({
        // fresh channel: the station keeps its own receiver for this test
        let (_tx, rx) = tokio::sync::mpsc::channel(8);
        rx
    });
    st.sup.link_state().reconnect_hint.notify_one();
    // watchdog picks the hint up, closes and reopens the mock link
    for _ in 0..50 {
        if st.link.reopen_count() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(st.link.reopen_count() > 0);
    assert!(st.sup.link_state().last_rx_age(meshboard::types::now()) <= 2);
    st.sup.shutdown().await;
}
