//! Command interpreter tests over a mock station.
//!
//! Run with: cargo test --test command_test

mod common;

use common::{fast_cfg, station};
use meshboard::config::Config;
use meshboard::types::NodeId;

const ALICE: NodeId = NodeId(0xabcd_0001);
const BOB: NodeId = NodeId(0xbbbb_0001);
const MALLORY: NodeId = NodeId(0xdddd_0003);

#[tokio::test]
async fn post_assigns_first_id() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();

    engine.dispatch(ALICE, 0, "p hello").await;

    let sent = st.link.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dest, Some(ALICE));
    assert_eq!(sent[0].text, "posted #1");

    let post = st.sup.store().get_post(1).unwrap().unwrap();
    assert_eq!(post.body, "hello");
    assert_eq!(post.author, ALICE.to_string());
    assert_eq!(post.reply_to, None);
}

#[tokio::test]
async fn read_missing_post_reports_not_found() {
    let st = station(fast_cfg());
    st.sup.engine().dispatch(ALICE, 0, "r 999").await;
    let sent = st.link.take_sent();
    assert_eq!(sent[0].text, "no such post 999");
}

#[tokio::test]
async fn read_rejects_non_numeric_ids() {
    let st = station(fast_cfg());
    st.sup.engine().dispatch(ALICE, 0, "r abc").await;
    assert_eq!(st.link.take_sent()[0].text, "bad id");
    st.sup.engine().dispatch(ALICE, 0, "reply abc hi").await;
    assert_eq!(st.link.take_sent()[0].text, "bad id");
}

#[tokio::test]
async fn reply_flow_and_read_view() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    engine.dispatch(ALICE, 0, "p root post").await;
    st.link.take_sent();

    engine.dispatch(BOB, 0, "reply 1 thanks").await;
    assert_eq!(st.link.take_sent()[0].text, "reply #2 -> #1");

    engine.dispatch(ALICE, 0, "reply 42 nope").await;
    assert_eq!(st.link.take_sent()[0].text, "no such post 42");

    engine.dispatch(ALICE, 0, "r 1").await;
    let view = st.link.take_sent();
    assert_eq!(view.len(), 1);
    assert!(view[0].text.contains("root post"));
    assert!(view[0].text.contains("-> #2"));
    assert!(view[0].text.contains("thanks"));
}

#[tokio::test]
async fn recent_listing_shows_placeholder_then_posts() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();

    engine.dispatch(ALICE, 0, "r").await;
    let sent = st.link.take_sent();
    assert!(sent[0].text.contains("(no posts yet)"));

    engine.dispatch(ALICE, 0, "p first").await;
    st.link.take_sent();
    engine.dispatch(ALICE, 0, "r").await;
    let sent = st.link.take_sent();
    assert!(sent[0].text.contains("#   1"));
    assert!(sent[0].text.contains("first"));
}

#[tokio::test]
async fn admin_bootstrap_then_gate() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    let store = st.sup.store();

    // empty set: anyone may claim the first slot
    engine.dispatch(BOB, 0, "admins add !bbbb0001").await;
    assert_eq!(st.link.take_sent()[0].text, "admin added");
    assert_eq!(store.admins().unwrap(), vec![BOB]);

    // later mutations need admin
    engine.dispatch(MALLORY, 0, "admins add !cccc0002").await;
    assert_eq!(st.link.take_sent()[0].text, "Not authorized.");
    assert_eq!(store.admins().unwrap(), vec![BOB]);

    engine.dispatch(BOB, 0, "admins add !cccc0002").await;
    assert_eq!(st.link.take_sent()[0].text, "admin added");
    assert_eq!(store.admin_count().unwrap(), 2);
}

#[tokio::test]
async fn notice_set_view_and_expiry() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    st.sup.store().admin_add(ALICE).unwrap();

    engine.dispatch(BOB, 0, "info set maintenance at noon").await;
    assert_eq!(st.link.take_sent()[0].text, "Not authorized.");

    engine.dispatch(ALICE, 0, "info set 2 maintenance at noon").await;
    assert_eq!(st.link.take_sent()[0].text, "notice updated");

    engine.dispatch(BOB, 0, "info").await;
    let view = st.link.take_sent();
    assert!(view[0].text.contains("maintenance at noon"));
    assert!(view[0].text.contains("Expires:"));

    // force the notice into the past; it must read as absent
    st.sup.store().set_notice("stale", Some(1)).unwrap();
    engine.dispatch(BOB, 0, "info").await;
    assert_eq!(st.link.take_sent()[0].text, "No notice set.");
}

#[tokio::test]
async fn menu_sends_notice_as_prior_frame() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    st.sup.store().set_notice("net day saturday", None).unwrap();

    engine.dispatch(ALICE, 0, "?").await;
    let sent = st.link.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, "net day saturday");
    assert!(sent[1].text.starts_with("[Meshboard BBS]"));
    assert!(sent[1].text.contains("r list"));
}

#[tokio::test]
async fn unknown_reply_policy() {
    let mut cfg = fast_cfg();
    cfg.unknown_reply = true;
    let st = station(cfg);
    st.sup.engine().dispatch(ALICE, 0, "frobnicate").await;
    assert_eq!(
        st.link.take_sent()[0].text,
        "I didn't recognise that. Send '?' for menu."
    );

    let quiet = station(fast_cfg());
    quiet.sup.engine().dispatch(ALICE, 0, "frobnicate").await;
    assert!(quiet.link.take_sent().is_empty());
}

#[tokio::test]
async fn whois_and_whoami() {
    let st = station(fast_cfg());
    st.link.add_node(ALICE, "alfa", "Alfa Station", Some(meshboard::types::now()));
    st.link.add_node(BOB, "bravo", "Bravo", None);
    let engine = st.sup.engine();

    engine.dispatch(ALICE, 0, "whoami").await;
    assert_eq!(st.link.take_sent()[0].text, "!abcd0001 / alfa / Alfa Station");

    engine.dispatch(ALICE, 0, "whois bravo").await;
    assert_eq!(st.link.take_sent()[0].text, "!bbbb0001 / bravo / Bravo");

    engine.dispatch(ALICE, 0, "whois zulu").await;
    assert_eq!(st.link.take_sent()[0].text, "no node with short 'zulu'");
}

#[tokio::test]
async fn name_and_status_surface_station_identity() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    st.sup.store().admin_add(ALICE).unwrap();

    engine.dispatch(BOB, 0, "name").await;
    assert_eq!(st.link.take_sent()[0].text, "name: Meshboard BBS");

    engine.dispatch(BOB, 0, "name set Hilltop").await;
    assert_eq!(st.link.take_sent()[0].text, "Not authorized.");

    engine.dispatch(ALICE, 0, "name set Hilltop").await;
    assert_eq!(st.link.take_sent()[0].text, "name updated");

    engine.dispatch(BOB, 0, "name").await;
    assert_eq!(st.link.take_sent()[0].text, "name: Hilltop");

    st.link.set_local(NodeId(0x0600_0001), "base", "Hilltop Base");
    engine.dispatch(BOB, 0, "status").await;
    let status = st.link.take_sent()[0].text.clone();
    assert!(status.starts_with("Hilltop Base / base / up "));
}

#[tokio::test]
async fn health_is_gated_unless_public() {
    let st = station(fast_cfg());
    let engine = st.sup.engine();
    engine.dispatch(BOB, 0, "health").await;
    assert_eq!(st.link.take_sent()[0].text, "Not authorized.");

    st.sup.store().admin_add(ALICE).unwrap();
    engine.dispatch(ALICE, 0, "health").await;
    let health = st.link.take_sent()[0].text.clone();
    assert!(health.starts_with("link=ok dev=mock"));
    assert!(health.contains("posts=0"));
    assert!(health.contains("sync=on"));

    let mut cfg = fast_cfg();
    cfg.health_public = true;
    let open = station(cfg);
    open.sup.engine().dispatch(BOB, 0, "health").await;
    assert!(open.link.take_sent()[0].text.starts_with("link=ok"));
}

#[tokio::test]
async fn seeded_admins_and_peers_are_idempotent() {
    let cfg = Config {
        admins: vec![ALICE, ALICE],
        peers: vec![BOB],
        ..fast_cfg()
    };
    let st = station(cfg);
    assert_eq!(st.sup.store().admins().unwrap(), vec![ALICE]);
    assert_eq!(st.sup.store().peers().unwrap(), vec![BOB]);
}
