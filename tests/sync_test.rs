//! Peer replication tests: two stations ferrying sync frames.
//!
//! Run with: cargo test --test sync_test

mod common;

use common::{drive, fast_cfg, station, Station};
use meshboard::config::Config;
use meshboard::radio::mock::SentFrame;
use meshboard::types::NodeId;

const PEER_A: NodeId = NodeId(0xaaaa_0001);
const PEER_B: NodeId = NodeId(0xaaaa_0002);
const USER: NodeId = NodeId(0xcafe_0001);

fn peered_cfg(peer: NodeId) -> Config {
    Config { peers: vec![peer], ..fast_cfg() }
}

/// Ferry every frame `from_station` sent to `dest` into `to_station`'s
/// router, as if the mesh carried it.
async fn ferry(frames: Vec<SentFrame>, dest: NodeId, src: NodeId, to_station: &mut Station) {
    for frame in frames {
        if frame.dest == Some(dest) {
            to_station.link.inject_text(src, &frame.text).await;
        }
    }
    drive(to_station).await;
}

#[tokio::test]
async fn chunked_post_replicates_between_peers() {
    // station A (as seen by B, node PEER_A) posts 240 chars with 160-char chunks
    let a = station(peered_cfg(PEER_B));
    let mut b = station(peered_cfg(PEER_A));
    let body = "abc".repeat(80);

    a.sup.engine().dispatch(USER, 0, &format!("p {}", body)).await;

    let to_b: Vec<SentFrame> =
        a.link.take_sent().into_iter().filter(|f| f.dest == Some(PEER_B)).collect();
    assert_eq!(to_b.len(), 4, "POST, PART 1/2, PART 2/2, END: {:?}", to_b);
    assert!(to_b[0].text.starts_with("#SYNC POST uid="));
    assert!(to_b[0].text.ends_with(" n=2"));
    assert!(to_b[1].text.contains(" 1/2 "));
    assert!(to_b[2].text.contains(" 2/2 "));
    assert!(to_b[3].text.starts_with("#SYNC END uid="));

    ferry(to_b, PEER_B, PEER_A, &mut b).await;

    let store = b.sup.store();
    assert_eq!(store.post_count().unwrap(), 1);
    let post = store.get_post(1).unwrap().unwrap();
    assert_eq!(post.author, format!("[peer]{}", PEER_A));
    assert_eq!(post.body, body);
    assert_eq!(post.reply_to, None);
}

#[tokio::test]
async fn replaying_a_sequence_is_idempotent() {
    let a = station(peered_cfg(PEER_B));
    let mut b = station(peered_cfg(PEER_A));

    a.sup.engine().dispatch(USER, 0, "p hello peers").await;
    let to_b: Vec<SentFrame> =
        a.link.take_sent().into_iter().filter(|f| f.dest == Some(PEER_B)).collect();

    ferry(to_b.clone(), PEER_B, PEER_A, &mut b).await;
    assert_eq!(b.sup.store().post_count().unwrap(), 1);

    // the mesh may retransmit the whole burst
    ferry(to_b, PEER_B, PEER_A, &mut b).await;
    assert_eq!(b.sup.store().post_count().unwrap(), 1);
}

#[tokio::test]
async fn empty_body_still_commits() {
    let mut b = station(peered_cfg(PEER_A));
    for frame in [
        "#SYNC POST uid=emptyuid01 id=9 ts=1700000000 by=!aaaa0001 r=- n=1",
        "#SYNC PART uid=emptyuid01 1/1 ",
        "#SYNC END uid=emptyuid01",
    ] {
        b.link.inject_text(PEER_A, frame).await;
    }
    drive(&mut b).await;

    let post = b.sup.store().get_post(1).unwrap().unwrap();
    assert_eq!(post.body, "");
    assert_eq!(post.author, format!("[peer]{}", PEER_A));
}

#[tokio::test]
async fn inventory_gap_triggers_bounded_gets() {
    let mut b = station(peered_cfg(PEER_A));
    b.link.inject_text(PEER_A, "#SYNC INV ids=1,2,3,4,5").await;
    drive(&mut b).await;

    let gets: Vec<String> = b.link.take_sent().into_iter().map(|f| f.text).collect();
    assert_eq!(
        gets,
        vec!["#SYNC GET id=1", "#SYNC GET id=2", "#SYNC GET id=3"],
        "at most three GETs per INV"
    );
}

#[tokio::test]
async fn get_serves_the_post_back() {
    let mut a = station(peered_cfg(PEER_B));
    a.sup.engine().dispatch(USER, 0, "p served body").await;
    a.link.take_sent();

    a.link.inject_text(PEER_B, "#SYNC GET id=1").await;
    drive(&mut a).await;

    let frames: Vec<SentFrame> = a.link.take_sent();
    assert!(frames[0].text.contains("POST uid="));
    assert!(frames[0].text.contains("id=1"));
    assert!(frames[0].text.contains("by=!cafe0001"));
    assert!(frames.iter().any(|f| f.text.contains(" 1/1 served body")));
    assert!(frames.last().unwrap().text.starts_with("#SYNC END"));
}

#[tokio::test]
async fn sync_from_non_peers_is_ignored() {
    let mut b = station(fast_cfg()); // no peers at all
    b.link.inject_text(PEER_A, "#SYNC INV ids=1,2,3").await;
    b.link
        .inject_text(PEER_A, "#SYNC POST uid=strangeru1 id=1 ts=0 by=!x r=- n=1")
        .await;
    b.link.inject_text(PEER_A, "#SYNC PART uid=strangeru1 1/1 intruder").await;
    b.link.inject_text(PEER_A, "#SYNC END uid=strangeru1").await;
    drive(&mut b).await;

    assert!(b.link.take_sent().is_empty());
    assert_eq!(b.sup.store().post_count().unwrap(), 0);
}

#[tokio::test]
async fn malformed_sync_frames_are_dropped_silently() {
    let mut b = station(peered_cfg(PEER_A));
    for bad in ["#SYNC", "#SYNC BOGUS x=y", "#SYNC GET id=xyz", "#SYNC PART uid=u"] {
        b.link.inject_text(PEER_A, bad).await;
    }
    drive(&mut b).await;
    assert!(b.link.take_sent().is_empty());
}

#[tokio::test]
async fn inventory_broadcast_lists_ascending_ids_per_peer() {
    let a = station(Config { peers: vec![PEER_A, PEER_B], ..fast_cfg() });
    let engine = a.sup.engine();
    for i in 0..3 {
        engine.dispatch(USER, 0, &format!("p post {}", i)).await;
    }
    a.link.take_sent();

    a.sup.peer_sync().broadcast_inventory(a.link.as_ref()).await.unwrap();
    let sent = a.link.take_sent();
    assert_eq!(sent.len(), 2);
    for frame in &sent {
        assert_eq!(frame.text, "#SYNC INV ids=1,2,3");
    }
    let dests: Vec<_> = sent.iter().map(|f| f.dest).collect();
    assert!(dests.contains(&Some(PEER_A)) && dests.contains(&Some(PEER_B)));
}

#[tokio::test]
async fn empty_board_broadcasts_nothing() {
    let a = station(peered_cfg(PEER_B));
    a.sup.peer_sync().broadcast_inventory(a.link.as_ref()).await.unwrap();
    assert!(a.link.take_sent().is_empty());
}

#[tokio::test]
async fn sync_toggle_gates_replication() {
    let a = station(peered_cfg(PEER_B));
    a.sup.peer_sync().set_enabled(false);
    a.sup.engine().dispatch(USER, 0, "p quiet post").await;
    let sent = a.link.take_sent();
    assert_eq!(sent.len(), 1, "only the user reply: {:?}", sent);
    assert_eq!(sent[0].text, "posted #1");
}

#[tokio::test]
async fn payload_too_big_rechunks_until_frames_fit() {
    let a = station(peered_cfg(PEER_B));
    let mut b = station(peered_cfg(PEER_A));
    a.link.set_max_frame(100);

    let body = "xyz".repeat(80); // 240 chars, default 160-char chunks overflow
    a.sup.engine().dispatch(USER, 0, &format!("p {}", body)).await;

    let to_b: Vec<SentFrame> =
        a.link.take_sent().into_iter().filter(|f| f.dest == Some(PEER_B)).collect();
    assert!(to_b.iter().all(|f| f.text.chars().count() <= 100));
    assert!(to_b.iter().filter(|f| f.text.contains("#SYNC PART")).count() >= 3);

    ferry(to_b, PEER_B, PEER_A, &mut b).await;
    // the aborted oversized attempts left shells; exactly one body commits
    assert_eq!(b.sup.store().post_count().unwrap(), 1);
    assert_eq!(b.sup.store().get_post(1).unwrap().unwrap().body, body);
}

#[tokio::test]
async fn replies_replicate_as_standalone_posts() {
    let a = station(peered_cfg(PEER_B));
    let mut b = station(peered_cfg(PEER_A));

    a.sup.engine().dispatch(USER, 0, "p root").await;
    a.sup.engine().dispatch(USER, 0, "reply 1 pong").await;
    let to_b: Vec<SentFrame> =
        a.link.take_sent().into_iter().filter(|f| f.dest == Some(PEER_B)).collect();
    // one sequence for the post, one for the reply
    assert_eq!(to_b.iter().filter(|f| f.text.contains("#SYNC END")).count(), 2);

    ferry(to_b, PEER_B, PEER_A, &mut b).await;
    assert_eq!(b.sup.store().post_count().unwrap(), 2);
    // replicated posts carry no local parent reference
    assert_eq!(b.sup.store().get_post(2).unwrap().unwrap().reply_to, None);
}
