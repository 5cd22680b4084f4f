//! Shared harness: an in-process station over the mock transport.

use meshboard::ack::AckTable;
use meshboard::config::Config;
use meshboard::radio::mock::MockLink;
use meshboard::radio::RadioEvent;
use meshboard::router::FrameRouter;
use meshboard::store::Store;
use meshboard::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Station {
    pub sup: Arc<Supervisor>,
    pub link: Arc<MockLink>,
    pub router: FrameRouter,
    pub events: mpsc::Receiver<RadioEvent>,
    pub acks: Arc<AckTable>,
}

pub fn station(cfg: Config) -> Station {
    let store = Store::open_in_memory().expect("in-memory store");
    let acks = Arc::new(AckTable::new());
    let (link, events) = MockLink::new(acks.clone());
    let sup = Supervisor::new(cfg, store, link.clone(), acks.clone()).expect("supervisor");
    let router = sup.router();
    Station { sup, link, router, events, acks }
}

/// Config with the waits zeroed so tests run instantly.
pub fn fast_cfg() -> Config {
    Config {
        rate_limit_sec: 0.0,
        tx_gap: 0.0,
        deliver_wait: 0,
        fallback_sec: 0,
        unknown_reply: false,
        ..Config::default()
    }
}

/// Drain every event injected so far through the router.
pub async fn drive(st: &mut Station) {
    while let Ok(event) = st.events.try_recv() {
        st.router.handle_event(event).await;
    }
}
