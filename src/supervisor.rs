//! Connection lifecycle and background workers.
//!
//! The supervisor owns the stop signal and three long-lived workers: the
//! router loop draining the link's event channel, the gossip tick that
//! broadcasts sync inventory, and the watchdog that reopens the link when
//! inbound goes quiet. Reconnection is mutually exclusive with itself and
//! backs off one second between attempts until the stop signal is set.

use crate::ack::AckTable;
use crate::commands::Engine;
use crate::config::Config;
use crate::error::Error;
use crate::outbox::DmOutbox;
use crate::radio::{candidate_devices, RadioEvent, RadioLink};
use crate::router::FrameRouter;
use crate::store::Store;
use crate::sync::PeerSync;
use crate::types::now;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause between reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Shared link clock: when we last heard anything, when the link came up,
/// and the nudge channel for send-path errors that smell like a dead link.
pub struct LinkState {
    last_rx_at: AtomicI64,
    connected_at: AtomicI64,
    pub reconnect_hint: Notify,
}

impl LinkState {
    pub fn new() -> Self {
        let ts = now();
        Self {
            last_rx_at: AtomicI64::new(ts),
            connected_at: AtomicI64::new(ts),
            reconnect_hint: Notify::new(),
        }
    }

    pub fn touch_rx(&self) {
        self.last_rx_at.store(now(), Ordering::SeqCst);
    }

    pub fn last_rx_age(&self, now: i64) -> i64 {
        (now - self.last_rx_at.load(Ordering::SeqCst)).max(0)
    }

    pub fn mark_connected(&self) {
        let ts = now();
        self.connected_at.store(ts, Ordering::SeqCst);
        self.last_rx_at.store(ts, Ordering::SeqCst);
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at.load(Ordering::SeqCst)
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Supervisor {
    cfg: Arc<Config>,
    store: Arc<Store>,
    link: Arc<dyn RadioLink>,
    engine: Arc<Engine>,
    sync: Arc<PeerSync>,
    outbox: Arc<DmOutbox>,
    state: Arc<LinkState>,
    stop: watch::Sender<bool>,
    reconnect_lock: Mutex<()>,
}

impl Supervisor {
    /// Open the wired store, seed the configured admin and peer sets, and
    /// assemble the engine. The only fatal error here is a store failure.
    pub fn new(
        cfg: Config,
        store: Store,
        link: Arc<dyn RadioLink>,
        acks: Arc<AckTable>,
    ) -> Result<Arc<Self>, Error> {
        for admin in &cfg.admins {
            store.admin_add(*admin)?;
        }
        for peer in &cfg.peers {
            store.peer_add(*peer)?;
        }

        let cfg = Arc::new(cfg);
        let store = Arc::new(store);
        let state = Arc::new(LinkState::new());
        let sync = Arc::new(PeerSync::new(store.clone(), cfg.clone()));
        let outbox = Arc::new(DmOutbox::new(store.clone(), cfg.clone(), acks));
        let engine = Arc::new(Engine::new(
            store.clone(),
            cfg.clone(),
            link.clone(),
            sync.clone(),
            outbox.clone(),
            state.clone(),
        ));
        let (stop, _) = watch::channel(false);

        Ok(Arc::new(Self {
            cfg,
            store,
            link,
            engine,
            sync,
            outbox,
            state,
            stop,
            reconnect_lock: Mutex::new(()),
        }))
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    pub fn peer_sync(&self) -> Arc<PeerSync> {
        self.sync.clone()
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn outbox(&self) -> Arc<DmOutbox> {
        self.outbox.clone()
    }

    pub fn link_state(&self) -> Arc<LinkState> {
        self.state.clone()
    }

    /// A frame router wired to this station's components.
    pub fn router(&self) -> FrameRouter {
        FrameRouter::new(
            self.engine.clone(),
            self.store.clone(),
            self.cfg.clone(),
            self.link.clone(),
            self.sync.clone(),
            self.outbox.clone(),
            self.state.clone(),
        )
    }

    /// Start the router loop, the gossip tick and the watchdog. Returns the
    /// router task handle; it finishes when the stop signal fires or the
    /// link's event channel closes.
    pub fn start(self: &Arc<Self>, events: mpsc::Receiver<RadioEvent>) -> JoinHandle<()> {
        let sup = self.clone();
        tokio::spawn(async move { sup.gossip_loop().await });

        let sup = self.clone();
        tokio::spawn(async move { sup.watchdog_loop().await });

        let sup = self.clone();
        tokio::spawn(async move { sup.router_loop(events).await })
    }

    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.stop.send(true);
        self.link.close().await;
    }

    async fn router_loop(self: Arc<Self>, mut events: mpsc::Receiver<RadioEvent>) {
        let mut router = self.router();
        let mut stop = self.stop.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => router.handle_event(event).await,
                    None => {
                        debug!("event channel closed");
                        break;
                    }
                },
                _ = stop.changed() => break,
            }
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let mut tick = tokio::time::interval(Duration::from_secs(self.cfg.sync_period));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.sync.enabled() {
                        if let Err(e) = self.sync.broadcast_inventory(self.link.as_ref()).await {
                            warn!("inventory broadcast failed: {}", e);
                        }
                    }
                    let ts = now();
                    if let Err(e) = self.store.rxparts_sweep_stale(ts) {
                        warn!("rxparts sweep failed: {}", e);
                    }
                    if let Err(e) = self.store.dm_sweep_expired(ts) {
                        warn!("dm sweep failed: {}", e);
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }

    async fn watchdog_loop(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let mut tick = tokio::time::interval(Duration::from_secs(self.cfg.watch_tick));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let age = self.state.last_rx_age(now());
                    if age > self.cfg.rx_stale_sec as i64 {
                        warn!("no inbound for {}s; reconnecting", age);
                        self.reconnect().await;
                    }
                }
                _ = self.state.reconnect_hint.notified() => {
                    self.reconnect().await;
                }
                _ = stop.changed() => break,
            }
        }
    }

    /// Close and reopen the link, retrying until it comes back or the stop
    /// signal is set. Concurrent triggers collapse into one attempt.
    async fn reconnect(&self) {
        let Ok(_guard) = self.reconnect_lock.try_lock() else {
            return;
        };
        self.link.close().await;
        let stop = self.stop.subscribe();
        loop {
            if *stop.borrow() {
                return;
            }
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            let cands = candidate_devices(&self.cfg.device_path);
            debug!("reopening link (candidates: {:?})", cands);
            match self.link.reopen().await {
                Ok(()) => {
                    self.state.mark_connected();
                    info!("link reopened");
                    return;
                }
                Err(e) => warn!("reopen failed: {}", e),
            }
        }
    }
}
