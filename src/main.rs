//! Meshboard — bulletin board and store-and-forward messaging beside a
//! LoRa mesh radio.
//!
//! Configuration comes from the environment (see `config`); a few CLI
//! flags override it. The process runs headless until a termination
//! signal arrives.

use clap::Parser;
use meshboard::ack::AckTable;
use meshboard::config::{Args, Config};
use meshboard::radio::console::ConsoleLink;
use meshboard::store::Store;
use meshboard::supervisor::Supervisor;
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meshboard=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::from_env();
    cfg.apply_args(&args);

    info!("════════════════════════════════════════════════════════════");
    info!("  Meshboard v{} — {}", VERSION, cfg.name);
    info!("════════════════════════════════════════════════════════════");
    info!("db: {} | device: {}", cfg.db_path.display(), cfg.device_path);
    if !cfg.admins.is_empty() {
        info!("seed admins: {:?}", cfg.admins);
    }
    if !cfg.peers.is_empty() {
        info!("seed peers: {:?}", cfg.peers);
    }
    info!(
        "rate={}s max_text={} sync={} period={}s",
        cfg.rate_limit_sec, cfg.max_text, cfg.sync, cfg.sync_period
    );

    // the only fatal startup condition
    let store = match Store::open(&cfg.db_path) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot open store at {}: {}", cfg.db_path.display(), e);
            std::process::exit(1);
        }
    };

    let acks = Arc::new(AckTable::new());
    let (link, events) = ConsoleLink::spawn(acks.clone(), &cfg.device_path);

    let supervisor = match Supervisor::new(cfg, store, link, acks) {
        Ok(s) => s,
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };
    let router = supervisor.start(events);

    info!("running; send '?' from any node for the menu");

    tokio::signal::ctrl_c().await.ok();
    supervisor.shutdown().await;
    let _ = router.await;
}
