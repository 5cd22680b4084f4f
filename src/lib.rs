pub mod ack;
pub mod commands;
pub mod config;
pub mod error;
pub mod outbox;
pub mod pager;
pub mod radio;
pub mod resolve;
pub mod router;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod types;

pub use ack::AckTable;
pub use commands::{Command, Engine};
pub use config::{Args, Config};
pub use error::Error;
pub use outbox::DmOutbox;
pub use radio::{RadioError, RadioEvent, RadioLink};
pub use resolve::{collect_nodes, resolve, Resolution};
pub use router::FrameRouter;
pub use store::Store;
pub use supervisor::{LinkState, Supervisor};
pub use sync::{PeerSync, SyncVerb, SYNC_TAG};
pub use types::*;
