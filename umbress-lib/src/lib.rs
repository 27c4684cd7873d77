#![forbid(unsafe_code)]

pub mod challenge;
pub mod config;
pub mod error;
pub mod firewall;
pub mod proxy;
pub mod reputation;
pub mod security;
pub mod store;
pub mod telemetry;

pub use config::{load_from_path, Config, FirewallConfig};
pub use error::{FirewallError, Result};
pub use firewall::{Firewall, FirewallBuilder, RespBody};
pub use proxy::run;
pub use store::{MemoryStore, Store};
