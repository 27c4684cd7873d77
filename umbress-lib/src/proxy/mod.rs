//! Reverse proxy that fronts one upstream with the firewall.

pub mod forwarding;
pub mod server;

pub use forwarding::{bad_gateway, create_client, forward};
pub use server::run;
