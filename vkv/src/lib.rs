//! Server binary wiring: configuration loading, AUTH, the admin
//! command surface, and the accept-loop/connection-task plumbing that
//! ties the `vkv-*` library crates together into a running server
//! (spec.md §4.7, §5, §6).

pub mod admin;
pub mod auth;
pub mod cluster_commands;
pub mod config;
pub mod gossip_transport;
pub mod resp_client;
pub mod server;

pub use admin::AdminCommands;
pub use auth::AuthGate;
pub use cluster_commands::{ClusterCommands, ClusterState};
pub use config::ServerConfig;
pub use server::Server;
