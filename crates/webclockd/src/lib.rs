//! webclock daemon - focus tracker, usage store and socket server
//!
//! This crate provides the runtime pieces of the webclock daemon:
//! - `tracker` - Actor owning the open session and the usage buffer
//! - `store` - Key-value persistence for usage, settings and constraints
//! - `host` - Host browser abstraction and the mirror fed by host reports
//! - `server` - Unix socket server for host bridges and CLI clients
//! - `client` - Request/response client for the socket
//! - `config` - Socket, state, PID and log paths
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      webclockd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│     TrackerActor            │   │
//! │  │ (Unix Socket)   │     │  (session + buffer owner)   │   │
//! │  └────────┬────────┘     └──────┬───────────────┬──────┘   │
//! │           │                     │ queries       │ flush    │
//! │           │ host reports        ▼               ▼          │
//! │  ┌─────────────────┐     ┌─────────────┐ ┌─────────────┐   │
//! │  │   HostMirror    │◀────│  dyn Host   │ │ StateStore  │   │
//! │  └─────────────────┘     └─────────────┘ └─────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod client;
pub mod config;
pub mod host;
pub mod server;
pub mod store;
pub mod tracker;
