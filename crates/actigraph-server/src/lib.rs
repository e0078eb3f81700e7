//! # actigraph-server: activity collection daemon
//!
//! This crate provides the TCP server that receives activity event
//! batches from agents over the framed JSON protocol defined in
//! `actigraph-wire`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    actigraph-server                      │
//! │  ┌──────────┐   ┌─────────────┐   ┌───────────────────┐  │
//! │  │ Listener │ → │  Sessions   │ → │   ActivityStore   │  │
//! │  │  (TCP)   │   │ (per-conn)  │   │ (idempotent sink) │  │
//! │  └──────────┘   └──────┬──────┘   └───────────────────┘  │
//! │                        ↓                                 │
//! │                   Registry (user → live connection)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each connection must authenticate with a signed token before any
//! batch is accepted. Batches are ingested idempotently and always
//! acknowledged, so agents can retry freely after lost connections.

mod error;
mod registry;
mod server;
mod session;

pub use error::{ServerError, ServerResult};
pub use registry::{ConnectionHandle, ConnectionId, Registry};
pub use server::{Server, ShutdownHandle};
pub use session::Session;
