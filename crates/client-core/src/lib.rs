//! # sipterm client core
//!
//! Session and stream orchestration for an interactive, console-driven
//! communication client. This crate sits between a signaling/media engine
//! and the operator, coordinating:
//!
//! - multiple concurrent sessions and the current selection ([`SessionManager`])
//! - per-session streams, chat, hold and history logging ([`SessionController`])
//! - interactive, cancellable, time-bounded proposal arbitration ([`ProposalArbiter`])
//! - reassembly of chunked file transfers ([`FileTransferReassembler`])
//! - registration-aware shutdown ([`RegistrationTracker`])
//!
//! The engine is consumed purely as an event source
//! ([`EngineEvent`]/[`EventBus`]) and a command sink ([`SignalingEngine`]);
//! the terminal is reached only through the [`Console`] trait. Both are
//! plain trait objects, so the whole layer runs against mocks in tests.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipterm_client_core::{Client, EventBus, Settings};
//! # fn engine_and_console() -> (Arc<dyn sipterm_client_core::SignalingEngine>, Arc<dyn sipterm_client_core::Console>) { unimplemented!() }
//!
//! # async fn example() {
//! let (engine, console) = engine_and_console();
//! let bus = EventBus::default();
//! let client = Client::new(Settings::new(), engine, console, bus.clone());
//! let dispatch = client.start();
//!
//! // ... feed events, run the read loop ...
//!
//! client.shutdown().await;
//! dispatch.abort();
//! # }
//! ```

#![warn(missing_docs)]

pub mod arbiter;
pub mod client;
pub mod commands;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod registration;
pub mod renderer;
pub mod reporter;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use arbiter::{ProposalArbiter, ProposalOutcome};
pub use client::Client;
pub use commands::{CommandDispatcher, CommandSpec, COMMANDS};
pub use config::{AccountSettings, Settings, TraceSettings};
pub use console::{Console, CTRL_D};
pub use engine::{
    AccountId, SessionId, SignalingEngine, SipAddress, StreamId, StreamInfo, StreamKind,
    StreamSpec, TraceCategory,
};
pub use error::{ClientError, ClientResult};
pub use events::{EngineEvent, EventBus, Originator, SessionState};
pub use manager::SessionManager;
pub use registration::RegistrationTracker;
pub use session::{CallDirection, SessionContext, SessionController, Stream};
pub use transfer::{
    ChunkDisposition, FileSelector, FileTransferReassembler, MessageChunk, TransferProgress,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
