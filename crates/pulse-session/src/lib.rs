//! Pulse Session - per-connection protocol handling
//!
//! One `Session` per connected client, driven as its own task with an
//! explicit inbound queue and state machine. The surrounding transport
//! (whatever speaks the wire protocol) feeds raw message text in and drains
//! the notice receiver out; the session drives the engine components and
//! pushes results back through the registry.

pub mod session;

pub use session::{Session, SessionConfig, SessionState};
