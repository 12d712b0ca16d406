//! Querybot - ClientQuery bridge daemon.
//!
//! This crate bridges a line-oriented, authenticated query socket
//! (TeamSpeak ClientQuery style) to a command/event-driven automation
//! layer: chat commands and server events come in, typed jobs land on
//! module work queues.
//!
//! # Architecture
//!
//! Data flows strictly downward; control (reconnect/error signaling)
//! flows upward:
//!
//! ```text
//! transport bytes → codec → Session → EventListener → Router → module queues
//!                                          ▲
//!                                 Bridge (supervisor):
//!                                 connect attempts, backoff
//!                                 reconnect, re-registration
//! ```
//!
//! # Modules
//!
//! - [`codec`] - pure line parser/formatter for the wire format
//! - [`session`] - one authenticated connection with its state machine
//! - [`listener`] - event registration and the dispatch loop
//! - [`router`] - event/command routing to bounded module queues
//! - [`bridge`] - supervisor owning connect/reconnect policy
//! - [`actions`] - one-shot server calls (move, message, list)
//! - [`worker`] - outbound responder consuming the reply queue
//! - [`config`] - file + environment configuration

// Library modules
pub mod actions;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod listener;
pub mod router;
pub mod session;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use bridge::Bridge;
pub use codec::{Event, ParseError, Response, Row, Status, Value};
pub use config::Config;
pub use listener::{EventListener, ListenerConfig};
pub use router::{Destination, Job, ModuleId, Router, RoutingTable};
pub use session::{
    ConnectCause, QueryError, ReadOutcome, Session, SessionConfig, SessionState,
};
pub use transport::{TcpTransport, Transport};
pub use worker::Responder;
