//! TinySIP - minimal SIP B2BUA signaling server
//!
//! Bridges two SIP dialogs per call (the A-leg toward the caller, the
//! B-leg toward the callee), forwarding SDP payloads opaquely between
//! them. Media never flows through the server.

pub mod b2bua;
pub mod builder;
pub mod call;
pub mod config;
pub mod error;
pub mod lexer;
pub mod limits;
pub mod location;
pub mod registrar;
pub mod server;
pub mod transport;
pub mod types;

pub use b2bua::Engine;
pub use call::{Call, CallMap, LegHeaders, MediaState};
pub use config::Config;
pub use error::{SipError, SipResult};
pub use lexer::LexedMessage;
pub use location::{LocationEntry, LocationTable};
pub use server::Server;
pub use transport::{CaptureSender, Outbound, Outgoing, UdpSender};
pub use types::{CallState, Leg, MessageKind, Method};
