//! IDC/ISISDS client for live DAE servers
//!
//! Commands and replies share one framing: an 88-byte header carrying the
//! total length, a payload type tag, up to eleven dimensions and a command
//! name, followed by the payload. Replies put their status (`OK` on
//! success) in the command slot.

mod client;
mod dae;
mod error;
pub mod message;
mod report;
mod socket;
mod types;

pub use client::{DEFAULT_PORT, IdcClient, IdcConfig, REPLY_OK};
pub use dae::{DaeDimensions, DaeSession};
pub use error::ProtocolError;
pub use message::WireMessage;
pub use report::{ErrorReporter, TracingReporter};
pub use socket::IdcSocket;
pub use types::WireType;
