//! Wire codecs and message templates for the ACE 2 (v6) panel protocol.
//!
//! This crate owns everything that can be computed without a socket:
//!
//! - SLIP framing and the CRC-16 tail check ([`slip`], [`crc`])
//! - serial-number and timestamp codecs ([`serial`], [`timestamp`])
//! - firmware-to-protocol-version mapping ([`version`])
//! - the table-driven message template engine ([`template`])
//! - the static message table ([`messages`])
//! - batch request building and response splitting ([`batch`])
//!
//! Record encryption lives in `atslink-crypto`; sockets, sessions and the
//! protocol state machines live in `atslink-client`.

#![forbid(unsafe_code)]

pub mod batch;
pub mod crc;
pub mod errors;
pub mod messages;
pub mod serial;
pub mod slip;
pub mod template;
pub mod timestamp;
pub mod version;

pub use errors::{ProtocolError, Result};
pub use messages::{EntityKind, SessionPurpose, SetType};
pub use template::{Field, FieldKind, Template, Value};
