//! Async client for ACE 2 (v6) alarm panels.
//!
//! One [`Client`] owns one TCP connection. The session is built in
//! layers: the transport multiplexer serializes commands over the socket
//! and routes unsolicited frames away from response waiters; the
//! handshake negotiates the session key and logs in; queries populate the
//! entity inventory and status cache; control sessions scope every
//! mutating verb; the monitor turns change-of-state notifications into
//! typed [`ChangeEvent`]s; and the event log streams decoded records.
//!
//! ```no_run
//! use atslink_client::{Auth, CancelToken, Client, ClientConfig};
//!
//! # async fn demo() -> Result<(), atslink_client::ClientError> {
//! let config = ClientConfig::new("192.168.1.50", 3001, "A".repeat(24), Auth::Pin("1234".into()));
//! let mut client = Client::connect(config).await?;
//! client.load_inventory().await?;
//!
//! let outcome = client
//!     .arm(&[1], atslink_proto::SetType::Full, false, &CancelToken::none())
//!     .await?;
//! println!("armed: {}", outcome.is_armed());
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod cancel;
mod client;
mod config;
mod control;
mod error;
mod eventlog;
mod inventory;
mod monitor;
mod panel;
mod status;
mod transport;

pub use atslink_proto::{EntityKind, SetType};
pub use cancel::{CancelToken, Canceller, cancel_pair};
pub use client::{Client, NameMap};
pub use config::{Auth, ClientConfig};
pub use control::{ArmOutcome, ControlOutcome, DoorOp};
pub use error::ClientError;
pub use eventlog::{EventLogRecord, EventLogStream};
pub use inventory::Inventory;
pub use monitor::ChangeEvent;
pub use panel::PanelInfo;
pub use status::{EntityStatus, decode_flags, door_is_locked, flag_table};
