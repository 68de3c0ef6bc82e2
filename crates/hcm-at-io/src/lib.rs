//! Shared AT command IO for the HCM111Z driver.
//!
//! This crate provides the single-IO-task pattern for the module's CR+LF
//! terminated AT protocol. One tokio task owns the transport exclusively and
//! handles command/response exchanges, unsolicited `+QBLE...` notifications
//! that interleave with them, raw transparent-mode data, and graceful
//! shutdown.
//!
//! # Architecture
//!
//! - [`protocol`] -- command encoding, line framing, notification parsing
//! - [`reader`] -- `read_line(timeout)` on top of a byte transport
//! - [`dispatch`] -- handler registration and notification fan-out
//! - [`io`] -- IO task types, spawn, and the select loop

pub mod dispatch;
pub mod io;
pub mod protocol;
pub mod reader;

pub use dispatch::{HandlerSlot, NotificationHandler};
pub use io::{AtIo, IoConfig, IoHealthSnapshot};
pub use protocol::{Arg, Command, CommandForm};
