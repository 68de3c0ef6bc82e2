//! hcm-core: Core traits, types, and error definitions for the HCM111Z driver.
//!
//! This crate defines the pieces every other crate in the workspace agrees
//! on. Applications that only consume notifications or inspect errors can
//! depend on it without pulling in the serial stack.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the module
//! - [`NotificationEvent`] -- a parsed unsolicited result code (URC)
//! - [`Error`] / [`Result`] -- error handling
//! - [`types`] -- passive BLE records (connections, services, characteristics)

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::NotificationEvent;
pub use transport::Transport;
pub use types::*;
