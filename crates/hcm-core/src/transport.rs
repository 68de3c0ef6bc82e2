//! Transport trait for module communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the BLE module.
//! The serial implementation lives in `hcm-transport`; a scripted mock for
//! tests lives in `hcm-test-harness`.
//!
//! The trait is deliberately byte-oriented. Line framing, and with it the
//! `read_line(timeout)` primitive, is layered on top by `hcm-at-io` so that
//! every transport gets identical CR/LF handling.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the module.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the module.
    ///
    /// Implementations should return only once all bytes have been handed to
    /// the underlying device (serial TX buffer, socket, etc.).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the module into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout` for
    /// data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
