//! Hcm111zBuilder -- fluent builder for constructing [`Hcm111z`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, timeouts, and notification handling before the
//! IO task takes over the transport.
//!
//! # Example
//!
//! ```no_run
//! use hcm111z::builder::Hcm111zBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> hcm_core::Result<()> {
//! let module = Hcm111zBuilder::new()
//!     .serial_port("/dev/ttyS3")
//!     .baud_rate(115_200)
//!     .command_timeout(Duration::from_secs(2))
//!     .build()
//!     .await?;
//! println!("{}", module.get_version().await?);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use hcm_at_io::io::IoConfig;
use hcm_core::error::{Error, Result};
use hcm_core::transport::Transport;
use hcm_transport::{SerialTransport, DEFAULT_BAUD_RATE};

use crate::device::Hcm111z;

/// Default wait for a command response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default quiet period on each side of the `+++` escape.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Fluent builder for [`Hcm111z`].
///
/// Every setting has a default matching the module's factory configuration,
/// so the simplest usage is:
///
/// ```ignore
/// let module = Hcm111zBuilder::new()
///     .serial_port("/dev/ttyS3")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Hcm111zBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    command_timeout: Duration,
    settle_delay: Duration,
    io: IoConfig,
}

impl Hcm111zBuilder {
    pub fn new() -> Self {
        Hcm111zBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            io: IoConfig::default(),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyS3` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Host-side baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Wait for a single command response (default: 2s). Zero waits
    /// indefinitely.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Quiet period before and after `+++` (default: 1s).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Line prefix that marks a notification (default: `+QBLE`).
    pub fn notification_prefix(mut self, prefix: &str) -> Self {
        self.io.notification_prefix = prefix.to_string();
        self
    }

    /// Dispatch notifications from the start instead of waiting for
    /// [`start_notification_listener`](Hcm111z::start_notification_listener).
    pub fn listen_on_start(mut self, enabled: bool) -> Self {
        self.io.listen_on_start = enabled;
        self
    }

    /// Read slice of the IO task while idle (default: 100ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.io.poll_interval = interval;
        self
    }

    /// Build an [`Hcm111z`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `hcm-test-harness`) and for callers that manage the transport
    /// themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Hcm111z> {
        if self.io.notification_prefix.is_empty() {
            return Err(Error::InvalidParameter(
                "notification_prefix must not be empty".into(),
            ));
        }
        if self.io.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be greater than zero".into(),
            ));
        }

        Ok(Hcm111z::new(
            transport,
            self.io,
            self.command_timeout,
            self.settle_delay,
        ))
    }

    /// Build an [`Hcm111z`] over a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Hcm111z> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for Hcm111zBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcm_test_harness::MockTransport;

    #[tokio::test]
    async fn builder_defaults() {
        let module = Hcm111zBuilder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert_eq!(module.command_timeout(), Duration::from_secs(2));
        assert_eq!(module.settle_delay(), Duration::from_secs(1));
        assert!(!module.health().listening);
        module.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn builder_overrides() {
        let module = Hcm111zBuilder::new()
            .command_timeout(Duration::from_millis(300))
            .settle_delay(Duration::from_millis(50))
            .listen_on_start(true)
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert_eq!(module.command_timeout(), Duration::from_millis(300));
        assert_eq!(module.settle_delay(), Duration::from_millis(50));
        assert!(module.health().listening);
        module.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn custom_notification_prefix() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let module = Hcm111zBuilder::new()
            .notification_prefix("+QBLESTAT")
            .listen_on_start(true)
            .poll_interval(Duration::from_millis(20))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        let mut events = module.subscribe();
        handle.push_unsolicited(b"+QBLEINFO:0\r\n+QBLESTAT:1\r\n");

        let ev = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind, "QBLESTAT");
        assert_eq!(module.health().discarded_lines, 1);
        module.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn empty_prefix_rejected() {
        let result = Hcm111zBuilder::new()
            .notification_prefix("")
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_without_port_fails() {
        let result = Hcm111zBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
