//! Error types for the HCM111Z driver.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, module-reported
//! errors, and timeouts are all captured here. A malformed notification line
//! is not an error; the parser simply reports "no event".

/// The error type for all driver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open, write, or read failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error: the module answered `ERROR`, or the byte
    /// stream could not be framed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response line from the module.
    ///
    /// Usually the module is unpowered, mid-reboot, or running at a
    /// different baud rate.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a module command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The IO task has stopped or the transport was closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the module was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An AT command was issued while the link is in transparent mode.
    ///
    /// Leave transparent mode with the `+++` escape sequence first.
    #[error("module is in transparent mode")]
    TransparentMode,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("module returned ERROR".into());
        assert_eq!(e.to_string(), "protocol error: module returned ERROR");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("name contains a quote".into());
        assert_eq!(e.to_string(), "invalid parameter: name contains a quote");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_transparent_mode() {
        assert_eq!(
            Error::TransparentMode.to_string(),
            "module is in transparent mode"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
