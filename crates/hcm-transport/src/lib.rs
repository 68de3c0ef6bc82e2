//! Transport implementations for the HCM111Z driver.
//!
//! Provides [`SerialTransport`], the [`Transport`](hcm_core::Transport)
//! implementation for the module's AT UART.
//!
//! # Example
//!
//! ```no_run
//! use hcm_transport::SerialTransport;
//!
//! # async fn example() -> hcm_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyS3", 115_200).await?;
//! println!("opened {}", transport.port_name());
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{
    DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits, DEFAULT_BAUD_RATE,
};
