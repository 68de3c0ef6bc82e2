//! Quectel HCM111Z BLE module driver.
//!
//! The HCM111Z is controlled over a UART with CR+LF terminated AT commands
//! and reports asynchronous events as `+QBLE...` notification lines that may
//! arrive in the middle of a command exchange. This crate provides:
//!
//! - **Command builders** ([`commands`]) -- the module's AT vocabulary as
//!   [`Command`](hcm_at_io::Command) values, with argument validation.
//! - **Device facade** ([`device`]) -- [`Hcm111z`], one async method per
//!   module capability plus notification handling and transparent mode.
//! - **Builder** ([`builder`]) -- [`Hcm111zBuilder`] for serial or
//!   caller-provided transports.
//!
//! # Example
//!
//! ```no_run
//! use hcm111z::{Hcm111zBuilder, NotificationEvent, Role};
//!
//! # async fn example() -> hcm_core::Result<()> {
//! let module = Hcm111zBuilder::new().serial_port("/dev/ttyS3").build().await?;
//!
//! module.register_notification_handler(|ev: &NotificationEvent| {
//!     if ev.is_connected() {
//!         println!("peer connected");
//!     }
//! });
//! module.start_notification_listener().await?;
//!
//! module.init(Role::Peripheral).await?;
//! module.set_device_name("HCM111Z").await?;
//! module.start_advertising().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod device;

pub use builder::Hcm111zBuilder;
pub use device::Hcm111z;
pub use hcm_at_io::{Command, IoHealthSnapshot, NotificationHandler};
pub use hcm_core::{CharacteristicProperties, Error, NotificationEvent, Result, Role};
