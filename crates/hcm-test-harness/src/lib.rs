//! hcm-test-harness: Test utilities for the HCM111Z driver.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the AT protocol layer and the device facade without module hardware, and
//! [`MockHandle`] for driving it after it has been handed to an IO task.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
