//! Mock transport for deterministic testing of the AT protocol layer.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Unlike a request/response-only mock, it also
//! models a module that talks on its own: unsolicited bytes (URC lines) can
//! be pushed into the inbound stream at any time through a [`MockHandle`],
//! including after the transport has been moved into an IO task.
//!
//! # Example
//!
//! ```
//! use hcm_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"AT+QVERSION\r\n", b"\r\nHCM111Z_V1.0.3\r\n\r\nOK\r\n");
//!
//! let handle = mock.handle();
//! handle.push_unsolicited(b"+QBLESTAT:1\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hcm_core::error::{Error, Result};
use hcm_core::transport::Transport;

/// Upper bound on how long an empty `receive()` waits before timing out.
///
/// Keeps tests fast while still yielding to the runtime, so a reader that
/// polls in a loop cannot starve the task that pushes data.
const MAX_EMPTY_WAIT: Duration = Duration::from_millis(5);

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    connected: bool,
    /// Log of every `send()` call.
    sent_log: Vec<Vec<u8>>,
    /// Number of upcoming `receive()` calls that fail with a transport error.
    failing_reads: usize,
    /// Number of upcoming `send()` calls that fail with a transport error.
    failing_sends: usize,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; the matching
/// response is appended to the inbound stream for later `receive()` calls.
/// A send with no matching expectation returns [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Shared control handle for a [`MockTransport`].
///
/// Clone freely; every clone observes and drives the same mock.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                inbound: VecDeque::new(),
                connected: true,
                sent_log: Vec::new(),
                failing_reads: 0,
                failing_sends: 0,
            })),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// An empty `response` models a write the module never answers.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }

    /// Return a control handle that stays valid after the mock is boxed.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Return a copy of all data sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent_data()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.handle().remaining_expectations()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        lock(&self.state).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Append bytes the module sends without being asked.
    pub fn push_unsolicited(&self, data: &[u8]) {
        lock(&self.state).inbound.extend(data.iter().copied());
    }

    /// Make the next `n` `receive()` calls fail with [`Error::Transport`].
    pub fn fail_reads(&self, n: usize) {
        lock(&self.state).failing_reads = n;
    }

    /// Make the next `n` `send()` calls fail with [`Error::Transport`].
    pub fn fail_sends(&self, n: usize) {
        lock(&self.state).failing_sends = n;
    }

    /// Set the connected state. While disconnected, `send()` and
    /// `receive()` return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Return a copy of all data sent through the transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.state).expectations.len()
    }

    /// Number of inbound bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        lock(&self.state).inbound.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(Error::NotConnected);
        }

        state.sent_log.push(data.to_vec());

        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(Error::Transport("injected write failure".into()));
        }

        match state.expectations.pop_front() {
            Some(expectation) if expectation.request.as_slice() == data => {
                state.inbound.extend(expectation.response);
                Ok(())
            }
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            ))),
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(Error::NotConnected);
            }
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(Error::Transport("injected read failure".into()));
            }
            if !state.inbound.is_empty() {
                let n = state.inbound.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }

        tokio::time::sleep(timeout.min(MAX_EMPTY_WAIT)).await;
        Err(Error::Timeout)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QVERSION\r\n", b"V1.0\r\n");

        mock.send(b"AT+QVERSION\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"V1.0\r\n");
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QRST\r\n", b"OK\r\n");
        mock.expect(b"+++", b"");

        mock.send(b"AT+QRST\r\n").await.unwrap();
        mock.send(b"+++").await.unwrap();

        let sent = mock.sent_data();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"AT+QRST\r\n");
        assert_eq!(sent[1], b"+++");
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QRST\r\n", b"OK\r\n");

        let result = mock.send(b"AT+QVERSION\r\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn mock_transport_receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn mock_transport_unsolicited_after_boxing() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut boxed: Box<dyn Transport> = Box::new(mock);

        handle.push_unsolicited(b"+QBLESTAT:1\r\n");
        assert_eq!(handle.pending_inbound(), 13);

        let mut buf = [0u8; 64];
        let n = boxed
            .receive(&mut buf, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"+QBLESTAT:1\r\n");
        assert_eq!(handle.pending_inbound(), 0);
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"OK\r\n");
        mock.send(b"AT\r\n").await.unwrap();

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"OK");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"\r\n");
    }

    #[tokio::test]
    async fn mock_transport_injected_failures() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.fail_reads(1);
        handle.fail_sends(1);

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));

        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"AT\r\n").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QRST\r\n", b"");
        mock.expect(b"AT+QVERSION\r\n", b"");
        assert_eq!(mock.remaining_expectations(), 2);

        mock.send(b"AT+QRST\r\n").await.unwrap();
        assert_eq!(mock.remaining_expectations(), 1);
    }
}
