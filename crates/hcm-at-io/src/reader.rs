//! Line-read primitive on top of a byte [`Transport`].

use std::time::Duration;

use tokio::time::Instant;

use hcm_core::error::{Error, Result};
use hcm_core::transport::Transport;

use crate::protocol::{decode_line, LineFramer};

/// Reads whole lines from a transport.
///
/// Bytes past the end of a returned line stay buffered for the next call, so
/// a response and a notification arriving in one chunk are both seen.
#[derive(Debug)]
pub struct LineReader {
    framer: LineFramer,
    poll_interval: Duration,
}

impl LineReader {
    /// `poll_interval` is the longest single `receive()` when waiting without
    /// a deadline.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            framer: LineFramer::new(),
            poll_interval,
        }
    }

    /// Read one decoded line.
    ///
    /// A zero `timeout` waits indefinitely. Returns [`Error::Timeout`] if no
    /// complete line arrived in time; empty lines are returned as `""`.
    pub async fn read_line(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<String> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut buf = [0u8; 256];

        loop {
            if let Some(line) = self.next_buffered() {
                return Ok(line);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    deadline - now
                }
                None => self.poll_interval,
            };

            match transport.receive(&mut buf, wait).await {
                Ok(n) => {
                    self.framer.push(&buf[..n]);
                }
                // The deadline check above decides.
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop a complete line that is already buffered, without reading.
    pub fn next_buffered(&mut self) -> Option<String> {
        self.framer.next_line().map(|raw| decode_line(&raw))
    }

    /// Take every buffered byte, complete lines included.
    pub fn take_remaining(&mut self) -> Vec<u8> {
        self.framer.take_all()
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.framer.buffered()
    }
}
