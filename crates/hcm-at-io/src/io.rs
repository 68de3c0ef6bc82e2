//! IO task types and implementation for the AT command link.
//!
//! One tokio task owns the transport exclusively. It serves AT command
//! requests one at a time, writes raw passthrough data, and while idle keeps
//! reading so unsolicited notifications are delivered as soon as they arrive.
//! Because this task performs every read, a command response can never be
//! consumed by the notification path or the other way round: each line is
//! classified once, in arrival order.
//!
//! Line routing while a command is in flight:
//!
//! - empty lines and the module's echo of the command are skipped;
//! - a notification whose type equals the command mnemonic is the response
//!   (`AT+QBLEADDR?` is answered by `+QBLEADDR:...`);
//! - any other notification goes to the dispatcher;
//! - any other line is the response.
//!
//! While idle, notifications go to the dispatcher (if the listener is
//! running) and every other line is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hcm_core::error::{Error, Result};
use hcm_core::events::NotificationEvent;
use hcm_core::transport::Transport;

use crate::dispatch::{HandlerSlot, NotificationDispatcher};
use crate::protocol::{self, Command};
use crate::reader::LineReader;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the AT IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Prefix that marks a line as a notification.
    pub notification_prefix: String,
    /// Whether notifications are dispatched from the moment the task starts.
    pub listen_on_start: bool,
    /// Read slice used while idle and while waiting without a deadline.
    pub poll_interval: Duration,
    /// First delay after an idle read error; doubles on each further error.
    pub error_backoff_min: Duration,
    /// Cap for the idle read error delay.
    pub error_backoff_max: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            notification_prefix: protocol::NOTIFICATION_PREFIX.to_string(),
            listen_on_start: false,
            poll_interval: Duration::from_millis(100),
            error_backoff_min: Duration::from_millis(10),
            error_backoff_max: Duration::from_secs(1),
        }
    }
}

/// A request sent from the facade to the IO task.
pub enum Request {
    /// Send one AT command and wait for its response line.
    Command {
        /// Encoded bytes, terminator included.
        line: Vec<u8>,
        /// Mnemonic, for matching `+<MNEMONIC>:` replies.
        mnemonic: String,
        /// Zero waits indefinitely.
        timeout: Duration,
        /// Switch to transparent mode as soon as a non-error reply arrives.
        enters_transparent: bool,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Write bytes verbatim; nothing is read back.
    Write {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Start or stop dispatching notifications.
    SetListening { on: bool, reply: oneshot::Sender<()> },
    /// Switch between line-framed AT traffic and raw transparent data.
    SetTransparent { on: bool, reply: oneshot::Sender<()> },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Counters and flags the IO task publishes for observers.
#[derive(Debug, Default)]
pub struct IoHealth {
    read_errors: AtomicU64,
    notifications: AtomicU64,
    discarded_lines: AtomicU64,
    listening: AtomicBool,
    transparent: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl IoHealth {
    fn record_read_error(&self, error: &Error) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error.to_string());
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> IoHealthSnapshot {
        IoHealthSnapshot {
            read_errors: self.read_errors.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            discarded_lines: self.discarded_lines.load(Ordering::Relaxed),
            listening: self.listening.load(Ordering::Relaxed),
            transparent: self.transparent.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }
}

/// Point-in-time copy of [`IoHealth`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoHealthSnapshot {
    /// Idle read errors swallowed by the listener.
    pub read_errors: u64,
    /// Notifications delivered to the dispatcher.
    pub notifications: u64,
    /// Unsolicited non-notification lines thrown away.
    pub discarded_lines: u64,
    pub listening: bool,
    pub transparent: bool,
    /// Text of the most recent swallowed read error.
    pub last_error: Option<String>,
}

/// Handle to the IO task. Stored inside the device facade.
pub struct AtIo {
    tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    health: Arc<IoHealth>,
}

impl AtIo {
    /// Send an AT command and await the response line.
    ///
    /// A zero `timeout` waits indefinitely.
    pub async fn command(&self, cmd: &Command, timeout: Duration) -> Result<String> {
        self.send_command(cmd, timeout, false).await
    }

    /// Send a command that puts the module into transparent mode.
    ///
    /// The IO task switches modes right after the reply line, so bytes that
    /// follow the reply go to the data channel rather than the line parser.
    /// An `ERROR` reply leaves the mode unchanged.
    pub async fn command_entering_transparent(
        &self,
        cmd: &Command,
        timeout: Duration,
    ) -> Result<String> {
        self.send_command(cmd, timeout, true).await
    }

    async fn send_command(
        &self,
        cmd: &Command,
        timeout: Duration,
        enters_transparent: bool,
    ) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Command {
                line: cmd.encode(),
                mnemonic: cmd.mnemonic().to_string(),
                timeout,
                enters_transparent,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        if timeout.is_zero() {
            return reply_rx.await.map_err(|_| Error::NotConnected)?;
        }

        // The IO task enforces `timeout` itself; the margin only covers
        // requests queued behind a slow one.
        match tokio::time::timeout(timeout + Duration::from_millis(500), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Write raw bytes without waiting for any reply.
    pub async fn write(&self, data: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Write {
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Start (`true`) or stop (`false`) dispatching notifications.
    pub async fn set_listening(&self, on: bool) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::SetListening { on, reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Switch the inbound path between AT lines and raw transparent data.
    pub async fn set_transparent(&self, on: bool) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::SetTransparent { on, reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    pub fn health(&self) -> IoHealthSnapshot {
        self.health.snapshot()
    }

    /// `true` once the IO task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the IO task without recovering the transport.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for sending requests.
///
/// `event_tx` receives every dispatched notification, `data_tx` every chunk
/// of inbound bytes while transparent mode is on, and `handlers` is consulted
/// for each notification.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<NotificationEvent>,
    data_tx: broadcast::Sender<Vec<u8>>,
    handlers: HandlerSlot,
) -> AtIo {
    let (tx, rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let health = Arc::new(IoHealth::default());
    health
        .listening
        .store(config.listen_on_start, Ordering::Relaxed);

    let dispatcher = NotificationDispatcher::new(handlers, event_tx);
    let task = tokio::spawn(io_loop(
        transport,
        config,
        dispatcher,
        data_tx,
        rx,
        cancel.clone(),
        Arc::clone(&health),
    ));

    AtIo {
        tx,
        cancel,
        task,
        health,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Exponential delay used after idle read errors.
#[derive(Debug)]
struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            next: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Everything the loop carries between iterations.
struct IoState {
    config: IoConfig,
    reader: LineReader,
    listening: bool,
    transparent: bool,
    backoff: Backoff,
    dispatcher: NotificationDispatcher,
    data_tx: broadcast::Sender<Vec<u8>>,
    health: Arc<IoHealth>,
}

impl IoState {
    fn parse(&self, line: &str) -> Option<NotificationEvent> {
        protocol::parse_notification_with_prefix(line, &self.config.notification_prefix)
    }

    fn notify(&self, event: NotificationEvent) {
        if self.listening {
            self.health.notifications.fetch_add(1, Ordering::Relaxed);
            self.dispatcher.dispatch(event);
        } else {
            self.dispatcher.discard(&event);
        }
    }

    /// Route one line that arrived with no command in flight.
    fn route_idle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        match self.parse(line) {
            Some(event) => self.notify(event),
            None => {
                self.health.discarded_lines.fetch_add(1, Ordering::Relaxed);
                debug!(line, "discarding unsolicited line");
            }
        }
    }

    /// Switch modes. Entering transparent mode forwards every byte still
    /// buffered, framed or not, to the data channel.
    fn set_transparent(&mut self, on: bool) {
        if on {
            let pending = self.reader.take_remaining();
            if !pending.is_empty() {
                debug!(bytes = pending.len(), "forwarding buffered bytes as transparent data");
                // No subscribers is fine.
                let _ = self.data_tx.send(pending);
            }
        }
        self.transparent = on;
        self.health.transparent.store(on, Ordering::Relaxed);
        debug!(on, "transparent mode changed");
    }

    /// Route every complete line already buffered.
    fn drain_idle_lines(&mut self) {
        while let Some(line) = self.reader.next_buffered() {
            self.route_idle_line(&line);
        }
    }
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Request dispatch
/// 3. Idle reading for notifications
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    dispatcher: NotificationDispatcher,
    data_tx: broadcast::Sender<Vec<u8>>,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
    health: Arc<IoHealth>,
) {
    let backoff = Backoff::new(config.error_backoff_min, config.error_backoff_max);
    let mut state = IoState {
        listening: config.listen_on_start,
        reader: LineReader::new(config.poll_interval),
        config,
        transparent: false,
        backoff,
        dispatcher,
        data_tx,
        health,
    };

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("AT IO task cancelled");
                break;
            }

            req = rx.recv() => {
                match req {
                    Some(Request::Shutdown { reply }) => {
                        debug!("AT IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    Some(req) => handle_request(req, &mut *transport, &mut state, &cancel).await,
                    None => {
                        debug!("request channel closed, exiting AT IO task");
                        break;
                    }
                }
            }

            _ = idle_read(&mut *transport, &mut state) => {}
        }
    }
}

/// Execute a single request on the transport.
async fn handle_request(
    req: Request,
    transport: &mut dyn Transport,
    state: &mut IoState,
    cancel: &CancellationToken,
) {
    match req {
        Request::Command {
            line,
            mnemonic,
            timeout,
            enters_transparent,
            reply,
        } => {
            // The caller gave up while this request was queued.
            if reply.is_closed() {
                debug!(mnemonic = %mnemonic, "dropping command abandoned by its caller");
                return;
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::NotConnected),
                r = execute_command(transport, state, &line, &mnemonic, timeout) => r,
            };
            if enters_transparent {
                if let Ok(response) = &result {
                    if !protocol::is_error_response(response) {
                        state.set_transparent(true);
                    }
                }
            }
            let _ = reply.send(result);
        }
        Request::Write { data, reply } => {
            let _ = reply.send(transport.send(&data).await);
        }
        Request::SetListening { on, reply } => {
            if state.listening != on {
                debug!(on, "notification listener state changed");
            }
            state.listening = on;
            state.health.listening.store(on, Ordering::Relaxed);
            let _ = reply.send(());
        }
        Request::SetTransparent { on, reply } => {
            state.set_transparent(on);
            let _ = reply.send(());
        }
        Request::Shutdown { .. } => unreachable!("Shutdown handled in io_loop"),
    }
}

/// Send one AT command and read until its response line or the deadline.
async fn execute_command(
    transport: &mut dyn Transport,
    state: &mut IoState,
    line: &[u8],
    mnemonic: &str,
    timeout: Duration,
) -> Result<String> {
    if state.transparent {
        return Err(Error::TransparentMode);
    }

    // Anything already framed predates this command.
    state.drain_idle_lines();

    transport.send(line).await?;

    let echo = protocol::decode_line(&String::from_utf8_lossy(line));
    let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);

    loop {
        let remaining = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if left.is_zero() {
                    debug!(mnemonic, "no response before deadline");
                    return Err(Error::Timeout);
                }
                left
            }
            None => Duration::ZERO,
        };

        let text = state.reader.read_line(transport, remaining).await?;
        if text.is_empty() || text == echo {
            continue;
        }
        match state.parse(&text) {
            Some(event) if event.kind == mnemonic => return Ok(text),
            Some(event) => {
                debug!(raw = %event.raw, mnemonic, "notification interleaved with response");
                state.notify(event);
            }
            None => return Ok(text),
        }
    }
}

/// One idle read: route notifications, feed transparent data, back off on
/// errors.
async fn idle_read(transport: &mut dyn Transport, state: &mut IoState) {
    let poll = state.config.poll_interval;
    let result = if state.transparent {
        read_transparent(transport, state, poll).await
    } else {
        state
            .reader
            .read_line(transport, poll)
            .await
            .map(|line| state.route_idle_line(&line))
    };

    match result {
        Ok(()) | Err(Error::Timeout) => state.backoff.reset(),
        Err(e) => {
            state.health.record_read_error(&e);
            let delay = state.backoff.next_delay();
            warn!(error = %e, delay_ms = delay.as_millis() as u64, "idle read failed, backing off");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Forward one chunk of inbound bytes to the data channel, unframed.
async fn read_transparent(
    transport: &mut dyn Transport,
    state: &mut IoState,
    poll: Duration,
) -> Result<()> {
    let mut buf = [0u8; 256];
    let n = transport.receive(&mut buf, poll).await?;
    if n > 0 {
        // No subscribers is fine.
        let _ = state.data_tx.send(buf[..n].to_vec());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
