//! Hcm111z -- the device facade for the Quectel HCM111Z BLE module.
//!
//! Each operation builds one AT command ([`commands`]) and runs it through
//! the IO task ([`hcm_at_io::io`]), which owns the transport. Notifications
//! the module sends on its own (`+QBLESTAT`, `+QBLEINFO`, ...) are routed by
//! the same task to the registered [`NotificationHandler`] and to every
//! [`subscribe`](Hcm111z::subscribe) receiver, so they can never be mistaken
//! for a command response.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use hcm_at_io::dispatch::{HandlerSlot, NotificationHandler};
use hcm_at_io::io::{self, AtIo, IoConfig, IoHealthSnapshot};
use hcm_at_io::protocol::{Command, ESCAPE_SEQUENCE, LINE_TERMINATOR};
use hcm_core::error::Result;
use hcm_core::events::NotificationEvent;
use hcm_core::transport::Transport;
use hcm_core::types::{CharacteristicProperties, Role};

use crate::commands;

/// A connected HCM111Z module.
///
/// Constructed via [`Hcm111zBuilder`](crate::builder::Hcm111zBuilder). All
/// methods take `&self`; commands from concurrent callers are served one at
/// a time in the order they reach the IO task.
pub struct Hcm111z {
    io: AtIo,
    handlers: HandlerSlot,
    event_tx: broadcast::Sender<NotificationEvent>,
    data_tx: broadcast::Sender<Vec<u8>>,
    command_timeout: Duration,
    settle_delay: Duration,
}

impl Hcm111z {
    /// Spawn the IO task over `transport`.
    ///
    /// Called by the builder; callers should use the builder API instead.
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        io_config: IoConfig,
        command_timeout: Duration,
        settle_delay: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (data_tx, _) = broadcast::channel(256);
        let handlers = HandlerSlot::new();
        let io = io::spawn_io_task(
            transport,
            io_config,
            event_tx.clone(),
            data_tx.clone(),
            handlers.clone(),
        );
        Hcm111z {
            io,
            handlers,
            event_tx,
            data_tx,
            command_timeout,
            settle_delay,
        }
    }

    /// Run `cmd` with the configured timeout and reject `ERROR` replies.
    async fn execute(&self, cmd: Command) -> Result<String> {
        let response = self.io.command(&cmd, self.command_timeout).await?;
        debug!(command = %cmd.line(), response = %response, "AT exchange");
        commands::check_response(cmd.mnemonic(), response)
    }

    // ---------------------------------------------------------------
    // Raw access
    // ---------------------------------------------------------------

    /// Send any AT command and return its response line.
    ///
    /// For commands this facade does not wrap. `ERROR` replies are returned
    /// as [`Error::Protocol`](hcm_core::Error::Protocol) like everywhere else.
    pub async fn send_command(&self, cmd: &Command) -> Result<String> {
        self.execute(cmd.clone()).await
    }

    /// Send `cmd` with a one-off timeout. A zero timeout waits indefinitely.
    pub async fn send_command_with_timeout(
        &self,
        cmd: &Command,
        timeout: Duration,
    ) -> Result<String> {
        let response = self.io.command(cmd, timeout).await?;
        commands::check_response(cmd.mnemonic(), response)
    }

    // ---------------------------------------------------------------
    // General control
    // ---------------------------------------------------------------

    /// Restart the module (`AT+QRST`).
    pub async fn restart(&self) -> Result<()> {
        self.execute(commands::cmd_restart()).await?;
        info!("module restart requested");
        Ok(())
    }

    /// Firmware version string (`AT+QVERSION`).
    pub async fn get_version(&self) -> Result<String> {
        self.execute(commands::cmd_version()).await
    }

    /// Change the module's UART rate (`AT+QSETBAUD`).
    ///
    /// The host side keeps its current rate; reopen the port afterwards.
    pub async fn set_baud(&self, baud: u32) -> Result<()> {
        self.execute(commands::cmd_set_baud(baud)).await?;
        info!(baud, "module baud rate changed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // BLE stack
    // ---------------------------------------------------------------

    /// Initialise the BLE stack in `role` (`AT+QBLEINIT`).
    pub async fn init(&self, role: Role) -> Result<()> {
        self.execute(commands::cmd_init(role)).await.map(drop)
    }

    /// Set the advertised device name (`AT+QBLENAME`).
    pub async fn set_device_name(&self, name: &str) -> Result<()> {
        self.execute(commands::cmd_set_name(name)?).await.map(drop)
    }

    /// The module's BLE address (`AT+QBLEADDR?`).
    pub async fn query_address(&self) -> Result<String> {
        let response = self.execute(commands::cmd_query_address()).await?;
        Ok(commands::parse_address_response(&response))
    }

    pub async fn start_advertising(&self) -> Result<()> {
        self.execute(commands::cmd_adv_start()).await.map(drop)
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        self.execute(commands::cmd_adv_stop()).await.map(drop)
    }

    // ---------------------------------------------------------------
    // GATT server
    // ---------------------------------------------------------------

    /// Add a primary service (`AT+QBLEGATTSSRV`).
    pub async fn add_service(&self, uuid: &str) -> Result<()> {
        self.execute(commands::cmd_add_service(uuid)?).await.map(drop)
    }

    /// Add a characteristic to the last added service (`AT+QBLEGATTSCHAR`).
    pub async fn add_characteristic(
        &self,
        uuid: &str,
        properties: CharacteristicProperties,
    ) -> Result<()> {
        self.execute(commands::cmd_add_characteristic(uuid, properties)?)
            .await
            .map(drop)
    }

    /// Commit the GATT database (`AT+QBLEGATTSSRVDONE`).
    pub async fn finish_gatt_server(&self) -> Result<()> {
        self.execute(commands::cmd_gatt_done()).await.map(drop)
    }

    /// Notify the peer on `conn_index` with a hex-encoded value
    /// (`AT+QBLEGATTSNTFY`).
    pub async fn send_notify(&self, conn_index: u8, handle: u16, hex_value: &str) -> Result<()> {
        self.execute(commands::cmd_notify(conn_index, handle, hex_value)?)
            .await
            .map(drop)
    }

    // ---------------------------------------------------------------
    // Transparent mode
    // ---------------------------------------------------------------

    /// Bridge the UART to characteristic `uuid` (`AT+QBLETRANMODE`).
    ///
    /// From here until [`exit_transparent_mode`](Self::exit_transparent_mode)
    /// AT commands fail with
    /// [`Error::TransparentMode`](hcm_core::Error::TransparentMode) and inbound
    /// bytes go to [`subscribe_data`](Self::subscribe_data) receivers.
    pub async fn enter_transparent_mode(&self, uuid: &str) -> Result<()> {
        let cmd = commands::cmd_transparent_mode(uuid)?;
        let response = self
            .io
            .command_entering_transparent(&cmd, self.command_timeout)
            .await?;
        commands::check_response(cmd.mnemonic(), response)?;
        info!(uuid, "entered transparent mode");
        Ok(())
    }

    /// Send the `+++` escape sequence framed by the settle delay.
    ///
    /// Best effort: the module does not acknowledge the escape, so `Ok` only
    /// means the three bytes were written.
    pub async fn exit_transparent_mode(&self) -> Result<()> {
        tokio::time::sleep(self.settle_delay).await;
        let written = self.io.write(ESCAPE_SEQUENCE.to_vec()).await;
        tokio::time::sleep(self.settle_delay).await;

        if written.is_ok() {
            self.io.set_transparent(false).await?;
            info!("left transparent mode");
        }
        written
    }

    /// Write bytes verbatim. Intended for transparent mode.
    pub async fn send_raw_data(&self, data: &[u8]) -> Result<()> {
        self.io.write(data.to_vec()).await
    }

    /// Write `text` followed by CR+LF. Intended for transparent mode.
    pub async fn send_line(&self, text: &str) -> Result<()> {
        let mut data = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(LINE_TERMINATOR);
        self.io.write(data).await
    }

    /// Receiver for raw inbound bytes while transparent mode is active.
    pub fn subscribe_data(&self) -> broadcast::Receiver<Vec<u8>> {
        self.data_tx.subscribe()
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    /// Replace the notification handler. The last registration wins.
    pub fn register_notification_handler<H: NotificationHandler>(&self, handler: H) {
        self.handlers.replace(handler);
    }

    /// Remove the handler; notifications are logged instead.
    pub fn clear_notification_handler(&self) {
        self.handlers.clear();
    }

    /// Start dispatching notifications. Calling it again has no effect.
    pub async fn start_notification_listener(&self) -> Result<()> {
        self.io.set_listening(true).await
    }

    /// Stop dispatching; notifications are dropped until restarted.
    pub async fn stop_notification_listener(&self) -> Result<()> {
        self.io.set_listening(false).await
    }

    /// Receiver for every dispatched notification.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.event_tx.subscribe()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    pub fn health(&self) -> IoHealthSnapshot {
        self.io.health()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Stop the IO task and hand back the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let transport = self.io.shutdown().await?;
        debug!("HCM111Z IO task stopped");
        Ok(transport)
    }
}

// ---------------------------------------------------------------
// Tests
// ---------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Hcm111zBuilder;
    use hcm_core::Error;
    use hcm_test_harness::{MockHandle, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn device(mock: MockTransport) -> (Hcm111z, MockHandle) {
        let handle = mock.handle();
        let dev = Hcm111zBuilder::new()
            .command_timeout(Duration::from_millis(200))
            .settle_delay(Duration::from_millis(10))
            .poll_interval(Duration::from_millis(20))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        (dev, handle)
    }

    #[tokio::test]
    async fn get_version_returns_first_line() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QVERSION\r\n", b"\r\nHCM111Z_V1.0.3\r\n\r\nOK\r\n");
        let (dev, _) = device(mock).await;

        assert_eq!(dev.get_version().await.unwrap(), "HCM111Z_V1.0.3");
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn setup_sequence_sends_expected_lines() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QRST\r\n", b"OK\r\n");
        mock.expect(b"AT+QSETBAUD=115200\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEINIT=1\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLENAME=\"HCM111Z\"\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEADVSTART\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEADVSTOP\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEGATTSSRV=\"FFF0\"\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEGATTSCHAR=\"FFF1\",16\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEGATTSSRVDONE\r\n", b"OK\r\n");
        mock.expect(b"AT+QBLEGATTSNTFY=0,1,\"48656C6C6F\"\r\n", b"OK\r\n");
        let (dev, handle) = device(mock).await;

        dev.restart().await.unwrap();
        dev.set_baud(115_200).await.unwrap();
        dev.init(Role::Peripheral).await.unwrap();
        dev.set_device_name("HCM111Z").await.unwrap();
        dev.start_advertising().await.unwrap();
        dev.stop_advertising().await.unwrap();
        dev.add_service("FFF0").await.unwrap();
        dev.add_characteristic("FFF1", CharacteristicProperties::NOTIFY)
            .await
            .unwrap();
        dev.finish_gatt_server().await.unwrap();
        dev.send_notify(0, 1, "48656C6C6F").await.unwrap();

        assert_eq!(handle.remaining_expectations(), 0);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn query_address_strips_prefix() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLEADDR?\r\n", b"+QBLEADDR:11:22:33:44:55:66\r\nOK\r\n");
        let (dev, _) = device(mock).await;

        assert_eq!(dev.query_address().await.unwrap(), "11:22:33:44:55:66");
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLEADVSTART\r\n", b"ERROR\r\n");
        let (dev, _) = device(mock).await;

        let result = dev.start_advertising().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn timeout_sends_command_once() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QVERSION\r\n", b"");
        let (dev, handle) = device(mock).await;

        let result = dev.get_version().await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(handle.sent_data().len(), 1);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_parameters_never_reach_the_wire() {
        let (dev, handle) = device(MockTransport::new()).await;

        assert!(matches!(
            dev.set_device_name("a\"b").await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            dev.send_notify(0, 1, "ABC").await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            dev.add_service("").await,
            Err(Error::InvalidParameter(_))
        ));
        assert!(handle.sent_data().is_empty());
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn send_command_passes_through() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLESTAT?\r\n", b"+QBLESTAT:0\r\nOK\r\n");
        let (dev, _) = device(mock).await;

        let resp = dev
            .send_command(&Command::query("QBLESTAT"))
            .await
            .unwrap();
        assert_eq!(resp, "+QBLESTAT:0");
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exit_transparent_mode_writes_escape_exactly() {
        let mut mock = MockTransport::new();
        mock.expect(b"+++", b"");
        let (dev, handle) = device(mock).await;

        dev.exit_transparent_mode().await.unwrap();
        assert_eq!(handle.sent_data(), vec![b"+++".to_vec()]);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn transparent_round_trip() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLETRANMODE=\"FFF1\"\r\n", b"OK\r\n");
        mock.expect(b"Hello BLE\r\n", b"");
        mock.expect(b"+++", b"");
        mock.expect(b"AT+QVERSION\r\n", b"V1\r\n");
        let (dev, handle) = device(mock).await;
        let mut data_rx = dev.subscribe_data();

        dev.enter_transparent_mode("FFF1").await.unwrap();
        assert!(dev.health().transparent);

        assert!(matches!(
            dev.get_version().await,
            Err(Error::TransparentMode)
        ));
        dev.send_line("Hello BLE").await.unwrap();

        handle.push_unsolicited(b"\x01\x02peer");
        let chunk = tokio::time::timeout(Duration::from_secs(1), data_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk, b"\x01\x02peer");

        dev.exit_transparent_mode().await.unwrap();
        assert!(!dev.health().transparent);
        assert_eq!(dev.get_version().await.unwrap(), "V1");
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn data_right_after_transparent_ack_reaches_subscribers() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLETRANMODE=\"FFF1\"\r\n", b"OK\r\npayload\r\n");
        let (dev, _) = device(mock).await;
        let mut data_rx = dev.subscribe_data();

        dev.enter_transparent_mode("FFF1").await.unwrap();
        let chunk = tokio::time::timeout(Duration::from_secs(1), data_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk, b"payload\r\n");

        let health = dev.health();
        assert!(health.transparent);
        assert_eq!(health.discarded_lines, 0);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_transparent_mode_stays_in_command_mode() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QBLETRANMODE=\"FFF1\"\r\n", b"ERROR\r\n");
        let (dev, _) = device(mock).await;

        assert!(matches!(
            dev.enter_transparent_mode("FFF1").await,
            Err(Error::Protocol(_))
        ));
        assert!(!dev.health().transparent);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handler_sees_connection_notification_once() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+QVERSION\r\n", b"+QBLESTAT:1\r\nV1\r\nOK\r\n");
        mock.expect(b"AT+QBLEADVSTOP\r\n", b"OK\r\n");
        let (dev, _) = device(mock).await;

        let connected = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&connected);
        dev.register_notification_handler(move |ev: &NotificationEvent| {
            if ev.is_connected() {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        dev.start_notification_listener().await.unwrap();
        dev.start_notification_listener().await.unwrap();

        assert_eq!(dev.get_version().await.unwrap(), "V1");
        dev.stop_advertising().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(dev.health().notifications, 1);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_events_without_handler() {
        let (dev, handle) = device(MockTransport::new()).await;
        let mut events = dev.subscribe();
        dev.start_notification_listener().await.unwrap();

        handle.push_unsolicited(b"+QBLEPEERINFO:AA:BB:CC:DD:EE:FF, MyDevice\r\n");
        let ev = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind, "QBLEPEERINFO");
        assert_eq!(ev.fields, vec!["AA:BB:CC:DD:EE:FF", "MyDevice"]);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_listener_drops_notifications() {
        let (dev, handle) = device(MockTransport::new()).await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        dev.register_notification_handler(move |_: &NotificationEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dev.start_notification_listener().await.unwrap();
        dev.stop_notification_listener().await.unwrap();
        handle.push_unsolicited(b"+QBLESTAT:1\r\n");
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!dev.health().listening);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handler_replacement_takes_effect() {
        let (dev, handle) = device(MockTransport::new()).await;
        dev.start_notification_listener().await.unwrap();

        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&old);
        dev.register_notification_handler(move |_: &NotificationEvent| {
            o.fetch_add(1, Ordering::SeqCst);
        });
        let n = Arc::clone(&new);
        dev.register_notification_handler(move |_: &NotificationEvent| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        handle.push_unsolicited(b"+QBLESTAT:1\r\n+QBLESTAT:0\r\n");
        tokio::time::timeout(Duration::from_secs(1), async {
            while new.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(old.load(Ordering::SeqCst), 0);

        dev.clear_notification_handler();
        handle.push_unsolicited(b"+QBLESTAT:1\r\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(new.load(Ordering::SeqCst), 2);
        dev.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_returns_connected_transport() {
        let (dev, _) = device(MockTransport::new()).await;
        let transport = dev.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }
}
