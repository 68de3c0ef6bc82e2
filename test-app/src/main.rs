// hcm-test-app -- CLI smoke test for the HCM111Z BLE module, against real
// hardware or a scripted mock transport.
//
// Usage:
//   hcm-test-app --port /dev/ttyS3 version
//   hcm-test-app --port /dev/ttyS3 address
//   hcm-test-app --port /dev/ttyS3 demo
//   hcm-test-app --port /dev/ttyS3 -vv listen --seconds 30
//   hcm-test-app --mock demo

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hcm111z::{CharacteristicProperties, Hcm111z, Hcm111zBuilder, NotificationEvent, Role};
use hcm_test_harness::{MockHandle, MockTransport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// HCM111Z test application -- exercises the module from the command line.
#[derive(Parser)]
#[command(name = "hcm-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyS3, COM3).
    #[arg(long, default_value = "/dev/ttyS3")]
    port: String,

    /// Baud rate for the serial connection.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Use a scripted mock transport instead of a real serial port.
    #[arg(long, default_value_t = false)]
    mock: bool,

    /// Seconds to wait for a central to connect during `demo`.
    #[arg(long, default_value_t = 60)]
    connect_timeout: u64,

    /// Advertised device name used by `demo`.
    #[arg(long, default_value = "HCM111Z")]
    name: String,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the firmware version.
    Version,
    /// Print the module's BLE address.
    Address,
    /// Run the full peripheral smoke test: restart, configure, advertise,
    /// wait for a connection, build a GATT server, notify, transparent mode.
    Demo,
    /// Print notifications as they arrive.
    Listen {
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Pre-load the replies a healthy module gives for `command`.
fn scripted_mock(command: &Command, name: &str) -> (MockTransport, MockHandle) {
    let mut mock = MockTransport::new();
    match command {
        Command::Version => mock.expect(b"AT+QVERSION\r\n", b"\r\nHCM111Z_V1.0.3\r\n\r\nOK\r\n"),
        Command::Address => mock.expect(
            b"AT+QBLEADDR?\r\n",
            b"\r\n+QBLEADDR:C8:47:8C:00:11:22\r\n\r\nOK\r\n",
        ),
        Command::Demo => {
            let set_name = format!("AT+QBLENAME=\"{name}\"\r\n");
            mock.expect(b"AT+QRST\r\n", b"OK\r\n");
            mock.expect(b"AT+QVERSION\r\n", b"HCM111Z_V1.0.3\r\nOK\r\n");
            mock.expect(b"AT+QBLEINIT=1\r\n", b"OK\r\n");
            mock.expect(set_name.as_bytes(), b"OK\r\n");
            mock.expect(b"AT+QBLEADDR?\r\n", b"+QBLEADDR:C8:47:8C:00:11:22\r\nOK\r\n");
            // The central connects right after advertising starts.
            mock.expect(b"AT+QBLEADVSTART\r\n", b"OK\r\n+QBLESTAT:1\r\n");
            mock.expect(b"AT+QBLEADVSTOP\r\n", b"OK\r\n");
            mock.expect(b"AT+QBLEGATTSSRV=\"FFF0\"\r\n", b"OK\r\n");
            mock.expect(b"AT+QBLEGATTSCHAR=\"FFF1\",16\r\n", b"OK\r\n");
            mock.expect(b"AT+QBLEGATTSSRVDONE\r\n", b"OK\r\n");
            mock.expect(b"AT+QBLEGATTSNTFY=0,1,\"48656C6C6F\"\r\n", b"OK\r\n");
            mock.expect(b"AT+QBLETRANMODE=\"FFF1\"\r\n", b"OK\r\n");
            mock.expect(b"Hello BLE\n", b"");
            mock.expect(b"+++", b"");
        }
        Command::Listen { .. } => {}
    }
    let handle = mock.handle();
    (mock, handle)
}

async fn connect(cli: &Cli) -> Result<(Hcm111z, Option<MockHandle>)> {
    let builder = Hcm111zBuilder::new().baud_rate(cli.baud);

    if cli.mock {
        let (mock, handle) = scripted_mock(&cli.command, &cli.name);
        let module = builder
            .settle_delay(Duration::from_millis(50))
            .build_with_transport(Box::new(mock))
            .await
            .context("failed to build HCM111Z with mock transport")?;
        info!("connected (mock transport)");
        return Ok((module, Some(handle)));
    }

    let module = builder
        .serial_port(&cli.port)
        .build()
        .await
        .with_context(|| format!("failed to open {} at {} baud", cli.port, cli.baud))?;
    info!(port = %cli.port, baud = cli.baud, "connected");
    Ok((module, None))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_version(module: &Hcm111z) -> Result<()> {
    let version = module.get_version().await.context("failed to read version")?;
    println!("Firmware: {version}");
    Ok(())
}

async fn cmd_address(module: &Hcm111z) -> Result<()> {
    let addr = module.query_address().await.context("failed to read address")?;
    println!("Address: {addr}");
    Ok(())
}

async fn cmd_listen(module: &Hcm111z, mock: Option<&MockHandle>, seconds: u64) -> Result<()> {
    let mut events = module.subscribe();
    module
        .start_notification_listener()
        .await
        .context("failed to start notification listener")?;

    if let Some(mock) = mock {
        mock.push_unsolicited(b"+QBLESTAT:1\r\n+QBLEPEERINFO:AA:BB:CC:DD:EE:FF, Phone\r\n");
    }

    println!("Listening for {seconds}s (Ctrl-C to stop)...");
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            ev = events.recv() => match ev {
                Ok(ev) => println!("[{}] {}", ev.kind, ev.fields.join(" | ")),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "notification subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let health = module.health();
    println!(
        "Notifications: {}, discarded lines: {}, read errors: {}",
        health.notifications, health.discarded_lines, health.read_errors
    );
    Ok(())
}

async fn cmd_demo(module: &Hcm111z, cli: &Cli) -> Result<()> {
    println!("[1] Restarting module...");
    module.restart().await.context("restart failed")?;
    if !cli.mock {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    println!("[2] Querying firmware version...");
    cmd_version(module).await?;

    println!("[3] Initialising BLE peripheral...");
    module.init(Role::Peripheral).await.context("init failed")?;

    println!("[4] Setting device name...");
    module
        .set_device_name(&cli.name)
        .await
        .context("set device name failed")?;
    cmd_address(module).await?;

    let connected = Arc::new(Notify::new());
    let signal = Arc::clone(&connected);
    module.register_notification_handler(move |ev: &NotificationEvent| {
        if ev.is_connected() {
            println!("[URC] central connected");
            signal.notify_one();
        } else {
            println!("[URC] {}", ev.raw);
        }
    });
    module
        .start_notification_listener()
        .await
        .context("failed to start notification listener")?;

    println!("[5] Advertising... connect with a phone app");
    module
        .start_advertising()
        .await
        .context("start advertising failed")?;

    let wait = Duration::from_secs(cli.connect_timeout);
    if tokio::time::timeout(wait, connected.notified()).await.is_err() {
        bail!("no BLE connection within {}s", cli.connect_timeout);
    }
    println!("Connection detected, continuing...");
    module
        .stop_advertising()
        .await
        .context("stop advertising failed")?;

    println!("[6] Adding service and characteristic...");
    module.add_service("FFF0").await.context("add service failed")?;
    module
        .add_characteristic("FFF1", CharacteristicProperties::NOTIFY)
        .await
        .context("add characteristic failed")?;
    module
        .finish_gatt_server()
        .await
        .context("finish GATT server failed")?;

    println!("[7] Sending notify...");
    if let Err(e) = module.send_notify(0, 1, "48656C6C6F").await {
        warn!(error = %e, "notify failed (no subscriber?)");
    }

    println!("[8] Entering transparent mode...");
    module
        .enter_transparent_mode("FFF1")
        .await
        .context("enter transparent mode failed")?;
    if !cli.mock {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("Sending transparent data...");
    module
        .send_raw_data(b"Hello BLE\n")
        .await
        .context("transparent write failed")?;

    println!("Leaving transparent mode...");
    module
        .exit_transparent_mode()
        .await
        .context("exit transparent mode failed")?;

    println!("[9] Done");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (module, mock) = connect(&cli).await?;

    let result = match &cli.command {
        Command::Version => cmd_version(&module).await,
        Command::Address => cmd_address(&module).await,
        Command::Demo => cmd_demo(&module, &cli).await,
        Command::Listen { seconds } => cmd_listen(&module, mock.as_ref(), *seconds).await,
    };

    // A command error takes precedence over a shutdown error.
    match module.shutdown().await {
        Ok(_) => info!("IO task stopped"),
        Err(e) if result.is_err() => error!(error = %e, "IO task did not shut down"),
        Err(e) => return Err(e).context("IO task did not shut down"),
    }
    result
}
