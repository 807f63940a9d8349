use anyhow::Context;
use ble_link::domain::settings::SettingsService;
use ble_link::infrastructure::bluetooth::simulated::SimulatedBackend;
use ble_link::infrastructure::logging;
use ble_link::{
    AppEvent, BleBackend, BluetoothCommand, BluetoothConfig, BluetoothService, LifecycleBridge,
    MessageSeverity, Peripheral, PeripheralId,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ble-link", about = "BLE connection manager with automatic reconnection")]
struct Cli {
    /// Use the in-process simulated radio instead of the platform stack
    #[arg(long)]
    simulate: bool,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peripheral advertised by the simulated radio, as ID or ID=NAME
    #[arg(long = "seed-peripheral", value_name = "ID[=NAME]")]
    seed_peripherals: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Write the effective settings to the settings file and exit
    InitConfig,
}

fn parse_seed(arg: &str) -> Peripheral {
    match arg.split_once('=') {
        Some((id, name)) => Peripheral::new(id, Some(name)),
        None => Peripheral::new(arg, None),
    }
}

#[cfg(windows)]
fn native_backend() -> anyhow::Result<Arc<dyn BleBackend>> {
    Ok(Arc::new(
        ble_link::infrastructure::bluetooth::winrt::WinRtBackend::new(),
    ))
}

#[cfg(not(windows))]
fn native_backend() -> anyhow::Result<Arc<dyn BleBackend>> {
    anyhow::bail!("No native Bluetooth backend on this platform; run with --simulate")
}

fn log_event(event: AppEvent) {
    match event {
        AppEvent::Notice(notice) => match notice.severity {
            MessageSeverity::Error | MessageSeverity::Warning => {
                warn!("{}: {}", notice.title, notice.description)
            }
            MessageSeverity::Info | MessageSeverity::Success => {
                info!("{}: {}", notice.title, notice.description)
            }
        },
        AppEvent::ConnectionState(state) => info!("Connection state: {}", state),
        AppEvent::AdapterStatus(status) => info!("Adapter: {:?}", status),
        AppEvent::DeviceFound(peripheral) => {
            info!("Found {} [{}]", peripheral.label(), peripheral.id)
        }
        AppEvent::ScanStateChanged(scanning) => info!("Scanning: {}", scanning),
        AppEvent::BackgroundMode(enabled) => info!("Background mode: {}", enabled),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => SettingsService::load_from(path.clone()),
        None => SettingsService::new()?,
    };
    let _logging_guard = logging::init_logger(&settings.get().log_settings)?;

    if let Some(Command::InitConfig) = cli.command {
        settings.save().context("Failed to write settings")?;
        info!("Settings written to {}", settings.path().display());
        return Ok(());
    }

    let simulated = cli.simulate.then(|| {
        let backend = Arc::new(SimulatedBackend::new());
        for arg in &cli.seed_peripherals {
            backend.seed(parse_seed(arg));
        }
        backend
    });
    let backend: Arc<dyn BleBackend> = match &simulated {
        Some(backend) => Arc::clone(backend) as Arc<dyn BleBackend>,
        None => native_backend()?,
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let events = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(event);
        }
    });

    let lifecycle = LifecycleBridge::new();
    let mut service = BluetoothService::new(
        backend,
        BluetoothConfig::from(&settings.get().bluetooth),
        event_tx,
    );
    service.start(&lifecycle).await;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(service.run(command_rx));

    info!("Commands: scan, stop, connect <id>, disconnect, toggle-bg, background, foreground, drop <id>, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("scan"), _) => BluetoothCommand::StartScan,
            (Some("stop"), _) => BluetoothCommand::StopScan,
            (Some("connect"), Some(id)) => BluetoothCommand::Connect(PeripheralId::new(id)),
            (Some("disconnect"), _) => BluetoothCommand::Disconnect,
            (Some("toggle-bg"), _) => BluetoothCommand::ToggleBackgroundMode,
            (Some("background"), _) => {
                lifecycle.set_active(false);
                continue;
            }
            (Some("foreground"), _) => {
                lifecycle.set_active(true);
                continue;
            }
            (Some("drop"), Some(id)) => {
                match &simulated {
                    Some(backend) if backend.drop_link(&PeripheralId::new(id)) => {}
                    Some(_) => warn!("{} is not connected", id),
                    None => warn!("drop is only available with --simulate"),
                }
                continue;
            }
            (Some("quit"), _) => break,
            (Some(other), _) => {
                warn!("Unknown command: {}", other);
                continue;
            }
        };
        if command_tx.send(command).is_err() {
            error!("Bluetooth service stopped unexpectedly");
            break;
        }
    }

    let _ = command_tx.send(BluetoothCommand::Shutdown);
    worker.await?;
    events.await?;
    Ok(())
}
