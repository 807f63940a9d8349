//! Bluetooth Service Module
//!
//! Main service that wires adapter, scanner and connection together and runs
//! them on a single cooperative task.

use crate::domain::error::Result;
use crate::domain::models::{
    AdapterStatus, AppEvent, AppStateChange, BluetoothCommand, ConnectionState, DiscoverySet,
    Peripheral, PeripheralId,
};
use crate::domain::settings::BluetoothSettings;
use crate::infrastructure::bluetooth::{
    adapter::AdapterMonitor,
    backend::{BleBackend, InitOptions, ScanRequest, TransportEvent},
    connection::ConnectionManager,
    lifecycle::LifecycleBridge,
    notifier::Notifier,
    reconnection::{BackoffConfig, ReconnectionPolicy},
    scanner::{ScanSession, SCAN_TIMEOUT},
    subscription::Subscription,
    timer::{TimerFired, TimerKind},
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Tunables for one service instance.
#[derive(Debug, Clone)]
pub struct BluetoothConfig {
    pub init: InitOptions,
    pub scan_request: ScanRequest,
    pub scan_timeout: Duration,
    pub backoff: BackoffConfig,
    pub background_mode: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            init: InitOptions::default(),
            scan_request: ScanRequest::default(),
            scan_timeout: SCAN_TIMEOUT,
            backoff: BackoffConfig::default(),
            background_mode: false,
        }
    }
}

impl From<&BluetoothSettings> for BluetoothConfig {
    fn from(settings: &BluetoothSettings) -> Self {
        Self {
            init: InitOptions {
                android_never_for_location: settings.android_never_for_location,
            },
            scan_request: ScanRequest::with_services(settings.service_filter.clone()),
            scan_timeout: settings.scan_timeout(),
            backoff: BackoffConfig::from(&settings.reconnect),
            background_mode: settings.background_mode_enabled,
        }
    }
}

#[derive(Debug)]
enum Input {
    Transport(TransportEvent),
    Lifecycle(AppStateChange),
    Timer(TimerFired),
}

struct Inputs {
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    lifecycle_tx: mpsc::UnboundedSender<AppStateChange>,
    lifecycle_rx: mpsc::UnboundedReceiver<AppStateChange>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    deferred: VecDeque<TransportEvent>,
}

impl Inputs {
    /// Drops queued advertisements. Other transport events keep their order.
    fn discard_advertisements(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(event) = self.transport_rx.try_recv() {
            match event {
                TransportEvent::Advertisement(_) => discarded += 1,
                other => self.deferred.push_back(other),
            }
        }
        discarded
    }

    async fn next(&mut self) -> Option<Input> {
        if let Some(event) = self.deferred.pop_front() {
            return Some(Input::Transport(event));
        }
        tokio::select! {
            Some(event) = self.transport_rx.recv() => Some(Input::Transport(event)),
            Some(change) = self.lifecycle_rx.recv() => Some(Input::Lifecycle(change)),
            Some(fired) = self.timer_rx.recv() => Some(Input::Timer(fired)),
            else => None,
        }
    }
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    backend: Arc<dyn BleBackend>,
    adapter: AdapterMonitor,
    scanner: ScanSession,
    connection: ConnectionManager,
    inputs: Inputs,
    subscriptions: Vec<Subscription>,
}

impl BluetoothService {
    /// Create a new Bluetooth service
    pub fn new(
        backend: Arc<dyn BleBackend>,
        config: BluetoothConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let notifier = Notifier::new(event_sender);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let adapter = AdapterMonitor::new(backend.clone(), notifier.clone(), config.init);
        let scanner = ScanSession::new(
            backend.clone(),
            notifier.clone(),
            config.scan_request,
            config.scan_timeout,
            timer_tx.clone(),
        );
        let policy = ReconnectionPolicy::new(config.backoff, timer_tx);
        let connection =
            ConnectionManager::new(backend.clone(), notifier, policy, config.background_mode);

        Self {
            backend,
            adapter,
            scanner,
            connection,
            inputs: Inputs {
                transport_tx,
                transport_rx,
                lifecycle_tx,
                lifecycle_rx,
                timer_rx,
                deferred: VecDeque::new(),
            },
            subscriptions: Vec::new(),
        }
    }

    /// Registers transport and lifecycle listeners, then brings the adapter up.
    ///
    /// Calling it again re-runs adapter initialization without duplicating listeners.
    pub async fn start(&mut self, lifecycle: &LifecycleBridge) -> AdapterStatus {
        if self.subscriptions.is_empty() {
            self.subscriptions
                .push(self.backend.subscribe(self.inputs.transport_tx.clone()));
            self.subscriptions
                .push(lifecycle.subscribe(self.inputs.lifecycle_tx.clone()));
        }
        self.adapter.initialize().await
    }

    /// Disposes listeners, defuses both timers and drops any active link.
    pub async fn stop(&mut self) {
        info!("Stopping Bluetooth service");
        for mut subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        self.scanner.teardown().await;
        self.connection.teardown().await;
    }

    /// Starts a fresh scan. Advertisements still queued from an earlier scan
    /// never reach the new discovery set.
    pub async fn start_scan(&mut self) -> Result<()> {
        if self.adapter.is_available() {
            self.scanner.stop_scan().await;
            let discarded = self.inputs.discard_advertisements();
            if discarded > 0 {
                debug!("Discarded {} advertisements from the previous scan", discarded);
            }
        }
        self.scanner.start_scan(&self.adapter).await
    }

    /// Stop scanning
    pub async fn stop_scan(&mut self) {
        self.scanner.stop_scan().await;
    }

    /// Connect to a peripheral, by preference one from the current scan
    pub async fn connect(&mut self, id: PeripheralId) -> Result<()> {
        self.connection.connect(id, self.scanner.discovered()).await
    }

    /// Disconnect and forget the reconnection target
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    pub fn toggle_background_mode(&mut self) -> bool {
        self.connection.toggle_background_mode()
    }

    /// Waits for and processes exactly one transport, lifecycle or timer input.
    /// Returns `None` once no input source is left.
    pub async fn step(&mut self) -> Option<Result<()>> {
        let input = self.inputs.next().await?;
        Some(self.handle(input).await)
    }

    async fn handle(&mut self, input: Input) -> Result<()> {
        match input {
            Input::Transport(TransportEvent::Advertisement(peripheral)) => {
                self.scanner.on_advertisement(peripheral);
                Ok(())
            }
            Input::Transport(TransportEvent::ConnectionLost(id)) => {
                self.connection
                    .on_connection_lost(&id, self.scanner.discovered())
                    .await
            }
            Input::Lifecycle(change) => {
                self.connection
                    .on_app_state(change, self.scanner.discovered())
                    .await
            }
            Input::Timer(TimerFired {
                kind: TimerKind::ScanTimeout,
                generation,
            }) => {
                self.scanner.on_timeout(generation).await;
                Ok(())
            }
            Input::Timer(TimerFired {
                kind: TimerKind::ReconnectRetry,
                generation,
            }) => {
                self.connection
                    .on_retry_timer(generation, self.scanner.discovered())
                    .await
            }
        }
    }

    async fn execute(&mut self, command: BluetoothCommand) -> Result<()> {
        match command {
            BluetoothCommand::StartScan => self.start_scan().await,
            BluetoothCommand::StopScan => {
                self.stop_scan().await;
                Ok(())
            }
            BluetoothCommand::Connect(id) => self.connect(id).await,
            BluetoothCommand::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
            BluetoothCommand::ToggleBackgroundMode => {
                self.toggle_background_mode();
                Ok(())
            }
            BluetoothCommand::Shutdown => Ok(()),
        }
    }

    /// Drives commands and inputs until `Shutdown` or the command channel closes,
    /// then tears the service down.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(BluetoothCommand::Shutdown) => break,
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            warn!("Bluetooth command failed: {}", e);
                        }
                    }
                },
                Some(input) = self.inputs.next() => {
                    if let Err(e) = self.handle(input).await {
                        warn!("{}", e);
                    }
                }
            }
        }
        self.stop().await;
    }

    pub fn adapter_status(&self) -> AdapterStatus {
        self.adapter.status()
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn discovered(&self) -> &DiscoverySet {
        self.scanner.discovered()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn active(&self) -> Option<&Peripheral> {
        self.connection.active()
    }

    pub fn last_connected(&self) -> Option<&PeripheralId> {
        self.connection.last_connected()
    }

    pub fn background_mode(&self) -> bool {
        self.connection.background_mode()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    pub fn retry_pending(&self) -> bool {
        self.connection.retry_pending()
    }

    pub fn scan_timeout_pending(&self) -> bool {
        self.scanner.timeout_pending()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }
}
