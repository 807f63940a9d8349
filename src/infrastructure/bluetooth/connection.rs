//! BLE Connection Module
//!
//! Owns the single active link and its state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                 │ link lost (background mode on)
//!      └────────failed──────────┘                 ▼
//!      ◀──────────exhausted / disconnect──── Reconnecting ──ok──▶ Connected
//! ```

use crate::domain::error::{BleError, Result};
use crate::domain::models::{
    AppEvent, AppStateChange, ConnectionState, DiscoverySet, Peripheral, PeripheralId, Signal,
};
use crate::infrastructure::bluetooth::backend::BleBackend;
use crate::infrastructure::bluetooth::notifier::Notifier;
use crate::infrastructure::bluetooth::reconnection::{
    AttemptOutcome, ReconnectionPolicy, RetryFire,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name given to a reconnected peripheral that is not in the current discovery set.
const RECONNECTED_FALLBACK_NAME: &str = "Reconnected Device";

/// Single-link connection state machine
pub struct ConnectionManager {
    backend: Arc<dyn BleBackend>,
    notifier: Notifier,
    policy: ReconnectionPolicy,
    state: ConnectionState,
    active: Option<Peripheral>,
    last_connected: Option<PeripheralId>,
    background_mode: bool,
}

impl ConnectionManager {
    /// Create a new manager in `Disconnected`
    pub fn new(
        backend: Arc<dyn BleBackend>,
        notifier: Notifier,
        policy: ReconnectionPolicy,
        background_mode: bool,
    ) -> Self {
        Self {
            backend,
            notifier,
            policy,
            state: ConnectionState::Disconnected,
            active: None,
            last_connected: None,
            background_mode,
        }
    }

    /// Manual connection. Never retried automatically on failure.
    ///
    /// Allowed from `Disconnected`, or from `Reconnecting` where it supersedes
    /// the running episode and its pending retry.
    pub async fn connect(&mut self, id: PeripheralId, discovered: &DiscoverySet) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Reconnecting => {
                info!(%id, "Manual connect supersedes reconnection");
                self.policy.reset();
            }
            state @ (ConnectionState::Connecting | ConnectionState::Connected) => {
                warn!(%id, "Connect rejected while {}", state);
                return Err(BleError::InvalidState {
                    operation: "connect",
                    state,
                });
            }
        }

        info!(%id, "Connecting to Bluetooth device");
        self.active = None;
        self.set_state(ConnectionState::Connecting);

        match self.backend.connect(&id).await {
            Ok(()) => {
                let peripheral = discovered
                    .find(&id)
                    .cloned()
                    .unwrap_or_else(|| Peripheral {
                        id: id.clone(),
                        display_name: None,
                    });
                let name = peripheral
                    .display_name
                    .clone()
                    .unwrap_or_else(|| "device".to_string());

                self.active = Some(peripheral);
                self.last_connected = Some(id);
                self.policy.reset();
                self.set_state(ConnectionState::Connected);
                self.notifier
                    .notice(Signal::Connected, "Connected", format!("Connected to {}", name));
                Ok(())
            }
            Err(e) => {
                error!(%id, "Connection error: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.notifier.notice(
                    Signal::ConnectionFailed,
                    "Connection Failed",
                    "Failed to connect to the device.",
                );
                Err(BleError::ConnectionFailed { id, source: e })
            }
        }
    }

    /// User-initiated disconnect. Forgets the reconnection target. No-op when disconnected.
    pub async fn disconnect(&mut self) {
        let previous = self.state;
        if previous == ConnectionState::Disconnected {
            return;
        }

        self.policy.reset();
        self.last_connected = None;
        let peripheral = self.active.take();

        if let Some(peripheral) = &peripheral {
            if previous == ConnectionState::Connected {
                if let Err(e) = self.backend.disconnect(&peripheral.id).await {
                    warn!(id = %peripheral.id, "Disconnect error: {}", e);
                    self.notifier.notice(
                        Signal::DisconnectFailed,
                        "Disconnect Failed",
                        "Failed to disconnect from the device.",
                    );
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        let name = peripheral
            .and_then(|p| p.display_name)
            .unwrap_or_else(|| "device".to_string());
        info!("Disconnected from {}", name);
        self.notifier.notice(
            Signal::Disconnected,
            "Disconnected",
            format!("Disconnected from {}", name),
        );
    }

    /// Transport reported an unexpected drop of the active link.
    pub async fn on_connection_lost(
        &mut self,
        id: &PeripheralId,
        discovered: &DiscoverySet,
    ) -> Result<()> {
        let is_active = self.active.as_ref().is_some_and(|p| &p.id == id);
        if self.state != ConnectionState::Connected || !is_active {
            debug!(%id, state = %self.state, "Ignoring link loss for inactive peripheral");
            return Ok(());
        }

        warn!(%id, "Connection lost");
        if self.background_mode && self.last_connected.is_some() {
            self.set_state(ConnectionState::Reconnecting);
            return self.reconnect(discovered).await;
        }

        self.active = None;
        self.set_state(ConnectionState::Disconnected);
        self.notifier.notice(
            Signal::Disconnected,
            "Disconnected",
            format!("Connection to {} was lost", id),
        );
        Err(BleError::ConnectionLost(id.clone()))
    }

    /// Foreground / background transition from the host application.
    pub async fn on_app_state(
        &mut self,
        change: AppStateChange,
        discovered: &DiscoverySet,
    ) -> Result<()> {
        debug!("App state changed. Is active: {}", change.is_active);

        if !change.is_active {
            if self.background_mode && self.state == ConnectionState::Connected {
                info!("Background mode is enabled, maintaining connection");
            }
            return Ok(());
        }

        if self.state == ConnectionState::Reconnecting {
            debug!("Reconnection already in progress");
            return Ok(());
        }

        let Some(id) = self.last_connected.clone() else {
            return Ok(());
        };
        if self.state != ConnectionState::Disconnected || !self.background_mode {
            return Ok(());
        }

        info!(%id, "Attempting to reconnect to device");
        self.active = Some(Self::resolve(discovered, &id));
        self.set_state(ConnectionState::Reconnecting);
        self.reconnect(discovered).await
    }

    /// A retry timer fired. Stale fires are ignored.
    ///
    /// Once the last backoff window has elapsed with the budget spent, the
    /// episode ends in `Disconnected` with a `ReconnectionExhausted` notice.
    pub async fn on_retry_timer(&mut self, generation: u64, discovered: &DiscoverySet) -> Result<()> {
        let fire = self.policy.on_timer(generation);
        if fire == RetryFire::Stale {
            return Ok(());
        }
        if self.state != ConnectionState::Reconnecting {
            debug!(state = %self.state, "Retry fired outside of reconnection");
            return Ok(());
        }

        match fire {
            RetryFire::Exhausted { attempts } => self.give_up(attempts),
            _ => self.reconnect(discovered).await,
        }
    }

    /// Flips the background-mode preference. Never touches the link itself.
    pub fn toggle_background_mode(&mut self) -> bool {
        self.background_mode = !self.background_mode;

        let (title, description) = if self.background_mode {
            (
                "Background Mode Enabled",
                "Device connection will be maintained when app is in background",
            )
        } else {
            (
                "Background Mode Disabled",
                "Device connection will not be maintained when app is in background",
            )
        };
        info!("{}", title);
        self.notifier
            .notice(Signal::BackgroundModeChanged, title, description);
        self.notifier
            .send(AppEvent::BackgroundMode(self.background_mode));
        self.background_mode
    }

    /// Cancels any pending retry and drops the active link.
    pub async fn teardown(&mut self) {
        self.policy.reset();
        self.disconnect().await;
    }

    async fn reconnect(&mut self, discovered: &DiscoverySet) -> Result<()> {
        let Some(id) = self.last_connected.clone() else {
            self.active = None;
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        match self.policy.attempt(self.backend.as_ref(), &id).await {
            AttemptOutcome::Reconnected => {
                let mut peripheral = Self::resolve(discovered, &id);
                if peripheral.display_name.is_none() {
                    peripheral.display_name = Some(RECONNECTED_FALLBACK_NAME.to_string());
                }
                self.active = Some(peripheral);
                self.set_state(ConnectionState::Connected);
                self.notifier.notice(
                    Signal::Reconnected,
                    "Reconnected",
                    "Successfully reconnected to Bluetooth device",
                );
                Ok(())
            }
            AttemptOutcome::RetryScheduled(_) => Ok(()),
        }
    }

    fn give_up(&mut self, attempts: u32) -> Result<()> {
        let id = self
            .active
            .take()
            .map(|p| p.id)
            .or_else(|| self.last_connected.clone());
        self.set_state(ConnectionState::Disconnected);
        self.notifier.notice(
            Signal::ReconnectionExhausted,
            "Reconnection Failed",
            "Please manually reconnect to your device",
        );
        match id {
            Some(id) => Err(BleError::ReconnectionExhausted { id, attempts }),
            None => Ok(()),
        }
    }

    fn resolve(discovered: &DiscoverySet, id: &PeripheralId) -> Peripheral {
        discovered.find(id).cloned().unwrap_or_else(|| Peripheral {
            id: id.clone(),
            display_name: None,
        })
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.notifier.send(AppEvent::ConnectionState(state));
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the peripheral held by the current link or episode
    pub fn active(&self) -> Option<&Peripheral> {
        self.active.as_ref()
    }

    /// Get the reconnection target
    pub fn last_connected(&self) -> Option<&PeripheralId> {
        self.last_connected.as_ref()
    }

    /// Check if background mode is enabled
    pub fn background_mode(&self) -> bool {
        self.background_mode
    }

    /// Failed attempts in the running episode
    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.attempts()
    }

    /// Check if a reconnection retry is scheduled
    pub fn retry_pending(&self) -> bool {
        self.policy.retry_pending()
    }
}
