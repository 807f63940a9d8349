use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque platform identifier of a peripheral, stable per physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A discoverable / connectable BLE device. Identity is by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    pub display_name: Option<String>,
}

impl Peripheral {
    pub fn new(id: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            id: PeripheralId::new(id),
            display_name: display_name.map(str::to_string),
        }
    }

    /// Name shown to the user: the advertised name, or a short form of the id.
    pub fn label(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let id = self.id.as_str();
                let tail: String = id
                    .chars()
                    .rev()
                    .take(6)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("Unknown Device ({})", tail)
            }
        }
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peripheral {}

/// Peripherals seen during the current scan, in first-seen order, one entry per id.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySet {
    peripherals: Vec<Peripheral>,
}

impl DiscoverySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the peripheral unless its id is already present.
    /// Returns `true` when it was newly added.
    pub(crate) fn insert(&mut self, peripheral: Peripheral) -> bool {
        if self.contains(&peripheral.id) {
            return false;
        }
        self.peripherals.push(peripheral);
        true
    }

    pub(crate) fn clear(&mut self) {
        self.peripherals.clear();
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.peripherals.iter().any(|p| &p.id == id)
    }

    pub fn find(&self, id: &PeripheralId) -> Option<&Peripheral> {
        self.peripherals.iter().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.iter()
    }

    pub fn as_slice(&self) -> &[Peripheral] {
        &self.peripherals
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Available,
    Unavailable,
}

/// Named signals surfaced to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Connected,
    Disconnected,
    ConnectionFailed,
    DisconnectFailed,
    Reconnected,
    ReconnectionExhausted,
    AdapterUnavailable,
    ScanFailed,
    BackgroundModeChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient notice: one signal with a title / description pair.
#[derive(Debug, Clone)]
pub struct Notice {
    pub signal: Signal,
    pub title: String,
    pub description: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Notice(Notice),
    ConnectionState(ConnectionState),
    AdapterStatus(AdapterStatus),
    DeviceFound(Peripheral),
    ScanStateChanged(bool),
    BackgroundMode(bool),
}

/// Foreground / background transition reported by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStateChange {
    pub is_active: bool,
}

/// Commands accepted by [`crate::BluetoothService::run`].
#[derive(Debug, Clone)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(PeripheralId),
    Disconnect,
    ToggleBackgroundMode,
    Shutdown,
}
