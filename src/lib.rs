//! BLE connection management with automatic, bounded reconnection.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{BackendError, BleError};
pub use domain::models::{
    AdapterStatus, AppEvent, AppStateChange, BluetoothCommand, ConnectionState, DiscoverySet,
    MessageSeverity, Notice, Peripheral, PeripheralId, Signal,
};
pub use infrastructure::bluetooth::backend::{BleBackend, InitOptions, ScanRequest, TransportEvent};
pub use infrastructure::bluetooth::lifecycle::LifecycleBridge;
pub use infrastructure::bluetooth::subscription::Subscription;
pub use infrastructure::bluetooth::{BluetoothConfig, BluetoothService};
