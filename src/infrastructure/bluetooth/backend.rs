//! Platform seam: everything the connection core needs from a BLE stack.

use crate::domain::error::BackendError;
use crate::domain::models::{Peripheral, PeripheralId};
use crate::infrastructure::bluetooth::subscription::Subscription;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Adapter bring-up options. Passed through to the platform untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOptions {
    pub android_never_for_location: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Service UUIDs to filter on; empty means all services.
    pub services: Vec<String>,
    pub allow_duplicates: bool,
}

impl ScanRequest {
    pub fn with_services(services: Vec<String>) -> Self {
        Self {
            services,
            allow_duplicates: false,
        }
    }
}

/// Asynchronous notifications pushed by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Advertisement(Peripheral),
    ConnectionLost(PeripheralId),
}

#[async_trait]
pub trait BleBackend: Send + Sync {
    async fn initialize(&self, options: InitOptions) -> Result<(), BackendError>;

    /// Registers a listener for advertisements and link drops.
    fn subscribe(&self, listener: mpsc::UnboundedSender<TransportEvent>) -> Subscription;

    async fn start_scan(&self, request: &ScanRequest) -> Result<(), BackendError>;

    async fn stop_scan(&self) -> Result<(), BackendError>;

    async fn connect(&self, id: &PeripheralId) -> Result<(), BackendError>;

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), BackendError>;
}
