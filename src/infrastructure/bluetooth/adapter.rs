//! BLE adapter bring-up and availability.

use crate::domain::models::{AdapterStatus, AppEvent, Signal};
use crate::infrastructure::bluetooth::backend::{BleBackend, InitOptions};
use crate::infrastructure::bluetooth::notifier::Notifier;
use std::sync::Arc;
use tracing::{error, info};

/// Tracks whether the platform adapter can be used
pub struct AdapterMonitor {
    backend: Arc<dyn BleBackend>,
    notifier: Notifier,
    options: InitOptions,
    status: AdapterStatus,
}

impl AdapterMonitor {
    /// Create a new monitor; the adapter counts as unavailable until initialized
    pub fn new(backend: Arc<dyn BleBackend>, notifier: Notifier, options: InitOptions) -> Self {
        Self {
            backend,
            notifier,
            options,
            status: AdapterStatus::Unavailable,
        }
    }

    /// Brings the platform adapter up. Never retries on its own; callers may re-invoke.
    pub async fn initialize(&mut self) -> AdapterStatus {
        self.status = match self.backend.initialize(self.options).await {
            Ok(()) => {
                info!("Bluetooth initialized successfully");
                AdapterStatus::Available
            }
            Err(e) => {
                error!("Bluetooth initialization error: {}", e);
                self.notifier.notice(
                    Signal::AdapterUnavailable,
                    "Bluetooth Error",
                    "Failed to initialize Bluetooth. Please ensure Bluetooth is enabled.",
                );
                AdapterStatus::Unavailable
            }
        };
        self.notifier.send(AppEvent::AdapterStatus(self.status));
        self.status
    }

    /// Get the adapter status from the last initialization
    pub fn status(&self) -> AdapterStatus {
        self.status
    }

    /// Check if the adapter is usable
    pub fn is_available(&self) -> bool {
        self.status == AdapterStatus::Available
    }
}
