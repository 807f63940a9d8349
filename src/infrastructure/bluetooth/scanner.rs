//! BLE Scanner Module
//!
//! Time-boxed peripheral discovery with id-based deduplication.

use crate::domain::error::{BleError, Result};
use crate::domain::models::{AppEvent, DiscoverySet, Peripheral, Signal};
use crate::infrastructure::bluetooth::adapter::AdapterMonitor;
use crate::infrastructure::bluetooth::backend::{BleBackend, ScanRequest};
use crate::infrastructure::bluetooth::notifier::Notifier;
use crate::infrastructure::bluetooth::timer::{TimerFired, TimerKind, TimerSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default hard limit on a single scan.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// BLE scanner owning the discovery set of the current scan
pub struct ScanSession {
    backend: Arc<dyn BleBackend>,
    notifier: Notifier,
    request: ScanRequest,
    scan_timeout: Duration,
    discovered: DiscoverySet,
    scanning: bool,
    timeout: TimerSlot,
}

impl ScanSession {
    /// Create a new scanner
    pub fn new(
        backend: Arc<dyn BleBackend>,
        notifier: Notifier,
        request: ScanRequest,
        scan_timeout: Duration,
        timer_sender: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        Self {
            backend,
            notifier,
            request,
            scan_timeout,
            discovered: DiscoverySet::new(),
            scanning: false,
            timeout: TimerSlot::new(TimerKind::ScanTimeout, timer_sender),
        }
    }

    /// Starts discovery. Any running scan is stopped first and the discovery set is cleared.
    pub async fn start_scan(&mut self, adapter: &AdapterMonitor) -> Result<()> {
        if !adapter.is_available() {
            warn!("Scan requested without an available adapter");
            self.notifier.notice(
                Signal::AdapterUnavailable,
                "Bluetooth Error",
                "Bluetooth is not available. Please ensure Bluetooth is enabled.",
            );
            return Err(BleError::AdapterUnavailable);
        }

        self.stop_scan().await;

        info!(services = ?self.request.services, "Starting BLE scan");
        self.discovered.clear();
        self.scanning = true;

        if let Err(e) = self.backend.start_scan(&self.request).await {
            error!("Scan error: {}", e);
            self.scanning = false;
            self.notifier.notice(
                Signal::ScanFailed,
                "Scan Failed",
                "Failed to scan for devices. Please check permissions.",
            );
            return Err(BleError::ScanFailed(e));
        }

        self.timeout.arm(self.scan_timeout);
        self.notifier.send(AppEvent::ScanStateChanged(true));
        Ok(())
    }

    /// Ends discovery. No-op when not scanning.
    pub async fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }

        info!("Stopping BLE scan...");
        self.timeout.cancel();
        self.scanning = false;
        if let Err(e) = self.backend.stop_scan().await {
            error!("Error stopping scan: {}", e);
        }
        self.notifier.send(AppEvent::ScanStateChanged(false));
    }

    /// Records an advertisement. Returns `true` if the peripheral is new to this scan.
    pub fn on_advertisement(&mut self, peripheral: Peripheral) -> bool {
        if !self.scanning {
            debug!(id = %peripheral.id, "Advertisement outside of a scan ignored");
            return false;
        }

        if !self.discovered.insert(peripheral.clone()) {
            return false;
        }

        info!(id = %peripheral.id, name = %peripheral.label(), "Discovered peripheral");
        self.notifier.send(AppEvent::DeviceFound(peripheral));
        true
    }

    /// Stop scanning when the armed scan timeout fires
    pub async fn on_timeout(&mut self, generation: u64) {
        if self.timeout.fire(generation) && self.scanning {
            info!("Scan timed out after {:?}", self.scan_timeout);
            self.stop_scan().await;
        }
    }

    /// Stop scanning and defuse the timeout
    pub async fn teardown(&mut self) {
        self.stop_scan().await;
        self.timeout.cancel();
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Get peripherals found by the current scan
    pub fn discovered(&self) -> &DiscoverySet {
        &self.discovered
    }

    /// Check if the scan timeout is armed
    pub fn timeout_pending(&self) -> bool {
        self.timeout.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdapterStatus;
    use crate::infrastructure::bluetooth::backend::InitOptions;
    use crate::infrastructure::bluetooth::simulated::SimulatedBackend;
    use tokio::time::Instant;

    struct Fixture {
        backend: Arc<SimulatedBackend>,
        adapter: AdapterMonitor,
        scan: ScanSession,
        timers: mpsc::UnboundedReceiver<TimerFired>,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    async fn fixture(available: bool) -> Fixture {
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_adapter_available(available);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let notifier = Notifier::new(event_tx);

        let mut adapter =
            AdapterMonitor::new(backend.clone(), notifier.clone(), InitOptions::default());
        adapter.initialize().await;
        let scan = ScanSession::new(
            backend.clone(),
            notifier,
            ScanRequest::default(),
            SCAN_TIMEOUT,
            timer_tx,
        );

        Fixture {
            backend,
            adapter,
            scan,
            timers,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_without_adapter_fails_immediately() {
        let mut f = fixture(false).await;
        assert_eq!(f.adapter.status(), AdapterStatus::Unavailable);

        let err = f.scan.start_scan(&f.adapter).await.unwrap_err();
        assert_eq!(err, BleError::AdapterUnavailable);
        assert!(!f.scan.is_scanning());
        assert!(f.scan.discovered().is_empty());
        assert!(!f.scan.timeout_pending());
        assert!(f.backend.last_scan_request().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_in_first_seen_order() {
        let mut f = fixture(true).await;
        f.scan.start_scan(&f.adapter).await.unwrap();

        assert!(f.scan.on_advertisement(Peripheral::new("B", Some("Beta"))));
        assert!(f.scan.on_advertisement(Peripheral::new("A", None)));
        assert!(!f.scan.on_advertisement(Peripheral::new("B", Some("Beta 2"))));
        assert!(f.scan.on_advertisement(Peripheral::new("C", Some("Gamma"))));

        let ids: Vec<_> = f.scan.discovered().iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);

        let found = std::iter::from_fn(|| f.events.try_recv().ok())
            .filter(|e| matches!(e, AppEvent::DeviceFound(_)))
            .count();
        assert_eq!(found, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_discovery_set() {
        let mut f = fixture(true).await;
        f.scan.start_scan(&f.adapter).await.unwrap();
        f.scan.on_advertisement(Peripheral::new("A", None));
        f.scan.start_scan(&f.adapter).await.unwrap();
        assert!(f.scan.discovered().is_empty());
        assert!(f.scan.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_auto_stops_after_timeout() {
        let mut f = fixture(true).await;
        let started = Instant::now();
        f.scan.start_scan(&f.adapter).await.unwrap();

        let fired = f.timers.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::ScanTimeout);
        assert_eq!(started.elapsed(), SCAN_TIMEOUT);

        f.scan.on_timeout(fired.generation).await;
        assert!(!f.scan.is_scanning());
        assert!(!f.backend.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_defuses_timeout() {
        let mut f = fixture(true).await;
        f.scan.start_scan(&f.adapter).await.unwrap();
        f.scan.stop_scan().await;
        f.scan.stop_scan().await;

        assert_eq!(f.backend.stop_scan_calls(), 1);
        assert!(!f.scan.timeout_pending());

        tokio::time::sleep(SCAN_TIMEOUT * 2).await;
        assert!(f.timers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_failure_resets_scanning() {
        let mut f = fixture(true).await;
        f.backend.set_scan_failure(true);

        let err = f.scan.start_scan(&f.adapter).await.unwrap_err();
        assert!(matches!(err, BleError::ScanFailed(_)));
        assert!(!f.scan.is_scanning());
        assert!(!f.scan.timeout_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_advertisement_ignored() {
        let mut f = fixture(true).await;
        assert!(!f.scan.on_advertisement(Peripheral::new("A", None)));
        assert!(f.scan.discovered().is_empty());
    }
}
