//! In-process scripted radio.
//!
//! Drives the connection core without hardware: tests and `--simulate` use it to
//! inject advertisements, drop links and make connection attempts fail.

use crate::domain::error::BackendError;
use crate::domain::models::{Peripheral, PeripheralId};
use crate::infrastructure::bluetooth::backend::{
    BleBackend, InitOptions, ScanRequest, TransportEvent,
};
use crate::infrastructure::bluetooth::subscription::{ListenerSet, Subscription};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Default)]
struct SimState {
    adapter_available: bool,
    init_calls: u32,
    last_init_options: Option<InitOptions>,
    fail_scans: bool,
    scanning: bool,
    last_scan_request: Option<ScanRequest>,
    stop_scan_calls: u32,
    unreachable: HashSet<PeripheralId>,
    failing_connects: u32,
    fail_disconnects: bool,
    seeded: Vec<Peripheral>,
    connect_attempts: Vec<(PeripheralId, Instant)>,
    connected: HashSet<PeripheralId>,
    disconnect_calls: Vec<PeripheralId>,
}

pub struct SimulatedBackend {
    state: Mutex<SimState>,
    listeners: ListenerSet<TransportEvent>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                adapter_available: true,
                ..SimState::default()
            }),
            listeners: ListenerSet::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_adapter_available(&self, available: bool) {
        self.state().adapter_available = available;
    }

    pub fn set_scan_failure(&self, fail: bool) {
        self.state().fail_scans = fail;
    }

    /// Unreachable peripherals fail every connection attempt until made reachable again.
    pub fn set_reachable(&self, id: &PeripheralId, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.unreachable.remove(id);
        } else {
            state.unreachable.insert(id.clone());
        }
    }

    /// Makes every disconnect report a platform error. The link stays up.
    pub fn set_disconnect_failure(&self, fail: bool) {
        self.state().fail_disconnects = fail;
    }

    /// Makes the next `count` connection attempts fail regardless of target.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    /// Registers a peripheral that advertises as soon as a scan starts.
    pub fn seed(&self, peripheral: Peripheral) {
        self.state().seeded.push(peripheral);
    }

    /// Delivers an advertisement if a scan is running. Returns whether it was delivered.
    pub fn advertise(&self, peripheral: Peripheral) -> bool {
        if !self.state().scanning {
            return false;
        }
        self.listeners
            .broadcast(TransportEvent::Advertisement(peripheral));
        true
    }

    /// Simulates an unexpected link drop for a connected peripheral.
    pub fn drop_link(&self, id: &PeripheralId) -> bool {
        if !self.state().connected.remove(id) {
            return false;
        }
        debug!(%id, "Simulated link drop");
        self.listeners
            .broadcast(TransportEvent::ConnectionLost(id.clone()));
        true
    }

    pub fn init_calls(&self) -> u32 {
        self.state().init_calls
    }

    pub fn last_init_options(&self) -> Option<InitOptions> {
        self.state().last_init_options
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn last_scan_request(&self) -> Option<ScanRequest> {
        self.state().last_scan_request.clone()
    }

    pub fn stop_scan_calls(&self) -> u32 {
        self.state().stop_scan_calls
    }

    pub fn connect_attempts(&self) -> Vec<(PeripheralId, Instant)> {
        self.state().connect_attempts.clone()
    }

    pub fn connect_attempt_count(&self) -> usize {
        self.state().connect_attempts.len()
    }

    pub fn is_connected(&self, id: &PeripheralId) -> bool {
        self.state().connected.contains(id)
    }

    pub fn disconnect_calls(&self) -> Vec<PeripheralId> {
        self.state().disconnect_calls.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl BleBackend for SimulatedBackend {
    async fn initialize(&self, options: InitOptions) -> Result<(), BackendError> {
        let mut state = self.state();
        state.init_calls += 1;
        state.last_init_options = Some(options);
        if state.adapter_available {
            Ok(())
        } else {
            Err(BackendError::Unavailable)
        }
    }

    fn subscribe(&self, listener: mpsc::UnboundedSender<TransportEvent>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn start_scan(&self, request: &ScanRequest) -> Result<(), BackendError> {
        let mut state = self.state();
        if !state.adapter_available {
            return Err(BackendError::Unavailable);
        }
        if state.fail_scans {
            return Err(BackendError::Platform("location permission denied".into()));
        }
        state.scanning = true;
        state.last_scan_request = Some(request.clone());
        let seeded = state.seeded.clone();
        drop(state);

        for peripheral in seeded {
            self.listeners
                .broadcast(TransportEvent::Advertisement(peripheral));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.scanning = false;
        state.stop_scan_calls += 1;
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), BackendError> {
        let mut state = self.state();
        state.connect_attempts.push((id.clone(), Instant::now()));

        if !state.adapter_available {
            return Err(BackendError::Unavailable);
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BackendError::Platform("connection timed out".into()));
        }
        if state.unreachable.contains(id) {
            return Err(BackendError::NotFound(id.clone()));
        }
        state.connected.insert(id.clone());
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), BackendError> {
        let mut state = self.state();
        state.disconnect_calls.push(id.clone());
        if state.fail_disconnects {
            return Err(BackendError::Platform("gatt busy".into()));
        }
        state.connected.remove(id);
        Ok(())
    }
}
