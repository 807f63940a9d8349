//! WinRT backend
//!
//! Advertisement watcher for discovery, `BluetoothLEDevice` for links.
//! Peripheral ids are the 48-bit Bluetooth address as 12 upper-case hex digits.

use crate::domain::error::BackendError;
use crate::domain::models::{Peripheral, PeripheralId};
use crate::infrastructure::bluetooth::backend::{
    BleBackend, InitOptions, ScanRequest, TransportEvent,
};
use crate::infrastructure::bluetooth::subscription::{ListenerSet, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::GattCommunicationStatus;
use windows::Devices::Bluetooth::{BluetoothAdapter, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;

impl From<windows::core::Error> for BackendError {
    fn from(e: windows::core::Error) -> Self {
        BackendError::Platform(e.message().to_string())
    }
}

struct Link {
    device: BluetoothLEDevice,
    status_token: i64,
}

pub struct WinRtBackend {
    listeners: ListenerSet<TransportEvent>,
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    links: Mutex<HashMap<PeripheralId, Link>>,
}

impl Default for WinRtBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WinRtBackend {
    pub fn new() -> Self {
        Self {
            listeners: ListenerSet::new(),
            watcher: Mutex::new(None),
            links: Mutex::new(HashMap::new()),
        }
    }

    fn watcher(&self) -> MutexGuard<'_, Option<BluetoothLEAdvertisementWatcher>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn links(&self) -> MutexGuard<'_, HashMap<PeripheralId, Link>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_watcher(&self, request: &ScanRequest) -> Result<BluetoothLEAdvertisementWatcher, BackendError> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        if !request.services.is_empty() {
            let filter_uuids = watcher.AdvertisementFilter()?.Advertisement()?.ServiceUuids()?;
            for service in &request.services {
                filter_uuids.Append(parse_uuid(service)?)?;
            }
        }

        let listeners = self.listeners.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    let address = args.BluetoothAddress()?;
                    let peripheral = Peripheral {
                        id: address_to_id(address),
                        display_name: (!name.is_empty()).then_some(name),
                    };
                    listeners.broadcast(TransportEvent::Advertisement(peripheral));
                }
                Ok(())
            },
        );
        watcher.Received(&handler)?;
        Ok(watcher)
    }
}

#[async_trait]
impl BleBackend for WinRtBackend {
    async fn initialize(&self, options: InitOptions) -> Result<(), BackendError> {
        debug!(?options, "Initializing WinRT Bluetooth adapter");
        let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
        if !adapter.IsLowEnergySupported()? {
            warn!("Default adapter does not support Bluetooth LE");
            return Err(BackendError::Unavailable);
        }

        let radio = adapter.GetRadioAsync()?.await?;
        if radio.State()? != RadioState::On {
            warn!("Bluetooth radio is off");
            return Err(BackendError::Unavailable);
        }
        Ok(())
    }

    fn subscribe(&self, listener: mpsc::UnboundedSender<TransportEvent>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    async fn start_scan(&self, request: &ScanRequest) -> Result<(), BackendError> {
        let watcher = self.build_watcher(request)?;
        watcher.Start()?;
        if let Some(previous) = self.watcher().replace(watcher) {
            let _ = previous.Stop();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BackendError> {
        if let Some(watcher) = self.watcher().take() {
            watcher.Stop()?;
        }
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), BackendError> {
        let address = id_to_address(id)?;
        info!("Connecting to Bluetooth device: {:#X}", address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;

        // GATT discovery is what actually brings the link up on Windows
        let services = device.GetGattServicesAsync()?.await?;
        if services.Status()? != GattCommunicationStatus::Success {
            let _ = device.Close();
            return Err(BackendError::Platform(format!(
                "GATT services unavailable: {:?}",
                services.Status()?
            )));
        }

        let listeners = self.listeners.clone();
        let lost_id = id.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        listeners.broadcast(TransportEvent::ConnectionLost(lost_id.clone()));
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        let previous = self.links().insert(
            id.clone(),
            Link {
                device,
                status_token,
            },
        );
        if let Some(previous) = previous {
            close_link(previous);
        }
        Ok(())
    }

    async fn disconnect(&self, id: &PeripheralId) -> Result<(), BackendError> {
        let link = self.links().remove(id);
        match link {
            Some(link) => {
                close_link(link);
                Ok(())
            }
            None => Err(BackendError::NotFound(id.clone())),
        }
    }
}

fn close_link(link: Link) {
    let _ = link.device.RemoveConnectionStatusChanged(link.status_token);
    let _ = link.device.Close();
}

fn address_to_id(address: u64) -> PeripheralId {
    PeripheralId::new(format!("{:012X}", address))
}

fn id_to_address(id: &PeripheralId) -> Result<u64, BackendError> {
    u64::from_str_radix(id.as_str(), 16).map_err(|_| BackendError::NotFound(id.clone()))
}

/// Parse a UUID string into a Windows GUID
pub fn parse_uuid(uuid_str: &str) -> Result<GUID, BackendError> {
    let invalid = || BackendError::Platform(format!("Invalid UUID format: {}", uuid_str));
    let hex = uuid_str.replace('-', "");

    if hex.len() != 32 || !hex.is_ascii() {
        return Err(invalid());
    }

    let d1 = u32::from_str_radix(&hex[0..8], 16).map_err(|_| invalid())?;
    let d2 = u16::from_str_radix(&hex[8..12], 16).map_err(|_| invalid())?;
    let d3 = u16::from_str_radix(&hex[12..16], 16).map_err(|_| invalid())?;

    let mut d4 = [0u8; 8];
    for (i, byte) in d4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[16 + i * 2..18 + i * 2], 16).map_err(|_| invalid())?;
    }

    Ok(GUID {
        data1: d1,
        data2: d2,
        data3: d3,
        data4: d4,
    })
}
