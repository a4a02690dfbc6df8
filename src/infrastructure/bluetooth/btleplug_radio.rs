//! Radio backed by `btleplug` (BlueZ, CoreBluetooth, WinRT).

use super::radio::{BleRadio, GattLink, RadioError, ScanEvent, ServiceCatalog};
use crate::domain::models::PeripheralIdentity;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// First local adapter, driven through btleplug.
///
/// Peripheral addresses are btleplug `PeripheralId` strings: the BD address
/// on Linux and Windows, a CoreBluetooth UUID on macOS.
pub struct BtleplugRadio {
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugRadio {
    pub async fn new() -> Result<Self, RadioError> {
        let manager = Manager::new().await.map_err(radio_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(radio_error)?
            .into_iter()
            .next()
            .ok_or_else(|| RadioError::AdapterUnavailable("no bluetooth adapter found".into()))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using bluetooth adapter {}", info),
            Err(e) => debug!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            adapter,
            scan_task: Mutex::new(None),
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, RadioError> {
        let peripherals = self.adapter.peripherals().await.map_err(radio_error)?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.id().to_string().eq_ignore_ascii_case(address)))
    }

    fn replace_scan_task(&self, task: Option<JoinHandle<()>>) {
        let mut slot = match self.scan_task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = std::mem::replace(&mut *slot, task) {
            previous.abort();
        }
    }
}

#[async_trait]
impl BleRadio for BtleplugRadio {
    type Link = BtleplugLink;

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, RadioError> {
        let mut events = self.adapter.events().await.map_err(radio_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(radio_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let advertised_name = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|props| props.local_name),
                    Err(e) => {
                        trace!("Discovered peripheral vanished: {}", e);
                        continue;
                    }
                };
                let event = ScanEvent::Discovered {
                    address: id.to_string(),
                    advertised_name,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(ScanEvent::Failed("adapter event stream ended".to_string()));
        });

        self.replace_scan_task(Some(task));
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.replace_scan_task(None);
        self.adapter.stop_scan().await.map_err(radio_error)
    }

    async fn resolve(&self, address: &str) -> Result<Option<String>, RadioError> {
        let Some(peripheral) = self.find_peripheral(address).await? else {
            return Ok(None);
        };
        let properties = peripheral.properties().await.map_err(radio_error)?;
        Ok(properties.and_then(|props| props.local_name))
    }

    async fn connect(&self, identity: &PeripheralIdentity) -> Result<BtleplugLink, RadioError> {
        let peripheral = self
            .find_peripheral(&identity.address)
            .await?
            .ok_or_else(|| RadioError::DeviceNotFound(identity.address.clone()))?;

        if !peripheral.is_connected().await.map_err(radio_error)? {
            peripheral.connect().await.map_err(radio_error)?;
        }
        info!("Link established with {}", identity.address);
        Ok(BtleplugLink { peripheral })
    }

    async fn cancel_connect(&self, identity: &PeripheralIdentity) -> Result<(), RadioError> {
        let Some(peripheral) = self.find_peripheral(&identity.address).await? else {
            return Ok(());
        };
        // BlueZ and WinRT abort a pending connect on disconnect.
        match peripheral.disconnect().await {
            Ok(()) | Err(btleplug::Error::NotConnected) => Ok(()),
            Err(e) => Err(radio_error(e)),
        }
    }
}

pub struct BtleplugLink {
    peripheral: Peripheral,
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn discover_services(&self) -> Result<ServiceCatalog, RadioError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(radio_error)?;

        let mut catalog = ServiceCatalog::new();
        for service in self.peripheral.services() {
            catalog.add_service(service.uuid);
            for characteristic in &service.characteristics {
                catalog.insert(service.uuid, characteristic.uuid);
            }
        }
        Ok(catalog)
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                RadioError::Rejected(format!("characteristic {characteristic} not present"))
            })?;

        self.peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(radio_error)
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.peripheral.disconnect().await.map_err(radio_error)
    }
}

fn radio_error(err: btleplug::Error) -> RadioError {
    match err {
        btleplug::Error::PermissionDenied => {
            RadioError::PermissionDenied("bluetooth access denied by the platform".to_string())
        }
        btleplug::Error::DeviceNotFound => RadioError::DeviceNotFound("peripheral".to_string()),
        btleplug::Error::NotConnected => RadioError::Disconnected,
        btleplug::Error::NotSupported(what) => RadioError::AdapterUnavailable(what),
        other => RadioError::Other(other.to_string()),
    }
}
