//! Platform radio seam.
//!
//! Everything above this module talks to the BLE stack through [`BleRadio`]
//! and [`GattLink`], so the session logic runs unchanged against btleplug
//! or a scripted radio in tests.

use crate::domain::models::PeripheralIdentity;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no usable bluetooth adapter: {0}")]
    AdapterUnavailable(String),
    #[error("peripheral {0} not found")]
    DeviceNotFound(String),
    #[error("link dropped")]
    Disconnected,
    #[error("operation rejected by peripheral: {0}")]
    Rejected(String),
    #[error("radio error: {0}")]
    Other(String),
}

/// One item of a discovery sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Discovered {
        address: String,
        advertised_name: Option<String>,
    },
    /// The radio gave up scanning. Nothing follows this event.
    Failed(String),
}

/// Services and their characteristics as enumerated on a connected peripheral.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

/// Which half of a service/characteristic lookup came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingAttribute {
    Service,
    Characteristic,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Uuid, characteristic: Uuid) {
        self.services.entry(service).or_default().insert(characteristic);
    }

    pub fn add_service(&mut self, service: Uuid) {
        self.services.entry(service).or_default();
    }

    pub fn locate(&self, service: Uuid, characteristic: Uuid) -> Result<(), MissingAttribute> {
        let characteristics = self
            .services
            .get(&service)
            .ok_or(MissingAttribute::Service)?;
        if characteristics.contains(&characteristic) {
            Ok(())
        } else {
            Err(MissingAttribute::Characteristic)
        }
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

/// An open GATT connection to a single peripheral.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn discover_services(&self) -> Result<ServiceCatalog, RadioError>;

    /// Write with response. `Ok` means the peripheral acknowledged the value.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;
}

/// BLE central role on the local adapter.
#[async_trait]
pub trait BleRadio: Send + Sync + 'static {
    type Link: GattLink + 'static;

    /// Start discovery. Events arrive on the returned channel until
    /// [`BleRadio::stop_scan`] is called.
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Look up the name the radio currently reports for `address`, without
    /// scanning. `None` if the address is unknown.
    async fn resolve(&self, address: &str) -> Result<Option<String>, RadioError>;

    async fn connect(&self, identity: &PeripheralIdentity) -> Result<Self::Link, RadioError>;

    /// Tear down a connection attempt whose `connect` future was dropped
    /// before it produced a link. The platform may still complete it.
    async fn cancel_connect(&self, identity: &PeripheralIdentity) -> Result<(), RadioError>;
}
