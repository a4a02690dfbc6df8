//! Scripted in-memory radio used by the unit tests.

use super::radio::{BleRadio, GattLink, RadioError, ScanEvent, ServiceCatalog};
use crate::domain::models::PeripheralIdentity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How a scripted operation behaves.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Succeed,
    Fail(RadioError),
    /// Never completes; only a timeout or cancellation ends it.
    Hang,
    /// Succeeds after the given time.
    Delay(Duration),
}

impl Step {
    async fn run(&self) -> Result<(), RadioError> {
        match self {
            Step::Succeed => Ok(()),
            Step::Fail(err) => Err(err.clone()),
            Step::Hang => std::future::pending().await,
            Step::Delay(after) => {
                tokio::time::sleep(*after).await;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub resolves: usize,
    pub connects: Vec<String>,
    pub cancelled_connects: Vec<String>,
    pub discovers: usize,
    pub writes: Vec<Vec<u8>>,
    pub disconnects: usize,
}

#[derive(Debug)]
struct Script {
    advertisements: Vec<(Duration, ScanEvent)>,
    start_scan: Step,
    known: HashMap<String, String>,
    connect: Step,
    discover: Step,
    catalog: ServiceCatalog,
    write: Step,
    disconnect: Step,
}

#[derive(Debug)]
struct Inner {
    script: Script,
    calls: Calls,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeRadio {
    inner: Arc<Mutex<Inner>>,
}

impl FakeRadio {
    /// A radio whose peripherals all succeed, exposing `service` with `characteristic`.
    pub(crate) fn new(service: Uuid, characteristic: Uuid) -> Self {
        let mut catalog = ServiceCatalog::new();
        catalog.insert(service, characteristic);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                script: Script {
                    advertisements: Vec::new(),
                    start_scan: Step::Succeed,
                    known: HashMap::new(),
                    connect: Step::Succeed,
                    discover: Step::Succeed,
                    catalog,
                    write: Step::Succeed,
                    disconnect: Step::Succeed,
                },
                calls: Calls::default(),
                scan_tx: None,
            })),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Emit `event` `after` the scan starts.
    pub(crate) fn advertise(self, after: Duration, event: ScanEvent) -> Self {
        self.inner().script.advertisements.push((after, event));
        self
    }

    pub(crate) fn advertise_named(self, after: Duration, address: &str, name: &str) -> Self {
        self.advertise(
            after,
            ScanEvent::Discovered {
                address: address.to_string(),
                advertised_name: Some(name.to_string()),
            },
        )
    }

    /// Make `address` resolvable without a scan, reporting `name`.
    pub(crate) fn knows(self, address: &str, name: &str) -> Self {
        self.inner()
            .script
            .known
            .insert(address.to_string(), name.to_string());
        self
    }

    pub(crate) fn start_scan_step(self, step: Step) -> Self {
        self.inner().script.start_scan = step;
        self
    }

    pub(crate) fn connect_step(self, step: Step) -> Self {
        self.inner().script.connect = step;
        self
    }

    pub(crate) fn discover_step(self, step: Step) -> Self {
        self.inner().script.discover = step;
        self
    }

    pub(crate) fn write_step(self, step: Step) -> Self {
        self.inner().script.write = step;
        self
    }

    pub(crate) fn disconnect_step(self, step: Step) -> Self {
        self.inner().script.disconnect = step;
        self
    }

    pub(crate) fn catalog(self, catalog: ServiceCatalog) -> Self {
        self.inner().script.catalog = catalog;
        self
    }

    pub(crate) fn calls<T>(&self, f: impl FnOnce(&Calls) -> T) -> T {
        f(&self.inner().calls)
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.inner().scan_tx.is_some()
    }
}

#[async_trait]
impl BleRadio for FakeRadio {
    type Link = FakeLink;

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, RadioError> {
        let (step, advertisements) = {
            let mut inner = self.inner();
            inner.calls.scans_started += 1;
            (
                inner.script.start_scan.clone(),
                inner.script.advertisements.clone(),
            )
        };
        step.run().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().scan_tx = Some(tx.clone());
        for (after, event) in advertisements {
            let tx = tx.downgrade();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(event);
                }
            });
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let mut inner = self.inner();
        inner.calls.scans_stopped += 1;
        inner.scan_tx = None;
        Ok(())
    }

    async fn resolve(&self, address: &str) -> Result<Option<String>, RadioError> {
        let mut inner = self.inner();
        inner.calls.resolves += 1;
        Ok(inner.script.known.get(address).cloned())
    }

    async fn connect(&self, identity: &PeripheralIdentity) -> Result<FakeLink, RadioError> {
        let step = {
            let mut inner = self.inner();
            inner.calls.connects.push(identity.address.clone());
            inner.script.connect.clone()
        };
        step.run().await?;
        Ok(FakeLink {
            radio: self.clone(),
        })
    }

    async fn cancel_connect(&self, identity: &PeripheralIdentity) -> Result<(), RadioError> {
        self.inner()
            .calls
            .cancelled_connects
            .push(identity.address.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeLink {
    radio: FakeRadio,
}

#[async_trait]
impl GattLink for FakeLink {
    async fn discover_services(&self) -> Result<ServiceCatalog, RadioError> {
        let (step, catalog) = {
            let mut inner = self.radio.inner();
            inner.calls.discovers += 1;
            (inner.script.discover.clone(), inner.script.catalog.clone())
        };
        step.run().await?;
        Ok(catalog)
    }

    async fn write(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let step = {
            let mut inner = self.radio.inner();
            inner.calls.writes.push(payload.to_vec());
            inner.script.write.clone()
        };
        step.run().await
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        let step = {
            let mut inner = self.radio.inner();
            inner.calls.disconnects += 1;
            inner.script.disconnect.clone()
        };
        step.run().await
    }
}
