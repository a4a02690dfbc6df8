//! BLE Connection Module
//!
//! Owns at most one open GATT link and is the only place that link is used.

use super::radio::{BleRadio, GattLink, MissingAttribute, RadioError, ServiceCatalog};
use crate::domain::models::PeripheralIdentity;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on a disconnect during cleanup.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),
    #[error("a connection is already open")]
    Busy,
    #[error("not connected")]
    NotConnected,
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("{0:?} not found")]
    NotFound(MissingAttribute),
    #[error("write rejected: {0}")]
    WriteRejected(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// A single GATT connection, opened once and closed exactly once.
pub struct ConnectionSession<R: BleRadio> {
    radio: Arc<R>,
    link: Option<R::Link>,
    peer: Option<PeripheralIdentity>,
    catalog: Option<ServiceCatalog>,
    /// Target of a `connect` that has started but not yet returned.
    connecting: Option<PeripheralIdentity>,
}

impl<R: BleRadio> ConnectionSession<R> {
    pub fn new(radio: Arc<R>) -> Self {
        Self {
            radio,
            link: None,
            peer: None,
            catalog: None,
            connecting: None,
        }
    }

    /// Connect to `identity`. Fails with `Busy` if a link is already held.
    ///
    /// If this future is dropped before it resolves, the attempt stays
    /// pending and the next [`ConnectionSession::close`] cancels it.
    pub async fn open(&mut self, identity: &PeripheralIdentity) -> Result<(), ConnectionError> {
        if self.link.is_some() {
            return Err(ConnectionError::Busy);
        }

        info!(
            "Connecting to {} ({})",
            identity.display_name, identity.address
        );
        self.connecting = Some(identity.clone());
        let attempt = self.radio.connect(identity).await;
        self.connecting = None;
        let link = attempt.map_err(|e| match e {
            RadioError::PermissionDenied(msg) => ConnectionError::PermissionDenied(msg),
            other => ConnectionError::LinkUnavailable(other.to_string()),
        })?;

        self.link = Some(link);
        self.peer = Some(identity.clone());
        Ok(())
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    #[cfg(test)]
    pub fn peer(&self) -> Option<&PeripheralIdentity> {
        self.peer.as_ref()
    }

    pub async fn discover_services(&mut self) -> Result<ServiceCatalog, ConnectionError> {
        let link = self.link.as_ref().ok_or(ConnectionError::NotConnected)?;
        let catalog = link.discover_services().await.map_err(|e| match e {
            RadioError::PermissionDenied(msg) => ConnectionError::PermissionDenied(msg),
            other => ConnectionError::DiscoveryFailed(other.to_string()),
        })?;

        debug!("Discovered {} services", catalog.service_count());
        self.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// Write `payload` to `characteristic` within `service`, waiting for the ack.
    ///
    /// When services have been discovered the target is checked against the
    /// catalog first, so nothing is sent to an attribute that does not exist.
    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        let link = self.link.as_ref().ok_or(ConnectionError::NotConnected)?;
        if let Some(catalog) = &self.catalog {
            catalog
                .locate(service, characteristic)
                .map_err(ConnectionError::NotFound)?;
        }

        link.write(service, characteristic, payload)
            .await
            .map_err(|e| match e {
                RadioError::PermissionDenied(msg) => ConnectionError::PermissionDenied(msg),
                other => ConnectionError::WriteRejected(other.to_string()),
            })
    }

    /// Release the link, or cancel an abandoned connection attempt.
    /// Idempotent and infallible; errors are only logged.
    pub async fn close(&mut self) {
        self.catalog = None;
        if let Some(pending) = self.connecting.take() {
            warn!("Cancelling abandoned connection attempt to {}", pending.address);
            let cancel = self.radio.cancel_connect(&pending);
            match tokio::time::timeout(CLOSE_TIMEOUT, cancel).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Cancelling the connection attempt failed: {}", e),
                Err(_) => warn!("Connection cancel did not complete within {:?}", CLOSE_TIMEOUT),
            }
        }
        let Some(link) = self.link.take() else {
            return;
        };
        let peer = self.peer.take();

        match tokio::time::timeout(CLOSE_TIMEOUT, link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Disconnect reported an error: {}", e),
            Err(_) => warn!("Disconnect did not complete within {:?}", CLOSE_TIMEOUT),
        }

        if let Some(peer) = peer {
            info!("Disconnected from {}", peer.address);
        }
    }
}

impl<R: BleRadio> Drop for ConnectionSession<R> {
    fn drop(&mut self) {
        let link = self.link.take();
        let pending = self.connecting.take();
        if link.is_none() && pending.is_none() {
            return;
        }
        warn!("Connection dropped while in use, cleaning up in background");
        let radio = self.radio.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(identity) = pending {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, radio.cancel_connect(&identity))
                        .await;
                }
                if let Some(link) = link {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, link.disconnect()).await;
                }
            });
        }
    }
}
