//! BLE Scanner Module
//!
//! Time-bounded discovery of nearby peripherals, filtered by advertised name.

use super::radio::{BleRadio, RadioError, ScanEvent};
use crate::domain::models::PeripheralIdentity;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Fixed discovery window for locating the lock.
pub const SCAN_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("no matching peripheral advertised within the scan window")]
    NotFound,
    #[error("scan failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Starts discovery runs on a shared radio.
pub struct PeripheralScanner<R: BleRadio> {
    radio: Arc<R>,
}

impl<R: BleRadio> PeripheralScanner<R> {
    pub fn new(radio: Arc<R>) -> Self {
        Self { radio }
    }

    /// Begin a discovery run that ends on its own after `window`.
    pub async fn scan(&self, window: Duration) -> Result<Scan<R>, ScanError> {
        self.scan_until(Instant::now() + window).await
    }

    /// Begin a discovery run that ends at `deadline`. Time spent starting the
    /// radio counts against the same deadline.
    pub async fn scan_until(&self, deadline: Instant) -> Result<Scan<R>, ScanError> {
        info!(
            "Starting BLE scan ({}s window)",
            deadline.saturating_duration_since(Instant::now()).as_secs()
        );
        let events = self.radio.start_scan().await?;
        Ok(Scan {
            radio: self.radio.clone(),
            events: Some(events),
            deadline,
            stopped: false,
        })
    }

    /// Scan until the first peripheral advertising exactly `target_name`.
    #[cfg(test)]
    pub async fn find_first(
        &self,
        target_name: &str,
        window: Duration,
    ) -> Result<PeripheralIdentity, ScanError> {
        let mut scan = self.scan(window).await?;
        let result = scan.find_match(target_name).await;
        scan.stop().await;
        result
    }

    /// Every distinct named peripheral seen during `window`, in discovery order.
    pub async fn collect_named(
        &self,
        window: Duration,
    ) -> Result<Vec<PeripheralIdentity>, ScanError> {
        let mut scan = self.scan(window).await?;
        let mut found: Vec<PeripheralIdentity> = Vec::new();
        let mut failure = None;

        while let Some(event) = scan.next().await {
            match event {
                ScanEvent::Discovered {
                    address,
                    advertised_name: Some(name),
                } => {
                    if !found.iter().any(|p| p.address == address) {
                        found.push(PeripheralIdentity::new(address, name));
                    }
                }
                ScanEvent::Discovered { .. } => {}
                ScanEvent::Failed(reason) => failure = Some(reason),
            }
        }
        scan.stop().await;

        match failure {
            Some(reason) => Err(ScanError::Failed(reason)),
            None => Ok(found),
        }
    }
}

/// One discovery run.
///
/// Yields events until the window elapses, the radio reports a failure, or
/// [`Scan::stop`] is called. After `stop` no further events are produced.
pub struct Scan<R: BleRadio> {
    radio: Arc<R>,
    events: Option<mpsc::UnboundedReceiver<ScanEvent>>,
    deadline: Instant,
    stopped: bool,
}

impl<R: BleRadio> Scan<R> {
    pub async fn next(&mut self) -> Option<ScanEvent> {
        let events = self.events.as_mut()?;
        match timeout_at(self.deadline, events.recv()).await {
            Ok(Some(ScanEvent::Failed(reason))) => {
                self.events = None;
                Some(ScanEvent::Failed(reason))
            }
            Ok(Some(event)) => Some(event),
            Ok(None) => {
                self.events = None;
                Some(ScanEvent::Failed("radio ended the scan".to_string()))
            }
            Err(_) => {
                debug!("Scan window elapsed");
                self.events = None;
                None
            }
        }
    }

    /// Consume events until an exact name match. First match wins.
    pub async fn find_match(&mut self, target_name: &str) -> Result<PeripheralIdentity, ScanError> {
        while let Some(event) = self.next().await {
            match event {
                ScanEvent::Discovered {
                    address,
                    advertised_name: Some(name),
                } if name == target_name => {
                    info!("Found target device {} at {}", name, address);
                    self.events = None;
                    return Ok(PeripheralIdentity::new(address, name));
                }
                ScanEvent::Discovered {
                    address,
                    advertised_name,
                } => {
                    debug!("Ignoring {} ({:?})", address, advertised_name);
                }
                ScanEvent::Failed(reason) => {
                    warn!("Scan failed: {}", reason);
                    return Err(ScanError::Failed(reason));
                }
            }
        }
        Err(ScanError::NotFound)
    }

    /// Stop the radio scan. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.events = None;
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Stopping BLE scan...");
        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan cleanly: {}", e);
        }
    }
}

impl<R: BleRadio> Drop for Scan<R> {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        let radio = self.radio.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = radio.stop_scan().await {
                    warn!("Failed to stop abandoned scan: {}", e);
                }
            });
        }
    }
}
