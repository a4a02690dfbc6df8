//! Unlock Session Controller
//!
//! Drives one unlock attempt from request to teardown:
//!
//! ```text
//! Idle -> Resolving -> Connecting -> DiscoveringServices -> Writing -> Completing -> Idle
//!             \             \                 \                \
//!              +-------------+-----------------+----------------+--> Failed -> Idle
//! ```
//!
//! Only one attempt runs at a time. Each hardware step is a future raced
//! against the active deadline and the shutdown signal; whichever loses is
//! dropped, then the link is closed before the terminal outcome is reported.

use crate::domain::error::UnlockError;
use crate::domain::models::{
    AppEvent, LockConfig, MessageSeverity, PeripheralIdentity, SessionPhase, StatusMessage,
};
use crate::domain::settings::SettingsProvider;
use crate::infrastructure::bluetooth::{
    connection::{ConnectionError, ConnectionSession},
    protocol,
    radio::{BleRadio, MissingAttribute, RadioError},
    scanner::{PeripheralScanner, ScanError, SCAN_WINDOW},
};
use crate::infrastructure::identity_cache::IdentityCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// From the start of the connection attempt until the write is acknowledged.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the "unlocked" state is held after a successful write.
pub const UNLOCK_HOLD: Duration = Duration::from_secs(2);

/// Single-flight unlock controller.
pub struct SessionController<R: BleRadio> {
    radio: Arc<R>,
    settings: Arc<dyn SettingsProvider>,
    cache: IdentityCache,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    phase: watch::Sender<SessionPhase>,
    shutdown: watch::Sender<bool>,
}

impl<R: BleRadio> SessionController<R> {
    pub fn new(
        radio: Arc<R>,
        settings: Arc<dyn SettingsProvider>,
        cache: IdentityCache,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            radio,
            settings,
            cache,
            event_sender,
            phase: watch::channel(SessionPhase::Idle).0,
            shutdown: watch::channel(false).0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Run one unlock attempt to completion.
    ///
    /// Returns `AlreadyInProgress` immediately, without touching the running
    /// attempt, if one is in flight.
    pub async fn request_unlock(&self) -> Result<(), UnlockError> {
        if *self.shutdown.borrow() {
            return Err(UnlockError::Cancelled);
        }

        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Idle {
                *phase = SessionPhase::Resolving;
                true
            } else {
                false
            }
        });
        if !claimed {
            warn!("Unlock requested while another is in progress");
            return Err(UnlockError::AlreadyInProgress);
        }

        let mut session = Session {
            phase: &self.phase,
            connection: ConnectionSession::new(self.radio.clone()),
            deadline: None,
            event_sender: &self.event_sender,
        };
        session.emit(AppEvent::PhaseChanged(SessionPhase::Resolving));
        info!("Unlock session started");

        let mut shutdown = self.shutdown.subscribe();
        let result = self.run(&mut session, &mut shutdown).await;
        self.finish(&mut session, &result).await;
        result
    }

    /// Cancel any running attempt, wait for its cleanup, and refuse new ones.
    pub async fn shutdown(&self) {
        info!("Shutting down unlock controller");
        self.shutdown.send_replace(true);
        let mut phase = self.phase.subscribe();
        let _ = phase.wait_for(|p| *p == SessionPhase::Idle).await;
    }

    async fn run(
        &self,
        session: &mut Session<'_, R>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), UnlockError> {
        let config = self.settings.lock_config().map_err(|e| {
            error!("Refusing to unlock with invalid settings: {}", e);
            UnlockError::from(e)
        })?;

        let identity = self.resolve(session, &config, shutdown).await?;

        session.advance(SessionPhase::Connecting);
        let deadline = Instant::now() + SESSION_TIMEOUT;
        session.deadline = Some(deadline);
        session.log("Connecting to lock...", MessageSeverity::Info);
        bounded(deadline, shutdown, session.connection.open(&identity))
            .await?
            .map_err(connect_error)?;

        if let Err(e) = self.cache.remember(&identity) {
            warn!("Could not save device identity: {}", e);
        }

        session.advance(SessionPhase::DiscoveringServices);
        let catalog = bounded(deadline, shutdown, session.connection.discover_services())
            .await?
            .map_err(connect_error)?;
        catalog
            .locate(config.service_id, config.command_characteristic_id)
            .map_err(|missing| {
                error!(
                    "{:?} missing (service {}, characteristic {})",
                    missing, config.service_id, config.command_characteristic_id
                );
                missing_error(missing)
            })?;

        session.advance(SessionPhase::Writing);
        let payload = protocol::encode(config.press_duration_ms, config.release_duration_ms);
        debug!("Sending unlock payload: {}", String::from_utf8_lossy(&payload));
        bounded(
            deadline,
            shutdown,
            session.connection.write_characteristic(
                config.service_id,
                config.command_characteristic_id,
                &payload,
            ),
        )
        .await?
        .map_err(write_error)?;

        session.deadline = None;
        session.advance(SessionPhase::Completing);
        session.log("Unlock command sent", MessageSeverity::Success);
        session.emit(AppEvent::LockStateChanged(true));
        tokio::select! {
            _ = sleep(UNLOCK_HOLD) => {}
            _ = shutdown_requested(shutdown) => debug!("Unlock hold cut short by shutdown"),
        }
        session.emit(AppEvent::LockStateChanged(false));
        Ok(())
    }

    /// Find the peripheral to connect to, preferring the cached one.
    async fn resolve(
        &self,
        session: &Session<'_, R>,
        config: &LockConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PeripheralIdentity, UnlockError> {
        if let Some(cached) = self.cache.recall() {
            if cached.display_name == config.target_name {
                let check = timeout(
                    SCAN_WINDOW,
                    self.cache.is_still_valid(self.radio.as_ref(), &cached),
                );
                let still_valid = tokio::select! {
                    biased;
                    _ = shutdown_requested(shutdown) => return Err(UnlockError::Cancelled),
                    valid = check => valid.unwrap_or(false),
                };
                if still_valid {
                    info!("Using saved device {}", cached.address);
                    return Ok(cached);
                }
            } else {
                debug!(
                    "Saved device {:?} does not match target {:?}",
                    cached.display_name, config.target_name
                );
            }
        }

        session.log("Scanning for lock...", MessageSeverity::Info);
        let scan_deadline = Instant::now() + SCAN_WINDOW;
        let scanner = PeripheralScanner::new(self.radio.clone());
        let mut scan = match bounded(
            scan_deadline,
            shutdown,
            scanner.scan_until(scan_deadline),
        )
        .await
        {
            Ok(started) => started.map_err(scan_error)?,
            Err(e) => {
                let _ = self.radio.stop_scan().await;
                return Err(match e {
                    UnlockError::Timeout => UnlockError::NotFound,
                    other => other,
                });
            }
        };

        let found = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => Err(UnlockError::Cancelled),
            found = scan.find_match(&config.target_name) => found.map_err(scan_error),
        };
        scan.stop().await;
        found
    }

    /// Release the link and return to `Idle`, reporting the outcome once.
    async fn finish(&self, session: &mut Session<'_, R>, result: &Result<(), UnlockError>) {
        match result {
            Ok(()) => {
                session.connection.close().await;
                session.advance(SessionPhase::Idle);
                info!("Unlock session completed");
            }
            Err(e) => {
                session.advance(SessionPhase::Failed);
                if let Some(deadline) = session.deadline.take() {
                    debug!(
                        "Failed with {:?} left before the session deadline",
                        deadline.saturating_duration_since(Instant::now())
                    );
                }
                session.connection.close().await;
                session.advance(SessionPhase::Idle);
                error!("Unlock failed: {}", e);
                session.log(&e.to_string(), MessageSeverity::Error);
            }
        }
        session.emit(AppEvent::SessionFinished(result.clone()));
    }
}

/// Live state of the one in-flight attempt.
struct Session<'a, R: BleRadio> {
    phase: &'a watch::Sender<SessionPhase>,
    connection: ConnectionSession<R>,
    deadline: Option<Instant>,
    event_sender: &'a mpsc::UnboundedSender<AppEvent>,
}

impl<R: BleRadio> Session<'_, R> {
    fn advance(&self, next: SessionPhase) {
        let current = *self.phase.borrow();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        info!("Session phase: {} -> {}", current, next);
        self.phase.send_replace(next);
        self.emit(AppEvent::PhaseChanged(next));
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }

    fn log(&self, message: &str, severity: MessageSeverity) {
        self.emit(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl<R: BleRadio> Drop for Session<'_, R> {
    fn drop(&mut self) {
        // Only reached with a non-idle phase if the request future was dropped.
        if *self.phase.borrow() != SessionPhase::Idle {
            self.phase.send_replace(SessionPhase::Idle);
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Race `fut` against the deadline and shutdown. The loser is dropped.
async fn bounded<F: Future>(
    deadline: Instant,
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Result<F::Output, UnlockError> {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => Err(UnlockError::Cancelled),
        res = timeout_at(deadline, fut) => res.map_err(|_| {
            error!("Deadline elapsed");
            UnlockError::Timeout
        }),
    }
}

fn scan_error(err: ScanError) -> UnlockError {
    match err {
        ScanError::NotFound => UnlockError::NotFound,
        ScanError::Failed(reason) => UnlockError::ScanFailed(reason),
        ScanError::Radio(RadioError::PermissionDenied(msg)) => UnlockError::PermissionDenied(msg),
        ScanError::Radio(RadioError::AdapterUnavailable(msg)) => {
            UnlockError::RadioUnavailable(msg)
        }
        ScanError::Radio(other) => UnlockError::ScanFailed(other.to_string()),
    }
}

fn connect_error(err: ConnectionError) -> UnlockError {
    match err {
        ConnectionError::PermissionDenied(msg) => UnlockError::PermissionDenied(msg),
        other => {
            warn!("Connection failed: {}", other);
            UnlockError::ConnectFailed
        }
    }
}

fn write_error(err: ConnectionError) -> UnlockError {
    match err {
        ConnectionError::PermissionDenied(msg) => UnlockError::PermissionDenied(msg),
        ConnectionError::NotFound(missing) => missing_error(missing),
        other => {
            warn!("Write failed: {}", other);
            UnlockError::WriteFailed
        }
    }
}

fn missing_error(missing: MissingAttribute) -> UnlockError {
    match missing {
        MissingAttribute::Service => UnlockError::ServiceNotFound,
        MissingAttribute::Characteristic => UnlockError::CharacteristicNotFound,
    }
}
