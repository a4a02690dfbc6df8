//! Remembers the last lock we connected to so the next unlock can skip scanning.

use crate::domain::models::PeripheralIdentity;
use crate::infrastructure::bluetooth::radio::BleRadio;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key under which the identity is stored.
pub const IDENTITY_NAMESPACE: &str = "peripheral_identity";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("identity store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("identity store lock poisoned")]
    Poisoned,
}

/// Minimal string key-value persistence.
pub trait IdentityStore: Send + Sync {
    fn read(&self, namespace: &str) -> Result<Option<String>, CacheError>;
    fn write(&self, namespace: &str, value: String) -> Result<(), CacheError>;
    fn remove(&self, namespace: &str) -> Result<(), CacheError>;
}

/// Store backed by a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, String>, CacheError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

impl IdentityStore for JsonFileStore {
    fn read(&self, namespace: &str) -> Result<Option<String>, CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(self.load()?.remove(namespace))
    }

    fn write(&self, namespace: &str, value: String) -> Result<(), CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        // A corrupt file is replaced rather than blocking every future write.
        let mut entries = self.load().unwrap_or_default();
        entries.insert(namespace.to_string(), value);
        self.store(&entries)
    }

    fn remove(&self, namespace: &str) -> Result<(), CacheError> {
        let _guard = self.lock.lock().map_err(|_| CacheError::Poisoned)?;
        let mut entries = self.load().unwrap_or_default();
        if entries.remove(namespace).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl IdentityStore for MemoryStore {
    fn read(&self, namespace: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(namespace).cloned())
    }

    fn write(&self, namespace: &str, value: String) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(namespace.to_string(), value);
        Ok(())
    }

    fn remove(&self, namespace: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(namespace);
        Ok(())
    }
}

/// Last-bound peripheral, overwritten on every successful connection.
///
/// Entries never expire. A stale entry is only noticed when the radio can no
/// longer resolve it.
#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn IdentityStore>,
}

impl IdentityCache {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    pub fn remember(&self, identity: &PeripheralIdentity) -> Result<(), CacheError> {
        let value = serde_json::to_string(identity)?;
        self.store.write(IDENTITY_NAMESPACE, value)?;
        debug!("Remembered {} ({})", identity.display_name, identity.address);
        Ok(())
    }

    /// The cached identity, if any. Unreadable entries count as a miss.
    pub fn recall(&self) -> Option<PeripheralIdentity> {
        let raw = match self.store.read(IDENTITY_NAMESPACE) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Could not read cached identity: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<PeripheralIdentity>(&raw) {
            Ok(identity) if !identity.address.is_empty() && !identity.display_name.is_empty() => {
                Some(identity)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring corrupt cached identity: {}", e);
                None
            }
        }
    }

    /// Ask the radio whether `identity` still resolves to the same name.
    pub async fn is_still_valid<R: BleRadio>(
        &self,
        radio: &R,
        identity: &PeripheralIdentity,
    ) -> bool {
        match radio.resolve(&identity.address).await {
            Ok(Some(name)) if name == identity.display_name => true,
            Ok(Some(name)) => {
                info!(
                    "Cached device {} now reports name {:?}, ignoring cache",
                    identity.address, name
                );
                false
            }
            Ok(None) => {
                info!("Cached device {} is no longer known", identity.address);
                false
            }
            Err(e) => {
                warn!("Could not re-resolve cached device: {}", e);
                false
            }
        }
    }

    pub fn forget(&self) -> Result<(), CacheError> {
        self.store.remove(IDENTITY_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::FakeRadio;
    use uuid::Uuid;

    fn lock() -> PeripheralIdentity {
        PeripheralIdentity::new("24:0A:C4:00:00:01", "ESP32Lock")
    }

    #[test]
    fn test_recall_empty() {
        assert_eq!(IdentityCache::in_memory().recall(), None);
    }

    #[test]
    fn test_remember_overwrites() {
        let cache = IdentityCache::in_memory();
        cache.remember(&lock()).unwrap();
        let newer = PeripheralIdentity::new("24:0A:C4:00:00:02", "ESP32Lock");
        cache.remember(&newer).unwrap();
        assert_eq!(cache.recall(), Some(newer));
    }

    #[test]
    fn test_forget() {
        let cache = IdentityCache::in_memory();
        cache.remember(&lock()).unwrap();
        cache.forget().unwrap();
        assert_eq!(cache.recall(), None);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::default());
        store.write(IDENTITY_NAMESPACE, "{not json".to_string()).unwrap();
        assert_eq!(IdentityCache::new(store).recall(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        IdentityCache::new(Arc::new(JsonFileStore::new(path.clone())))
            .remember(&lock())
            .unwrap();

        let reopened = IdentityCache::new(Arc::new(JsonFileStore::new(path)));
        assert_eq!(reopened.recall(), Some(lock()));
    }

    #[test]
    fn test_file_store_recovers_from_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "garbage").unwrap();

        let cache = IdentityCache::new(Arc::new(JsonFileStore::new(path)));
        assert_eq!(cache.recall(), None);
        cache.remember(&lock()).unwrap();
        assert_eq!(cache.recall(), Some(lock()));
    }

    #[tokio::test]
    async fn test_validity_requires_matching_name() {
        let cache = IdentityCache::in_memory();
        let radio = FakeRadio::new(Uuid::from_u128(1), Uuid::from_u128(2))
            .knows("24:0A:C4:00:00:01", "ESP32Lock")
            .knows("24:0A:C4:00:00:02", "SomethingElse");

        assert!(cache.is_still_valid(&radio, &lock()).await);
        assert!(
            !cache
                .is_still_valid(
                    &radio,
                    &PeripheralIdentity::new("24:0A:C4:00:00:02", "ESP32Lock")
                )
                .await
        );
        assert!(
            !cache
                .is_still_valid(
                    &radio,
                    &PeripheralIdentity::new("24:0A:C4:00:00:03", "ESP32Lock")
                )
                .await
        );
        assert_eq!(radio.calls(|c| c.scans_started), 0);
    }
}
