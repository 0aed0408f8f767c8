use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ReplicationError, ReplicationResult};
use crate::position::BinlogPosition;

/// Well-known key holding the last acknowledged position in the distributed
/// KV backend.
pub const LAST_POSITION_KEY: &str = "binstream:pos:last";

/// Durable storage for the last acknowledged binlog position.
///
/// The reader `attach`es the store for exclusive use before streaming and
/// `detach`es it on the way out. Absent or unparseable stored data loads as
/// the zero position, which makes the replication client start from the
/// server's current position.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Reserve the store for exclusive use by one reader.
    async fn attach(&self) -> ReplicationResult<()>;

    async fn load(&self) -> ReplicationResult<BinlogPosition>;

    async fn save(&self, position: &BinlogPosition) -> ReplicationResult<()>;

    /// Release the reservation taken by [`attach`](PositionStore::attach).
    async fn detach(&self);
}

/// File-backed position store used outside HA mode.
///
/// Saves go to a sibling `<path>_buffer` file, are fsynced, then atomically
/// renamed over the target so a crash can never leave a torn payload behind.
#[derive(Debug)]
pub struct FilePositionStore {
    path: PathBuf,
    attached: AtomicBool,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilePositionStore {
            path: path.into(),
            attached: AtomicBool::new(false),
        }
    }

    fn buffer_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push("_buffer");
        PathBuf::from(name)
    }
}

#[async_trait]
impl PositionStore for FilePositionStore {
    async fn attach(&self) -> ReplicationResult<()> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReplicationError::StoreAttached);
        }
        Ok(())
    }

    async fn load(&self) -> ReplicationResult<BinlogPosition> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored position, starting fresh");
                return Ok(BinlogPosition::default());
            }
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_slice(&raw) {
            Ok(position) => Ok(position),
            Err(error) => {
                warn!(%error, path = %self.path.display(),
                    "stored position is unparseable, treating as absent");
                Ok(BinlogPosition::default())
            }
        }
    }

    async fn save(&self, position: &BinlogPosition) -> ReplicationResult<()> {
        let buffer = self.buffer_path();
        let payload =
            serde_json::to_vec(position).map_err(|e| ReplicationError::Store(e.to_string()))?;

        let mut file = File::create(&buffer)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&buffer, &self.path)?;
        Ok(())
    }

    async fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// Minimal contract for the distributed KV backend used in HA mode. The
/// concrete client lives outside this crate.
#[async_trait]
pub trait PositionKv: Send + Sync {
    async fn get(&self, key: &str) -> ReplicationResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> ReplicationResult<()>;
}

/// KV-backed position store used in HA mode. Exclusivity is provided by the
/// leader election, so `attach`/`detach` only track local state.
pub struct KvPositionStore<C> {
    kv: C,
}

impl<C> KvPositionStore<C> {
    pub fn new(kv: C) -> Self {
        KvPositionStore { kv }
    }
}

#[async_trait]
impl<C: PositionKv> PositionStore for KvPositionStore<C> {
    async fn attach(&self) -> ReplicationResult<()> {
        Ok(())
    }

    async fn load(&self) -> ReplicationResult<BinlogPosition> {
        let raw = match self.kv.get(LAST_POSITION_KEY).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(BinlogPosition::default()),
        };

        match serde_json::from_slice(&raw) {
            Ok(position) => Ok(position),
            Err(error) => {
                warn!(%error, key = LAST_POSITION_KEY,
                    "stored position is unparseable, treating as absent");
                Ok(BinlogPosition::default())
            }
        }
    }

    async fn save(&self, position: &BinlogPosition) -> ReplicationResult<()> {
        let payload =
            serde_json::to_vec(position).map_err(|e| ReplicationError::Store(e.to_string()))?;
        self.kv.put(LAST_POSITION_KEY, payload).await
    }

    async fn detach(&self) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePositionStore::new(dir.path().join("position.json"));

        store.attach().await.unwrap();
        assert_eq!(store.load().await.unwrap(), BinlogPosition::default());

        let pos = BinlogPosition::new("mysql-bin.000042", 917);
        store.save(&pos).await.unwrap();
        assert_eq!(store.load().await.unwrap(), pos);
        store.detach().await;
    }

    #[tokio::test]
    async fn file_store_attach_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePositionStore::new(dir.path().join("position.json"));

        store.attach().await.unwrap();
        assert!(matches!(
            store.attach().await,
            Err(ReplicationError::StoreAttached)
        ));

        store.detach().await;
        store.attach().await.unwrap();
    }

    #[tokio::test]
    async fn file_store_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("position.json");
        fs::write(&path, b"not json").unwrap();

        let store = FilePositionStore::new(&path);
        assert_eq!(store.load().await.unwrap(), BinlogPosition::default());
    }

    #[tokio::test]
    async fn file_store_leaves_no_buffer_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("position.json");
        let store = FilePositionStore::new(&path);

        store
            .save(&BinlogPosition::new("mysql-bin.000001", 4))
            .await
            .unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("position.json_buffer").exists());
    }

    #[derive(Default)]
    struct MemoryKv {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl PositionKv for MemoryKv {
        async fn get(&self, key: &str) -> ReplicationResult<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> ReplicationResult<()> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn kv_store_round_trips() {
        let store = KvPositionStore::new(MemoryKv::default());

        assert_eq!(store.load().await.unwrap(), BinlogPosition::default());

        let pos = BinlogPosition::new("mysql-bin.000007", 120);
        store.save(&pos).await.unwrap();
        assert_eq!(store.load().await.unwrap(), pos);
    }
}
