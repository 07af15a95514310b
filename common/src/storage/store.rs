use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Object storage rooted at one directory (or in memory).
///
/// The orchestrator keeps two of these: the working store where artifacts are
/// rendered and the publish store they are delivered to.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
}

impl StorageManager {
    /// Working store, rooted at `data_dir`.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        Self::rooted_at(&cfg.storage, &cfg.data_dir).await
    }

    /// Publish store, rooted at `publish_dir`.
    pub async fn publish(cfg: &AppConfig) -> object_store::Result<Self> {
        Self::rooted_at(&cfg.storage, &cfg.publish_dir).await
    }

    async fn rooted_at(kind: &StorageKind, dir: &str) -> object_store::Result<Self> {
        Ok(Self {
            store: create_storage_backend(kind, dir).await?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
        }
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve the full contents of an object, buffered in memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Size in bytes of the object at `location`.
    pub async fn size(&self, location: &str) -> object_store::Result<u64> {
        let path = ObjPath::from(location);
        let meta = self.store.head(&path).await?;
        Ok(meta.size as u64)
    }

    pub async fn delete(&self, location: &str) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        self.store.delete(&path).await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Removes the object if present. Returns whether anything was removed.
    pub async fn delete_if_exists(&self, location: &str) -> object_store::Result<bool> {
        if !self.exists(location).await? {
            return Ok(false);
        }
        self.delete(location).await?;
        Ok(true)
    }
}

async fn create_storage_backend(kind: &StorageKind, dir: &str) -> object_store::Result<DynStore> {
    match kind {
        StorageKind::Local => {
            let base = resolve_base_dir(dir);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok(Arc::new(store))
        }
    }
}

/// Absolute directories are used as is, relative ones resolve against the
/// current working directory.
pub fn resolve_base_dir(dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn local_config(root: &Path) -> AppConfig {
        AppConfig {
            storage: StorageKind::Local,
            data_dir: root.join("work").to_string_lossy().into_owned(),
            publish_dir: root.join("public").to_string_lossy().into_owned(),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_basic_operations() {
        let storage = StorageManager::in_memory();
        let location = "00/megadocs/hello.txt";

        assert!(!storage.exists(location).await.expect("exists"));
        storage
            .put(location, Bytes::from_static(b"hello"))
            .await
            .expect("put");

        assert!(storage.exists(location).await.expect("exists"));
        assert_eq!(storage.get(location).await.expect("get").as_ref(), b"hello");
        assert_eq!(storage.size(location).await.expect("size"), 5);

        storage.delete(location).await.expect("delete");
        assert!(!storage.exists(location).await.expect("exists"));
    }

    #[tokio::test]
    async fn delete_if_exists_tolerates_missing_objects() {
        let storage = StorageManager::in_memory();
        storage
            .put("00/megadocs/a.txt", Bytes::from_static(b"x"))
            .await
            .expect("put");

        assert!(storage.delete_if_exists("00/megadocs/a.txt").await.expect("delete"));
        assert!(!storage.delete_if_exists("00/megadocs/a.txt").await.expect("delete again"));
        assert!(!storage.exists("00/megadocs/a.txt").await.expect("exists"));
    }

    #[tokio::test]
    async fn working_and_publish_stores_are_separate_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = local_config(dir.path());

        let working = StorageManager::new(&cfg).await.expect("working store");
        let publish = StorageManager::publish(&cfg).await.expect("publish store");

        working
            .put("00/megadocs/a.md", Bytes::from_static(b"# a"))
            .await
            .expect("put");

        assert!(dir.path().join("work/00/megadocs/a.md").exists());
        assert!(!dir.path().join("public/00/megadocs/a.md").exists());
        assert!(!publish.exists("00/megadocs/a.md").await.expect("exists"));
        assert_eq!(working.size("00/megadocs/a.md").await.expect("size"), 3);
    }
}
