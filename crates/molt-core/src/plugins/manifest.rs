//! Persisted manifest snapshot of the last normalized catalog.
//!
//! The manifest is a cache of what the server last said existed, never an
//! authority on what is installed. Installed state is always re-derived
//! from file presence by the scanner.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::{error::PluginError, types::Plugin};

/// Storage capability for the manifest snapshot.
///
/// Injected into the registry so tests and embedded hosts can substitute an
/// in-memory implementation for the real filesystem.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Last persisted catalog, or `None` if nothing was stored yet.
    async fn load(&self) -> Result<Option<Vec<Plugin>>, PluginError>;

    /// Overwrite the snapshot with a freshly normalized catalog.
    async fn store(&self, catalog: &[Plugin]) -> Result<(), PluginError>;
}

/// Manifest persisted as JSON at a well-known path under the plugin root.
pub struct FsManifestStore {
    path: PathBuf,
}

impl FsManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the conventional location under `root`.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(super::registry::MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn load(&self) -> Result<Option<Vec<Plugin>>, PluginError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PluginError::persistence(&self.path, err)),
        };
        let catalog = serde_json::from_slice(&bytes).map_err(|err| {
            PluginError::persistence(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        Ok(Some(catalog))
    }

    async fn store(&self, catalog: &[Plugin]) -> Result<(), PluginError> {
        let json = serde_json::to_vec_pretty(catalog).map_err(|err| {
            PluginError::persistence(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })?;
        write_atomic(&self.path, &json).await
    }
}

/// In-memory store for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryManifestStore {
    inner: Mutex<Option<Vec<Plugin>>>,
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn load(&self) -> Result<Option<Vec<Plugin>>, PluginError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn store(&self, catalog: &[Plugin]) -> Result<(), PluginError> {
        *self.inner.lock().await = Some(catalog.to_vec());
        Ok(())
    }
}

/// Write-then-rename so a crash mid-write never leaves a partial file at
/// the final path.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PluginError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| PluginError::persistence(parent, err))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::write(&tmp, bytes)
        .await
        .map_err(|err| PluginError::persistence(&tmp, err))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|err| PluginError::persistence(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::types::PluginVersion;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_catalog() -> Vec<Plugin> {
        vec![Plugin {
            id: "tide-tables".into(),
            author: "reef".into(),
            name: "Tide Tables".into(),
            versions: vec![PluginVersion {
                version: "0.1.0".into(),
                hash: "abc123".into(),
                file_id: "file-abc123".into(),
                published_at: Utc::now(),
                downloads: 12,
                validated: true,
            }],
        }]
    }

    #[tokio::test]
    async fn fs_store_round_trips_and_overwrites() {
        let tmp = tempdir().expect("tempdir");
        let store = FsManifestStore::in_root(tmp.path());

        assert!(store.load().await.expect("load").is_none());

        let catalog = sample_catalog();
        store.store(&catalog).await.expect("store");
        let loaded = store.load().await.expect("load").expect("some");
        assert_eq!(loaded, catalog);

        // Overwrite, not merge.
        store.store(&[]).await.expect("store empty");
        let loaded = store.load().await.expect("load").expect("some");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let tmp = tempdir().expect("tempdir");
        let store = FsManifestStore::in_root(tmp.path());
        store.store(&sample_catalog()).await.expect("store");

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_manifest_surfaces_persistence_error() {
        let tmp = tempdir().expect("tempdir");
        let store = FsManifestStore::in_root(tmp.path());
        std::fs::write(store.path(), b"{not json").expect("write garbage");

        let err = store.load().await.expect_err("corrupt manifest");
        assert!(matches!(err, PluginError::Persistence { .. }));
    }
}
