//! Catalog reconciliation and the install/update transaction engine.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use semver::Version;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    decoder::ArtifactDecoder,
    error::PluginError,
    manifest::{write_atomic, ManifestStore},
    remote::{require_healthy, RemoteClient},
    types::{InstalledPlugin, Plugin, PluginVersion, UpdateablePlugin},
};

/// Manifest snapshot filename under the plugin root.
pub const MANIFEST_FILE: &str = "manifest.json";

const BACKUP_SUFFIX: &str = ".bak";
const DEFAULT_ARTIFACT_EXT: &str = "tar.gz";

/// Default plugin root (`~/.molt/plugins`).
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".molt")
        .join("plugins")
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding one subdirectory per installed plugin.
    pub root: PathBuf,
    /// Extension of packaged artifacts; the archive format itself is an
    /// external packaging concern.
    pub artifact_ext: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            artifact_ext: DEFAULT_ARTIFACT_EXT.into(),
        }
    }
}

/// Central manager for downloadable plugins.
///
/// Owns catalog fetching, installed-state scanning, update resolution, and
/// the atomic install/update transaction. The remote client, manifest store,
/// and artifact decoder are injected capabilities.
pub struct PluginRegistry {
    remote: Arc<dyn RemoteClient>,
    manifest: Arc<dyn ManifestStore>,
    decoder: Arc<dyn ArtifactDecoder>,
    config: RegistryConfig,
    /// Serializes mutating operations per plugin id. Concurrent updates to
    /// the same plugin would otherwise interleave backup/restore steps.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginRegistry {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        manifest: Arc<dyn ManifestStore>,
        decoder: Arc<dyn ArtifactDecoder>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            remote,
            manifest,
            decoder,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.config.root.join(plugin_id)
    }

    /// Canonical artifact path for `(plugin_id, hash)`.
    pub fn artifact_path(&self, plugin_id: &str, hash: &str) -> PathBuf {
        self.plugin_dir(plugin_id)
            .join(format!("{hash}.{}", self.config.artifact_ext))
    }

    fn plugin_lock(&self, plugin_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(plugin_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    async fn ensure_root(&self) -> Result<(), PluginError> {
        fs::create_dir_all(&self.config.root)
            .await
            .map_err(|err| PluginError::persistence(&self.config.root, err))
    }

    /// Fetch the live catalog, normalize it, persist the manifest snapshot,
    /// and return the normalized list.
    pub async fn fetch_catalog(&self) -> Result<Vec<Plugin>, PluginError> {
        require_healthy(self.remote.as_ref()).await?;
        let raw = self.remote.fetch_plugins().await?;
        let catalog = normalize_catalog(raw);
        // A failed snapshot write must not cost the caller the fetch result.
        if let Err(err) = self.manifest.store(&catalog).await {
            warn!("failed to persist manifest snapshot: {err}");
        }
        debug!(plugins = catalog.len(), "fetched catalog");
        Ok(catalog)
    }

    /// Reconstruct installed state from manifest candidates plus file
    /// presence. Disk is the only authority on "is this installed"; the
    /// manifest merely names the candidate paths to probe.
    pub async fn scan_installed(&self) -> Result<Vec<InstalledPlugin>, PluginError> {
        self.ensure_root().await?;
        let manifest = match self.manifest.load().await {
            Ok(Some(catalog)) => catalog,
            // A fresh install has no manifest yet.
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("manifest unreadable, treating as empty: {err}");
                Vec::new()
            }
        };

        let mut installed = Vec::new();
        for plugin in manifest {
            let dir = self.plugin_dir(&plugin.id);
            let dir_exists = fs::metadata(&dir)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if !dir_exists {
                continue;
            }

            // Versions are sorted ascending; the last one with an artifact
            // on disk is the installed version.
            let mut found: Option<&PluginVersion> = None;
            for version in &plugin.versions {
                let path = self.artifact_path(&plugin.id, &version.hash);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    found = Some(version);
                }
            }

            if let Some(version) = found {
                let artifact_path = self.artifact_path(&plugin.id, &version.hash);
                let installed_version = version.clone();
                installed.push(InstalledPlugin {
                    plugin,
                    installed_version,
                    artifact_path,
                });
            }
        }
        Ok(installed)
    }

    /// Diff installed state against a fresh catalog fetch. Produces zero or
    /// one entry per installed plugin, targeting the highest live version
    /// strictly greater than the installed one.
    pub async fn resolve_updates(&self) -> Result<Vec<UpdateablePlugin>, PluginError> {
        let catalog = self.fetch_catalog().await?;
        let installed = self.scan_installed().await?;

        let mut updates = Vec::new();
        for current in installed {
            let Some(live) = catalog.iter().find(|p| p.id == current.plugin.id) else {
                continue;
            };
            let Some(current_version) = current.installed_version.semver() else {
                continue;
            };
            // Walking from the top of the ascending-sorted list, the first
            // strictly greater match is the highest available upgrade.
            let next = live
                .versions
                .iter()
                .rev()
                .find(|v| v.semver().is_some_and(|candidate| candidate > current_version));
            if let Some(next) = next {
                updates.push(UpdateablePlugin::new(
                    InstalledPlugin {
                        plugin: live.clone(),
                        installed_version: current.installed_version,
                        artifact_path: current.artifact_path,
                    },
                    next.clone(),
                )?);
            }
        }
        Ok(updates)
    }

    /// Install the newest version of `plugin`.
    ///
    /// The canonical artifact file appears only after every fallible step
    /// (health gate, key fetch, download, authenticity recovery) has
    /// succeeded; a failure anywhere leaves no partial canonical file.
    pub async fn install(&self, plugin: &Plugin) -> Result<InstalledPlugin, PluginError> {
        let lock = self.plugin_lock(&plugin.id);
        let _guard = lock.lock().await;
        self.install_locked(plugin).await
    }

    async fn install_locked(&self, plugin: &Plugin) -> Result<InstalledPlugin, PluginError> {
        let Some(target) = plugin.newest_version().cloned() else {
            return Err(PluginError::InvalidArgument(format!(
                "plugin '{}' has no versions to install",
                plugin.id
            )));
        };

        require_healthy(self.remote.as_ref()).await?;
        let public_key = self.remote.fetch_public_key().await?;
        self.ensure_root().await?;
        require_healthy(self.remote.as_ref()).await?;

        debug!(plugin = %plugin.id, version = %target.version, "downloading artifact");
        let payload = self
            .remote
            .download_artifact(&plugin.id, &target.hash)
            .await?;
        let content = self.decoder.decode(&public_key, &payload)?;

        let dir = self.plugin_dir(&plugin.id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| PluginError::persistence(&dir, err))?;
        let artifact_path = self.artifact_path(&plugin.id, &target.hash);
        write_atomic(&artifact_path, &content).await?;

        info!(plugin = %plugin.id, version = %target.version, "installed plugin");
        Ok(InstalledPlugin {
            plugin: plugin.clone(),
            installed_version: target,
            artifact_path,
        })
    }

    /// Upgrade an installed plugin to its resolved target version.
    ///
    /// Backup/attempt/restore-or-commit transaction: the update either fully
    /// succeeds (new artifact installed, backup removed) or fully reverts
    /// (pre-update artifact back at its canonical path). If the rollback
    /// itself fails, [`PluginError::RollbackFailed`] carries both errors.
    pub async fn update(&self, updateable: &UpdateablePlugin) -> Result<InstalledPlugin, PluginError> {
        let plugin_id = updateable.plugin().id.clone();
        let lock = self.plugin_lock(&plugin_id);
        let _guard = lock.lock().await;

        let current = updateable.installed();
        let current_path = self.artifact_path(&plugin_id, &current.installed_version.hash);
        let backup = backup_path(&current_path);

        // Move the current artifact aside. If this fails there is nothing
        // to roll back, so abort immediately.
        fs::rename(&current_path, &backup)
            .await
            .map_err(|err| PluginError::persistence(&current_path, err))?;

        match self.install_locked(updateable.plugin()).await {
            Ok(new_installed) => {
                if let Err(err) = fs::remove_file(&backup).await {
                    warn!(
                        plugin = %plugin_id,
                        "failed to remove backup {}: {err}",
                        backup.display()
                    );
                }
                info!(
                    plugin = %plugin_id,
                    from = %current.installed_version.version,
                    to = %updateable.next_version().version,
                    "updated plugin"
                );
                Ok(new_installed)
            }
            Err(install_err) => {
                // Drop any partial new artifact, then restore the backup.
                let next_path =
                    self.artifact_path(&plugin_id, &updateable.next_version().hash);
                if fs::try_exists(&next_path).await.unwrap_or(false) {
                    let _ = fs::remove_file(&next_path).await;
                }
                if let Err(restore) = fs::rename(&backup, &current_path).await {
                    return Err(PluginError::RollbackFailed {
                        plugin_id,
                        source: Box::new(install_err),
                        restore,
                    });
                }
                Err(install_err)
            }
        }
    }

    /// Remove the installed artifact; prunes the plugin directory when it
    /// becomes empty.
    pub async fn uninstall(&self, installed: &InstalledPlugin) -> Result<(), PluginError> {
        let plugin_id = &installed.plugin.id;
        let lock = self.plugin_lock(plugin_id);
        let _guard = lock.lock().await;

        let path = self.artifact_path(plugin_id, &installed.installed_version.hash);
        fs::remove_file(&path)
            .await
            .map_err(|err| PluginError::persistence(&path, err))?;

        let dir = self.plugin_dir(plugin_id);
        if let Ok(mut entries) = fs::read_dir(&dir).await {
            if entries.next_entry().await.ok().flatten().is_none() {
                let _ = fs::remove_dir(&dir).await;
            }
        }
        info!(plugin = %plugin_id, "uninstalled plugin");
        Ok(())
    }
}

/// Normalize a raw catalog: per plugin, keep only validated versions with a
/// parseable semver, sorted ascending by semver precedence (never lexical);
/// drop plugins left without any version.
pub fn normalize_catalog(raw: Vec<Plugin>) -> Vec<Plugin> {
    let mut catalog = Vec::with_capacity(raw.len());
    for mut plugin in raw {
        let mut versions: Vec<(Version, PluginVersion)> = plugin
            .versions
            .drain(..)
            .filter(|v| v.validated)
            .filter_map(|v| v.semver().map(|parsed| (parsed, v)))
            .collect();
        versions.sort_by(|a, b| a.0.cmp(&b.0));
        plugin.versions = versions.into_iter().map(|(_, v)| v).collect();
        if !plugin.versions.is_empty() {
            catalog.push(plugin);
        }
    }
    catalog
}

fn backup_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}
