use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use super::error::PluginError;

/// One published version of a plugin, immutable once fetched.
///
/// Identity is `(plugin id, hash)`; the hash also addresses the packaged
/// artifact on the server and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub version: String,
    pub hash: String,
    pub file_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub validated: bool,
}

impl PluginVersion {
    /// Parsed semantic version, if the version string is well formed.
    pub fn semver(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }
}

/// A catalog plugin with its version history.
///
/// After normalization the versions are sorted ascending by semver
/// precedence and contain only validated entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub author: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<PluginVersion>,
}

impl Plugin {
    /// Newest version, the install target for a normalized plugin.
    pub fn newest_version(&self) -> Option<&PluginVersion> {
        self.versions.last()
    }
}

/// A plugin whose artifact was verified present on disk during a scan.
///
/// Derived state, recomputed on every scan and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub plugin: Plugin,
    pub installed_version: PluginVersion,
    /// Canonical path of the verified artifact, for host-side loading.
    pub artifact_path: PathBuf,
}

/// An installed plugin with a resolved upgrade target from the live catalog.
///
/// Only constructible through [`UpdateablePlugin::new`], which enforces that
/// the target strictly exceeds the installed version and is the plugin's
/// newest version. The update executor therefore never has to probe for
/// missing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateablePlugin {
    installed: InstalledPlugin,
    next_version: PluginVersion,
}

impl UpdateablePlugin {
    pub fn new(
        installed: InstalledPlugin,
        next_version: PluginVersion,
    ) -> Result<Self, PluginError> {
        let current = installed.installed_version.semver().ok_or_else(|| {
            PluginError::InvalidArgument(format!(
                "installed version '{}' is not a valid semver",
                installed.installed_version.version
            ))
        })?;
        let next = next_version.semver().ok_or_else(|| {
            PluginError::InvalidArgument(format!(
                "target version '{}' is not a valid semver",
                next_version.version
            ))
        })?;
        if next <= current {
            return Err(PluginError::InvalidArgument(format!(
                "target version {} does not exceed installed version {}",
                next_version.version, installed.installed_version.version
            )));
        }
        match installed.plugin.newest_version() {
            Some(newest) if newest.hash == next_version.hash => {}
            _ => {
                return Err(PluginError::InvalidArgument(format!(
                    "target version {} is not the newest version of '{}'",
                    next_version.version, installed.plugin.id
                )));
            }
        }
        Ok(Self {
            installed,
            next_version,
        })
    }

    pub fn plugin(&self) -> &Plugin {
        &self.installed.plugin
    }

    pub fn installed(&self) -> &InstalledPlugin {
        &self.installed
    }

    pub fn next_version(&self) -> &PluginVersion {
        &self.next_version
    }
}
