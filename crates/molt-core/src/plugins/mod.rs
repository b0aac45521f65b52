//! Downloadable plugin lifecycle management.
//!
//! This module manages the plugin catalog fetched from the Molt server, the
//! locally persisted manifest snapshot, installed-state reconstruction from
//! filesystem evidence, and the atomic install/update transaction under the
//! plugin root (default `~/.molt/plugins`).

mod decoder;
mod error;
mod manifest;
mod registry;
mod remote;
mod types;

pub use decoder::{ArtifactDecoder, SignedArtifactDecoder};
pub use error::PluginError;
pub use manifest::{FsManifestStore, ManifestStore, MemoryManifestStore};
pub use registry::{
    default_root, normalize_catalog, PluginRegistry, RegistryConfig, MANIFEST_FILE,
};
pub use remote::{
    check_health, require_healthy, Health, HttpRemoteClient, PublicKeyBody, RemoteClient,
};
pub use types::{InstalledPlugin, Plugin, PluginVersion, UpdateablePlugin};
