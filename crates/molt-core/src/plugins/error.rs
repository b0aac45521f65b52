use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by plugin registry operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The health gate failed; no further remote calls were made.
    #[error("plugin server is unavailable")]
    ServerUnavailable,

    /// Transport failure or non-success HTTP status.
    #[error("remote request failed: {0}")]
    Remote(String),

    /// A downloaded artifact could not be recovered with the server's
    /// public key.
    #[error("artifact authenticity recovery failed: {0}")]
    Integrity(String),

    /// The manifest snapshot or an artifact file could not be written.
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An update failed and restoring the pre-update artifact failed as
    /// well. The plugin's on-disk state is undefined.
    #[error("update of '{plugin_id}' failed and rollback failed too: {restore}")]
    RollbackFailed {
        plugin_id: String,
        #[source]
        source: Box<PluginError>,
        restore: std::io::Error,
    },
}

impl PluginError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
