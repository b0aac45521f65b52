//! Core library for Molt - plugin package lifecycle for the Molt host.
//!
//! Molt plugins are distributed through a remote catalog server. This crate
//! owns the reconciliation between that catalog and the local disk: fetching
//! and normalizing the catalog, reconstructing installed state from file
//! evidence, resolving available updates, and performing installs and
//! updates with crash-safe rollback.

pub mod plugins;
