//! tether-lib: stable identity for ephemeral instances
//!
//! A freshly booted instance takes over a fixed public address, a fixed IPv6
//! address and a fixed data volume, whichever instance held them before:
//! - `identity`: metadata + tags -> `DesiredState`
//! - `reconcile`: idempotent address, volume and IPv6 reconciliation
//! - `pool`: mounting the storage pool on the attached volume
//! - `logging`: the log file that moves onto the volume once mounted
//! - `watch`: the spot termination watch loop
//! - `boot`: the full sequence

pub mod boot;
pub mod config;
pub mod exec;
pub mod identity;
pub mod logging;
pub mod metadata;
pub mod pool;
pub mod reconcile;
pub mod resources;
pub mod retry;
pub mod site;
pub mod system;
pub mod util;
pub mod watch;
