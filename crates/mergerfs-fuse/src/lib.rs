//! `fuser`-facing binary crate: wires `mergerfs-core`'s dispatcher logic to
//! the kernel FUSE channel.
//!
//! Everything that needs to know about branches, the node table, the
//! path-lock scheduler, or the policy engine lives in `mergerfs-core`; this
//! crate owns the FUSE wire codec itself plus the ambient stack around it
//! (CLI, TOML config, tracing setup, the maintenance thread).

pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod maintenance;

pub use config::MountConfig;
pub use dispatcher::Dispatcher;
