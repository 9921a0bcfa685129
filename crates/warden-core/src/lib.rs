#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

//! Enforcement engine and shared substrate for the warden sub-agent governor.
//!
//! This crate holds everything the hot-path hook binaries need that is not
//! process plumbing: the cross-platform lock primitive, atomic JSON state
//! store, append-only audit log, typed configuration, the necessity
//! classifier, the rule cascades for the spawn and read guards, the
//! per-agent metrics reducer, and the offline analytics reducer.
//!
//! The binaries in `warden-hooks` are thin: parse stdin, call into here,
//! translate the result into an exit code.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod heal;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod paths;
pub mod read_guard;
pub mod reducer;
pub mod similarity;
pub mod spawn_guard;
pub mod state;

pub use config::Config;
pub use error::{WardenError, WardenResult};
pub use paths::StatePaths;
