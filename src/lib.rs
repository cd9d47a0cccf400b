//! Pod runtime shim over a Docker-compatible container engine.
//!
//! The orchestrator speaks in pod sandboxes and containers; the engine only
//! knows flat containers. [`service::RuntimeService`] bridges the two: it
//! encodes pod identity into engine names ([`naming`]) and labels
//! ([`labels`]), tracks the log symlinks it creates ([`cleanup`]), and
//! projects engine state back into the pod lifecycle model
//! ([`service::status`]).

pub mod api;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod naming;
pub mod os;
pub mod service;

pub use error::{Result, ShimError};
pub use service::{RuntimeService, RuntimeSettings};
