//! Palisade worker library
//!
//! Configuration, tracing setup, control-plane adapters and the HTTP surface
//! of the Palisade disaster-recovery daemon.

pub mod config;
pub mod control_plane;
pub mod handler;
pub mod services;
pub mod tracing_config;
