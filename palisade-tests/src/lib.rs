//! Shared test utilities for Palisade crates
//!
//! This crate provides:
//! - **Fixtures**: regions, job specs, environments and fast failover settings
//! - **Builders**: a [`Harness`] wiring every runtime service around in-memory
//!   storage and the fakes below, with a separate [`Drill`] rig for failover
//!   drills
//! - **Mocks**: in-process fakes for every collaborator contract, with
//!   failure injection and call recording
//! - **Assertions**: helpers for failover paths and notifications
//!
//! # Example
//!
//! ```ignore
//! use palisade_tests::{fixtures, Harness};
//!
//! #[tokio::test]
//! async fn test_failover_completes() {
//!     let harness = Harness::new();
//!     harness.establish_default_topology().await;
//!
//!     let event = harness
//!         .failover
//!         .trigger(fixtures::manual_failover())
//!         .await
//!         .unwrap();
//!     assert!(event.completed);
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use builders::{Drill, Harness, HarnessBuilder};
pub use mocks::{
    FakeBackupSource, FakeEnvironment, FakeFeed, FakeMetrics, FakeRegionControl, FakeRouter,
    RecordingNotifier, SwitchableObjectStore, SwitchableStore,
};
