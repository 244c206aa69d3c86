//! Integration-test harness for a distributed cluster installer.
//!
//! The harness provisions real machines through an external provisioning
//! command, drives the installer binary against them, verifies the resulting
//! cluster over SSH, and always releases the machines afterwards. Scenarios
//! that need cloud credentials skip cleanly when those credentials are
//! absent, so the same binary is useful on a laptop and in CI.
//!
//! The moving parts:
//!
//! - [`provision`]: node shapes, descriptors, and the provisioner seam.
//! - [`scope`]: infrastructure scopes with guaranteed teardown.
//! - [`suite`]: scenario registration, capability gating, and the runner.
//! - [`subtests`]: deferred sub-checks batched against one expensive cluster.
//! - [`timing`]: the deadline race used by fail-fast scenarios.
//! - [`installer`], [`ssh`], [`plan`]: the external collaborators.
//! - [`scenarios`]: the shipped scenario catalog.

#![warn(missing_docs)]

pub mod config;
pub mod installer;
pub mod plan;
pub mod provision;
pub mod scenarios;
pub mod scope;
pub mod ssh;
pub mod subtests;
pub mod suite;
pub mod timing;
