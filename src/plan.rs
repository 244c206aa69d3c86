//! Structural plan artifact.
//!
//! The installer reads and writes a declarative YAML plan describing the
//! cluster. The harness only consumes the per-role expected counts to assert
//! against a requested shape; it does not validate or generate the plan.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::provision::NodeCount;

/// Errors from plan artifact handling.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan file could not be read.
    #[error("could not read plan file: {0}")]
    Io(#[from] std::io::Error),

    /// The plan file could not be parsed.
    #[error("could not parse plan file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A role's expected count did not match the requested shape.
    #[error("plan expects {expected} {role} nodes, requested shape has {requested}")]
    CountMismatch {
        /// Role whose count differs.
        role: &'static str,
        /// Count in the plan.
        expected: u32,
        /// Count in the requested shape.
        requested: u32,
    },
}

/// One role group in the plan. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeGroup {
    /// Number of nodes the plan expects for this role.
    pub expected_count: u32,
}

/// The slice of the plan the harness cares about: per-role expected counts.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterPlan {
    /// etcd group.
    pub etcd: NodeGroup,
    /// master group.
    pub master: NodeGroup,
    /// worker group.
    pub worker: NodeGroup,
    /// ingress group.
    pub ingress: NodeGroup,
    /// storage group.
    pub storage: NodeGroup,
}

impl ClusterPlan {
    /// Load a plan file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// The plan's expected counts as a shape.
    pub fn expected_counts(&self) -> NodeCount {
        NodeCount {
            etcd: self.etcd.expected_count,
            master: self.master.expected_count,
            worker: self.worker.expected_count,
            ingress: self.ingress.expected_count,
            storage: self.storage.expected_count,
        }
    }

    /// Assert the plan's expected counts match the requested shape.
    pub fn verify_expected_counts(&self, shape: &NodeCount) -> Result<(), PlanError> {
        let checks: [(&'static str, u32, u32); 5] = [
            ("etcd", self.etcd.expected_count, shape.etcd),
            ("master", self.master.expected_count, shape.master),
            ("worker", self.worker.expected_count, shape.worker),
            ("ingress", self.ingress.expected_count, shape.ingress),
            ("storage", self.storage.expected_count, shape.storage),
        ];
        for (role, expected, requested) in checks {
            if expected != requested {
                return Err(PlanError::CountMismatch {
                    role,
                    expected,
                    requested,
                });
            }
        }
        Ok(())
    }
}
