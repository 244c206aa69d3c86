//! Environment-driven configuration for the harness.
//!
//! Paths to the external collaborators (installer binary, provisioning
//! commands) and the deadlines used across scenarios.

use std::path::PathBuf;

use crate::provision::NodeCount;

/// Env var overriding the installer binary path.
pub const INSTALLER_BIN_ENV: &str = "INSTALL_HARNESS_INSTALLER";

/// Env var overriding the DNS registration command.
pub const DNS_BIN_ENV: &str = "INSTALL_HARNESS_DNS";

/// Env vars required for the AWS provisioner capability.
pub const AWS_REQUIRED_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

/// Env vars required for the Packet provisioner capability.
pub const PACKET_REQUIRED_ENV: &[&str] = &["PACKET_API_KEY", "PACKET_PROJECT_ID"];

/// Deadline for an install against unreachable infrastructure to fail.
pub const BAD_INFRA_DEADLINE_SECS: u64 = 600;

/// Deadline for a batch of remote verification commands.
pub const SSH_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Plan file the installer writes into the working directory.
pub const PLAN_FILE: &str = "cluster-plan.yaml";

/// Path to the installer binary (`INSTALL_HARNESS_INSTALLER` or `./installer`).
pub fn installer_bin() -> PathBuf {
    std::env::var_os(INSTALLER_BIN_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./installer"))
}

/// Path to a provider's provisioning command.
///
/// Resolves `INSTALL_HARNESS_PROVISIONER_<PROVIDER>` first, then falls back
/// to `./provision-<provider>` next to the harness.
pub fn provisioner_bin(provider: &str) -> PathBuf {
    let var = format!(
        "INSTALL_HARNESS_PROVISIONER_{}",
        provider.to_ascii_uppercase()
    );
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("./provision-{provider}")))
}

/// Path to the DNS registration command (`INSTALL_HARNESS_DNS` or `./dns`).
pub fn dns_bin() -> PathBuf {
    std::env::var_os(DNS_BIN_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./dns"))
}

/// Expected counts in the installer's default plan template.
pub fn default_plan_shape() -> NodeCount {
    NodeCount {
        etcd: 3,
        master: 2,
        worker: 3,
        ingress: 2,
        storage: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installer_bin_default() {
        // Absent env var falls back to the local binary.
        if std::env::var_os(INSTALLER_BIN_ENV).is_none() {
            assert_eq!(installer_bin(), PathBuf::from("./installer"));
        }
    }

    #[test]
    fn provisioner_bin_default_per_provider() {
        if std::env::var_os("INSTALL_HARNESS_PROVISIONER_AWS").is_none() {
            assert_eq!(provisioner_bin("aws"), PathBuf::from("./provision-aws"));
        }
    }

    #[test]
    fn default_plan_counts() {
        let shape = default_plan_shape();
        assert_eq!(shape.etcd, 3);
        assert_eq!(shape.master, 2);
        assert_eq!(shape.worker, 3);
        assert_eq!(shape.ingress, 2);
        assert_eq!(shape.storage, 0);
    }
}
