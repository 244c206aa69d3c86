//! The scenario catalog.
//!
//! [`default_suite`] registers every scenario the harness ships. Scenarios
//! that need real infrastructure are gated on a provider capability and skip
//! cleanly when the provider's credentials are absent; the plan template and
//! fail-fast scenarios run unconditionally.

pub mod cluster_battery;
pub mod disruption;
pub mod install;

use std::sync::Arc;

use crate::provision::OperatingSystem;
use crate::scope::DnsRegistrar;
use crate::suite::{ProviderCapability, Suite};

/// Build the full suite against the given provider capabilities.
pub fn default_suite(
    aws: &ProviderCapability,
    packet: &ProviderCapability,
    dns: Arc<dyn DnsRegistrar>,
) -> Suite {
    let mut suite = Suite::new("installer integration");

    suite.it_on(aws, "installs a cluster with all roles", install::all_roles_install);
    suite.it_on(
        aws,
        "installs with the CNI disabled",
        install::disabled_cni_install,
    );
    suite.it_on(
        aws,
        "installs against a machine with preinstalled docker",
        install::docker_preinstalled_install,
    );

    for os in [
        OperatingSystem::Ubuntu1604,
        OperatingSystem::CentOs7,
        OperatingSystem::RedHat7,
    ] {
        suite.it_on(
            aws,
            &format!("installs with cloud provider integration on {os}"),
            move |p| install::cloud_provider_install(p, os),
        );
        suite.it_on(
            aws,
            &format!("installs, validates, and resets a single {os} node"),
            move |p| install::mini_install_validate_reset(p, os),
        );
        suite.it_on(
            aws,
            &format!("uses a dedicated docker storage device on {os}"),
            move |p| install::block_device_install(p, os),
        );
    }

    for os in [OperatingSystem::Ubuntu1604, OperatingSystem::CentOs7] {
        suite.it_on(
            packet,
            &format!("installs, validates, and resets a single {os} node on bare metal"),
            move |p| install::mini_install_validate_reset(p, os),
        );
    }

    suite.it(
        "generates a plan with the default node counts",
        install::plan_defaults,
    );
    suite.it(
        "fails fast when a node is unreachable",
        disruption::fails_fast_on_unreachable_node,
    );

    let dns_for_failover = Arc::clone(&dns);
    suite.it_on(
        aws,
        "survives the loss of a master behind stable DNS",
        move |p| disruption::ha_master_failover(p, dns_for_failover),
    );

    suite.it_on(
        aws,
        "runs the cluster battery with calico",
        cluster_battery::calico_battery,
    );
    suite.it_on(
        aws,
        "runs the cluster battery with weave",
        cluster_battery::weave_battery,
    );
    suite.it_on(
        aws,
        "runs the cluster battery with coredns",
        cluster_battery::coredns_battery,
    );

    suite
}
