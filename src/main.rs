//! Suite runner binary.
//!
//! Builds the provider capabilities from the environment, registers the full
//! scenario catalog, runs it, and exits non-zero iff any scenario failed.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use install_harness::config;
use install_harness::provision::CommandProvisioner;
use install_harness::scenarios;
use install_harness::scope::{CommandDnsRegistrar, DnsRegistrar};
use install_harness::suite::ProviderCapability;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let aws = ProviderCapability::new(
        "aws",
        config::AWS_REQUIRED_ENV,
        Arc::new(CommandProvisioner::new("aws", config::provisioner_bin("aws"))),
    );
    let packet = ProviderCapability::new(
        "packet",
        config::PACKET_REQUIRED_ENV,
        Arc::new(CommandProvisioner::new(
            "packet",
            config::provisioner_bin("packet"),
        )),
    );
    let dns: Arc<dyn DnsRegistrar> = Arc::new(CommandDnsRegistrar::new(config::dns_bin()));

    let suite = scenarios::default_suite(&aws, &packet, dns);
    let report = suite.run().await;
    report.log_summary();
    std::process::exit(report.exit_code());
}
