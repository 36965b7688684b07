//! Entry point for the `ferry-runner` binary.
//!
//! Records go to stdout as JSON lines; logs go to stderr.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferry_core::standard_scenarios;
use ferry_executor::{MigrationTest, QemuBackend, VmmBackend};
use ferry_runner::{write_json_lines, Cli, Summary};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list {
        for scenario in standard_scenarios() {
            println!("{}\t{}\t{}", scenario.name, scenario.transport, scenario.description);
        }
        return ExitCode::SUCCESS;
    }

    let scenarios = match cli.selected_scenarios() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid scenario selection");
            return ExitCode::from(2);
        }
    };

    let config = cli.harness_config();
    let backend = QemuBackend::new(config.clone());
    if let Err(e) = backend.health_check().await {
        tracing::warn!(error = %e, "backend not ready; scenarios will be skipped");
    }

    info!(binary = %config.binary.display(), scenarios = scenarios.len(), "running migration matrix");
    let test = MigrationTest::new(backend, config);
    let records = test.run_all(&scenarios).await;

    if let Err(e) = write_json_lines(std::io::stdout().lock(), &records) {
        tracing::error!(error = %e, "failed to write report");
        return ExitCode::FAILURE;
    }

    let summary = Summary::from_records(&records);
    info!(%summary, "migration matrix finished");

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
