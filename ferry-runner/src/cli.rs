//! Command-line interface.
//!
//! Every harness setting can also come from a `FERRY_*` environment
//! variable; flags win over the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ferry_core::{find_scenario, standard_scenarios, Scenario};
use ferry_executor::HarnessConfig;

use crate::RunnerError;

/// Live-migration acceptance tests for a QEMU binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "ferry-runner", version)]
pub struct Cli {
    /// VM binary (default: qemu-system-<host arch> on PATH)
    #[arg(long, env = "FERRY_QEMU_BINARY")]
    pub binary: Option<PathBuf>,

    /// Value for -machine
    #[arg(long, env = "FERRY_MACHINE")]
    pub machine: Option<String>,

    /// Value for -accel, e.g. kvm or tcg
    #[arg(long, env = "FERRY_ACCEL")]
    pub accel: Option<String>,

    /// Extra argument for every instance (repeatable)
    #[arg(long = "extra-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// Keep QEMU's default devices (omit -nodefaults)
    #[arg(long)]
    pub with_defaults: bool,

    /// Directory for per-instance runtime files
    #[arg(long, env = "FERRY_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Bound on waiting for a migration to finish, in milliseconds
    #[arg(long, env = "FERRY_MIGRATION_TIMEOUT_MS", default_value_t = 10_000)]
    pub migration_timeout_ms: u64,

    /// Interval between query-migrate polls, in milliseconds
    #[arg(long, env = "FERRY_POLL_INTERVAL_MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Run only the named scenario (repeatable)
    #[arg(long, value_name = "SCENARIO")]
    pub only: Vec<String>,

    /// List scenarios and exit
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// Build the harness configuration from flags and environment.
    #[must_use]
    pub fn harness_config(&self) -> HarnessConfig {
        let mut config = match &self.binary {
            Some(binary) => HarnessConfig::new(binary.clone()),
            None => HarnessConfig::with_defaults(),
        };
        config.machine.clone_from(&self.machine);
        config.accel.clone_from(&self.accel);
        config.extra_args.clone_from(&self.extra_args);
        config.nodefaults = !self.with_defaults;
        if let Some(dir) = &self.runtime_dir {
            config.runtime_dir.clone_from(dir);
        }
        config.migration_timeout = Duration::from_millis(self.migration_timeout_ms);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config
    }

    /// Scenarios to run, in matrix order unless `--only` picks some.
    ///
    /// # Errors
    /// Returns [`RunnerError::UnknownScenario`] for a name that is not in
    /// the matrix.
    pub fn selected_scenarios(&self) -> Result<Vec<Scenario>, RunnerError> {
        if self.only.is_empty() {
            return Ok(standard_scenarios());
        }
        self.only
            .iter()
            .map(|name| find_scenario(name).ok_or_else(|| RunnerError::UnknownScenario(name.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("ferry-runner").chain(args.iter().copied());
        match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(e) => panic!("parse failed: {e}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "--binary",
            "/opt/qemu/bin/qemu-system-x86_64",
            "--accel",
            "tcg",
            "--extra-arg",
            "-m",
            "--extra-arg",
            "256",
            "--migration-timeout-ms",
            "2500",
            "--with-defaults",
        ]);
        let config = cli.harness_config();
        assert_eq!(config.binary, PathBuf::from("/opt/qemu/bin/qemu-system-x86_64"));
        assert_eq!(config.accel.as_deref(), Some("tcg"));
        assert_eq!(config.extra_args, ["-m", "256"]);
        assert_eq!(config.migration_timeout, Duration::from_millis(2500));
        assert!(!config.nodefaults);
    }

    #[test]
    fn only_selects_named_scenarios_in_given_order() {
        let cli = parse(&["--only", "migration_with_fd", "--only", "migration_with_unix"]);
        let names: Vec<String> = match cli.selected_scenarios() {
            Ok(s) => s.into_iter().map(|s| s.name).collect(),
            Err(e) => panic!("selection failed: {e}"),
        };
        assert_eq!(names, ["migration_with_fd", "migration_with_unix"]);
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        let cli = parse(&["--only", "migration_with_carrier_pigeon"]);
        assert!(matches!(
            cli.selected_scenarios(),
            Err(RunnerError::UnknownScenario(name)) if name == "migration_with_carrier_pigeon"
        ));
    }

    #[test]
    fn no_selection_runs_whole_matrix() {
        let cli = parse(&[]);
        assert!(matches!(cli.selected_scenarios(), Ok(s) if s.len() == standard_scenarios().len()));
    }
}
