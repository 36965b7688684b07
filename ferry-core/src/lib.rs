//! Core types for the Ferry live-migration harness.
//!
//! Defines the pure domain types: transports, migration URIs, the status
//! values reported by the VM's control protocol, and test records.
//! Nothing in this crate touches processes or sockets.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod id;
pub mod record;
pub mod scenarios;
pub mod status;
pub mod transport;
pub mod uri;

pub use error::CoreError;
pub use id::{InstanceId, RecordId, Role};
pub use record::{MigrationRecord, TestOutcome};
pub use scenarios::{find_scenario, standard_scenarios, Scenario};
pub use status::{MigrationInfo, MigrationStatus, RunState, StatusInfo};
pub use transport::Transport;
pub use uri::{build_uri, MigrationUri, UriParams};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    #[test]
    fn standard_scenarios_cover_every_transport_once() {
        let scenarios = standard_scenarios();
        assert_eq!(scenarios.len(), Transport::ALL.len());
        for transport in Transport::ALL {
            let count = scenarios.iter().filter(|s| s.transport == transport).count();
            assert_eq!(count, 1, "expected exactly one scenario for {transport}");
        }
    }

    #[test]
    fn find_scenario_by_name() {
        let found = find_scenario("migration_with_exec");
        assert_eq!(found.map(|s| s.transport), Some(Transport::Exec));
        assert!(find_scenario("migration_with_carrier_pigeon").is_none());
    }

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(Role::Source.to_string(), "source");
        assert_eq!(Role::Destination.to_string(), "destination");
    }

    #[test]
    fn migration_record_new_sets_correct_fields() {
        let started_at = Utc::now();
        let duration = Duration::from_millis(1500);
        let record = MigrationRecord::new(
            "migration_with_tcp_localhost",
            Transport::Tcp,
            started_at,
            duration,
            TestOutcome::Passed,
        );

        assert_eq!(record.scenario, "migration_with_tcp_localhost");
        assert_eq!(record.transport, Transport::Tcp);
        assert_eq!(record.started_at, started_at);
        assert_eq!(record.duration, duration);
        assert!(record.destination_uri.is_none(), "URIs must default to None");
        assert!(record.source_uri.is_none());
    }

    #[test]
    fn migration_record_serializes_verdict_tag() {
        let record = MigrationRecord::new(
            "migration_with_exec",
            Transport::Exec,
            Utc::now(),
            Duration::ZERO,
            TestOutcome::Skipped { reason: "'nc' command not found".to_owned() },
        );
        let json = serde_json::to_string(&record).unwrap_or_default();
        assert!(json.contains("\"verdict\":\"skipped\""), "missing verdict tag: {json}");
        assert!(json.contains("\"transport\":\"exec\""), "missing transport: {json}");
    }

    #[test]
    fn test_outcome_only_failed_is_failure() {
        assert!(!TestOutcome::Passed.is_failure());
        assert!(!TestOutcome::Skipped { reason: String::new() }.is_failure());
        assert!(TestOutcome::Failed { reason: String::new() }.is_failure());
    }
}
