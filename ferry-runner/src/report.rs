//! Result reporting: one JSON object per test case, plus a tally.

use std::fmt;
use std::io::Write;

use serde::Serialize;

use ferry_core::{MigrationRecord, TestOutcome};

use crate::RunnerError;

/// Counts of each verdict across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    #[must_use]
    pub fn from_records(records: &[MigrationRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(&record.outcome);
        }
        summary
    }

    pub fn add(&mut self, outcome: &TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Skipped { .. } => self.skipped += 1,
            _ => self.failed += 1,
        }
    }

    /// Skips do not count against success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} passed, {} skipped, {} failed", self.passed, self.skipped, self.failed)
    }
}

/// Write each record as one line of JSON.
///
/// # Errors
/// Returns [`RunnerError::Json`] or [`RunnerError::Io`] if writing fails.
pub fn write_json_lines<W: Write>(mut out: W, records: &[MigrationRecord]) -> Result<(), RunnerError> {
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use ferry_core::Transport;

    use super::*;

    fn record(name: &str, outcome: TestOutcome) -> MigrationRecord {
        MigrationRecord::new(name, Transport::Tcp, Utc::now(), Duration::from_millis(1500), outcome)
    }

    #[test]
    fn summary_counts_each_verdict() {
        let records = [
            record("a", TestOutcome::Passed),
            record("b", TestOutcome::Skipped { reason: "nc not found".to_owned() }),
            record("c", TestOutcome::Failed { reason: "timed out".to_owned() }),
            record("d", TestOutcome::Passed),
        ];
        let summary = Summary::from_records(&records);
        assert_eq!(summary, Summary { passed: 2, skipped: 1, failed: 1 });
        assert!(!summary.is_success());
        assert_eq!(summary.to_string(), "2 passed, 1 skipped, 1 failed");
    }

    #[test]
    fn skips_alone_are_success() {
        let records = [record("rdma", TestOutcome::Skipped { reason: "no RDMA".to_owned() })];
        assert!(Summary::from_records(&records).is_success());
    }

    #[test]
    fn json_lines_one_object_per_record() {
        let records = [
            record("migration_with_tcp_localhost", TestOutcome::Passed),
            record("migration_with_exec", TestOutcome::Skipped { reason: "nc".to_owned() }),
        ];
        let mut out = Vec::new();
        assert!(write_json_lines(&mut out, &records).is_ok());

        let text = String::from_utf8(out).unwrap_or_default();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap_or(serde_json::Value::Null))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["scenario"], "migration_with_tcp_localhost");
        assert_eq!(lines[0]["outcome"]["verdict"], "passed");
        assert_eq!(lines[1]["outcome"]["verdict"], "skipped");
        assert_eq!(lines[1]["transport"], "tcp");
    }
}
