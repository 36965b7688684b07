//! Test-case orchestration: one scenario, start to finish.
//!
//! Capabilities are probed before anything is launched, so a skip never
//! leaves processes behind. Once an instance exists it is terminated on
//! every exit path.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;

use ferry_core::{InstanceId, MigrationRecord, MigrationUri, Scenario, TestOutcome};

use crate::assertion::verify_migration;
use crate::driver::{migrate, requirements_for, MigrationDriver, MigrationPlan, ReadyDestination};
use crate::probe;
use crate::{ExecutorError, HarnessConfig, VmInstance, VmmBackend};

/// Runs migration scenarios against a [`VmmBackend`].
///
/// Keeps a registry of instances it launched and has not yet terminated.
pub struct MigrationTest<B: VmmBackend> {
    backend: B,
    config: HarnessConfig,
    live: Mutex<HashSet<InstanceId>>,
}

impl<B: VmmBackend> MigrationTest<B> {
    /// Create a test runner. `config` supplies the polling bound and the
    /// directory for transport scratch files.
    #[must_use]
    pub fn new(backend: B, config: HarnessConfig) -> Self {
        Self { backend, config, live: Mutex::new(HashSet::new()) }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of instances launched and not yet terminated.
    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Run one scenario and record its outcome.
    ///
    /// Never returns an error: missing capabilities become
    /// [`TestOutcome::Skipped`], everything else that goes wrong becomes
    /// [`TestOutcome::Failed`]. The migration is attempted exactly once.
    pub async fn run(&self, scenario: &Scenario) -> MigrationRecord {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(scenario = %scenario.name, transport = %scenario.transport, "test case started");

        let mut uris = None;
        let outcome = match self.execute(scenario, &mut uris).await {
            Ok(()) => TestOutcome::Passed,
            Err(e) if e.is_skip() => TestOutcome::Skipped { reason: e.to_string() },
            Err(e) => TestOutcome::Failed { reason: e.to_string() },
        };
        let duration = clock.elapsed();

        match &outcome {
            TestOutcome::Failed { .. } => {
                tracing::warn!(scenario = %scenario.name, %outcome, ?duration, "test case finished");
            }
            _ => tracing::info!(scenario = %scenario.name, %outcome, ?duration, "test case finished"),
        }

        let record =
            MigrationRecord::new(scenario.name.clone(), scenario.transport, started_at, duration, outcome);
        match uris {
            Some((destination, source)) => record.with_uris(destination, source),
            None => record,
        }
    }

    /// Run every scenario in order.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<MigrationRecord> {
        let mut records = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            records.push(self.run(scenario).await);
        }
        records
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        uris: &mut Option<(MigrationUri, MigrationUri)>,
    ) -> Result<(), ExecutorError> {
        let mut requirements = self.backend.requirements();
        requirements.extend(requirements_for(scenario.transport));
        probe::require(&requirements).await?;

        let mut plan = MigrationPlan::for_transport(scenario.transport, &self.config).await?;
        *uris = Some((plan.destination_uri().clone(), plan.source_uri().clone()));

        let driver = MigrationDriver::new(&self.backend);
        let mut destination = driver.launch_destination(&mut plan).await?;
        self.track(destination.instance().id()).await;

        let result = self.with_source(&driver, &mut destination, &mut plan).await;
        self.shutdown(destination.into_inner()).await;
        result
    }

    async fn with_source(
        &self,
        driver: &MigrationDriver<'_, B>,
        destination: &mut ReadyDestination<B::Instance>,
        plan: &mut MigrationPlan,
    ) -> Result<(), ExecutorError> {
        let mut source = driver.launch_source().await?;
        self.track(source.id()).await;

        let result = self.migrate_and_verify(&mut source, destination, plan).await;
        self.shutdown(source).await;
        result
    }

    async fn migrate_and_verify(
        &self,
        source: &mut B::Instance,
        destination: &mut ReadyDestination<B::Instance>,
        plan: &mut MigrationPlan,
    ) -> Result<(), ExecutorError> {
        migrate(source, destination, plan).await?;
        verify_migration(
            source,
            destination.instance_mut(),
            self.config.migration_timeout,
            self.config.poll_interval,
        )
        .await
    }

    async fn track(&self, id: InstanceId) {
        self.live.lock().await.insert(id);
    }

    /// Terminate an instance, logging rather than propagating failures so
    /// the test's own result is preserved.
    async fn shutdown(&self, instance: B::Instance) {
        let id = instance.id();
        let role = instance.role();
        if let Err(e) = self.backend.terminate(instance).await {
            tracing::warn!(instance_id = %id, %role, error = %e, "cleanup failed");
        }
        self.live.lock().await.remove(&id);
    }
}
