//! Scripted stand-ins for the VM backend, used by unit tests.

use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use ferry_core::{InstanceId, MigrationStatus, Role, RunState, StatusInfo};

use crate::fd_channel::DescriptorChannel;
use crate::probe::Capability;
use crate::{ExecutorError, VmInstance, VmmBackend};

/// Something a fake instance or backend observed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Launch { role: Role, args: Vec<String> },
    Command { role: Role, name: String, arguments: Option<Value> },
    DescriptorSent { role: Role, tag: String },
    Terminate { role: Role },
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    pub events: Vec<Event>,
    pub descriptors: Vec<(OwnedFd, String)>,
}

pub(crate) type SharedJournal = Arc<Mutex<Journal>>;

fn lock(journal: &SharedJournal) -> MutexGuard<'_, Journal> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records descriptors instead of passing them to a process.
#[derive(Debug, Clone)]
pub(crate) struct FakeChannel {
    role: Role,
    journal: SharedJournal,
}

#[async_trait]
impl DescriptorChannel for FakeChannel {
    async fn send(&mut self, fd: BorrowedFd<'_>, tag: &str) -> Result<(), ExecutorError> {
        let owned = fd.try_clone_to_owned()?;
        let mut journal = lock(&self.journal);
        journal.events.push(Event::DescriptorSent { role: self.role, tag: tag.to_owned() });
        journal.descriptors.push((owned, tag.to_owned()));
        Ok(())
    }

    async fn receive(&mut self) -> Result<(OwnedFd, String), ExecutorError> {
        Err(ExecutorError::DescriptorTransferUnsupported("fake channel only sends".to_owned()))
    }
}

/// A VM that answers `query-migrate` from a script.
///
/// The last scripted migration status repeats forever.
#[derive(Debug, Clone)]
pub(crate) struct FakeInstance {
    id: InstanceId,
    role: Role,
    migration_statuses: VecDeque<MigrationStatus>,
    error_desc: Option<String>,
    run_state: RunState,
    failing_command: Option<String>,
    channel: Option<FakeChannel>,
    journal: SharedJournal,
}

impl FakeInstance {
    pub fn new(role: Role) -> Self {
        Self {
            id: InstanceId::new(),
            role,
            migration_statuses: VecDeque::new(),
            error_desc: None,
            run_state: RunState::Running,
            failing_command: None,
            channel: None,
            journal: SharedJournal::default(),
        }
    }

    pub fn with_migration_statuses(mut self, statuses: &[MigrationStatus]) -> Self {
        self.migration_statuses = statuses.iter().copied().collect();
        self
    }

    pub fn with_error_desc(mut self, desc: &str) -> Self {
        self.error_desc = Some(desc.to_owned());
        self
    }

    pub fn with_run_state(mut self, state: RunState) -> Self {
        self.run_state = state;
        self
    }

    pub fn failing_command(mut self, name: &str) -> Self {
        self.failing_command = Some(name.to_owned());
        self
    }

    pub fn with_descriptor_channel(mut self) -> Self {
        self.channel = Some(FakeChannel { role: self.role, journal: Arc::clone(&self.journal) });
        self
    }

    fn attach(mut self, journal: &SharedJournal) -> Self {
        self.journal = Arc::clone(journal);
        if let Some(channel) = &mut self.channel {
            channel.journal = Arc::clone(journal);
        }
        self
    }

    pub fn commands_named(&self, name: &str) -> usize {
        lock(&self.journal)
            .events
            .iter()
            .filter(|e| matches!(e, Event::Command { name: n, .. } if n == name))
            .count()
    }

    fn next_migration_status(&mut self) -> MigrationStatus {
        if self.migration_statuses.len() > 1 {
            self.migration_statuses.pop_front().unwrap_or_default()
        } else {
            self.migration_statuses.front().copied().unwrap_or_default()
        }
    }
}

#[async_trait]
impl VmInstance for FakeInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn command(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ExecutorError> {
        lock(&self.journal).events.push(Event::Command {
            role: self.role,
            name: name.to_owned(),
            arguments,
        });

        if self.failing_command.as_deref() == Some(name) {
            return Err(ExecutorError::Qmp {
                command: name.to_owned(),
                class: "GenericError".to_owned(),
                desc: "scripted failure".to_owned(),
            });
        }

        let reply = match name {
            "query-migrate" => match self.next_migration_status() {
                MigrationStatus::None => json!({}),
                MigrationStatus::Failed => match &self.error_desc {
                    Some(desc) => json!({ "status": "failed", "error-desc": desc }),
                    None => json!({ "status": "failed" }),
                },
                status => json!({ "status": status.as_str() }),
            },
            "query-status" => {
                let info = StatusInfo::new(self.run_state, self.run_state == RunState::Running);
                serde_json::to_value(info).unwrap_or_default()
            }
            _ => json!({}),
        };
        Ok(reply)
    }

    fn descriptor_channel(&mut self) -> Option<&mut dyn DescriptorChannel> {
        self.channel.as_mut().map(|c| c as &mut dyn DescriptorChannel)
    }
}

/// Hands out clones of a scripted source and destination.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    pub source: FakeInstance,
    pub destination: FakeInstance,
    pub requirements: Vec<Capability>,
    pub fail_launch: Option<Role>,
    pub journal: SharedJournal,
}

impl FakeBackend {
    /// A pair that migrates successfully after a few polls.
    pub fn healthy() -> Self {
        Self {
            source: FakeInstance::new(Role::Source)
                .with_migration_statuses(&[
                    MigrationStatus::None,
                    MigrationStatus::Setup,
                    MigrationStatus::Active,
                    MigrationStatus::Completed,
                ])
                .with_run_state(RunState::Postmigrate)
                .with_descriptor_channel(),
            destination: FakeInstance::new(Role::Destination)
                .with_migration_statuses(&[MigrationStatus::Completed])
                .with_run_state(RunState::Running),
            requirements: Vec::new(),
            fail_launch: None,
            journal: SharedJournal::default(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.journal).events.clone()
    }

    pub fn descriptor_tags(&self) -> Vec<String> {
        lock(&self.journal).descriptors.iter().map(|(_, tag)| tag.clone()).collect()
    }

    pub fn launches(&self) -> Vec<(Role, Vec<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Launch { role, args } => Some((role, args)),
                _ => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> Vec<Role> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminate { role } => Some(role),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl VmmBackend for FakeBackend {
    type Instance = FakeInstance;

    async fn launch(&self, role: Role, args: &[String]) -> Result<FakeInstance, ExecutorError> {
        if self.fail_launch == Some(role) {
            return Err(ExecutorError::LaunchFailed {
                role,
                reason: "scripted launch failure".to_owned(),
            });
        }
        lock(&self.journal).events.push(Event::Launch { role, args: args.to_vec() });
        let template = match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        };
        Ok(template.clone().attach(&self.journal))
    }

    async fn terminate(&self, instance: FakeInstance) -> Result<(), ExecutorError> {
        lock(&self.journal).events.push(Event::Terminate { role: instance.role });
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn requirements(&self) -> Vec<Capability> {
        self.requirements.clone()
    }
}
