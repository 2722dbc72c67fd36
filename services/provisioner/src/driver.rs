//! The event loop driving provisioning workflows.
//!
//! A single task owns the store and every live [`Sequence`]. It wakes on a
//! timer, on gateway ready notifications and on new submissions, and ticks
//! the affected workflows. Ticks never block, so one task is enough.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use burst_id::WorkflowId;
use burst_saga::{Completion, DurableStore, SagaError, Sequence, Tick};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::gateway::Gateway;
use crate::recovery::recover_workflows;
use crate::reply::{ChannelReply, LogReply, OneshotReply, ReplySink, WorkflowReply};
use crate::request::ProvisionRequest;
use crate::steps::{ProvisionEnv, StepSettings};
use crate::workflow::{start_workflow, SubmitError};

/// Driver loop configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How often suspended workflows are ticked.
    pub tick_interval: Duration,

    /// Upper bound on consecutive ticks of one workflow per wake-up.
    pub max_ticks_per_wake: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_ticks_per_wake: 64,
        }
    }
}

/// A request waiting to become a workflow.
pub struct Submission {
    pub request: ProvisionRequest,
    pub reply: oneshot::Sender<WorkflowReply>,
}

/// Client side of a running [`Driver`].
#[derive(Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<Submission>,
}

impl DriverHandle {
    /// Submit a request and wait for its final reply.
    ///
    /// Invalid requests are answered immediately without creating a workflow.
    pub async fn submit(&self, request: ProvisionRequest) -> WorkflowReply {
        if let Err(e) = request.validate(Utc::now()) {
            return WorkflowReply::invalid_request(&e);
        }

        let (tx, rx) = oneshot::channel();
        let submission = Submission { request, reply: tx };
        if self.tx.send(submission).await.is_err() {
            return WorkflowReply::communication_error("provisioner is not running");
        }
        rx.await.unwrap_or_else(|_| {
            WorkflowReply::communication_error("provisioner stopped before replying")
        })
    }
}

struct Active {
    sequence: Sequence<ProvisionEnv>,
    env: ProvisionEnv,
    not_before: Option<Instant>,
}

/// Store, gateway and live workflows.
struct Engine {
    store: Box<dyn DurableStore>,
    gateway: Arc<dyn Gateway>,
    settings: StepSettings,
    config: DriverConfig,
    workflows: HashMap<WorkflowId, Active>,
    outcomes: Option<mpsc::UnboundedSender<WorkflowReply>>,
}

/// Drives every workflow to completion.
pub struct Driver {
    engine: Engine,
    submissions: mpsc::Receiver<Submission>,
    notifications: mpsc::UnboundedReceiver<WorkflowId>,
}

impl Driver {
    /// Create a driver and the handle used to submit requests to it.
    ///
    /// `notifications` carries the gateway's ready notifications.
    pub fn new(
        store: Box<dyn DurableStore>,
        gateway: Arc<dyn Gateway>,
        notifications: mpsc::UnboundedReceiver<WorkflowId>,
        settings: StepSettings,
        config: DriverConfig,
    ) -> (Self, DriverHandle) {
        let (tx, submissions) = mpsc::channel(64);
        let driver = Self {
            engine: Engine {
                store,
                gateway,
                settings,
                config,
                workflows: HashMap::new(),
                outcomes: None,
            },
            submissions,
            notifications,
        };
        (driver, DriverHandle { tx })
    }

    /// Send the replies of recovered workflows to `tx` instead of the log.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<WorkflowReply>) -> Self {
        self.engine.outcomes = Some(tx);
        self
    }

    /// Load every workflow left in the store by a previous run.
    pub fn recover(&mut self) -> Result<usize, SagaError> {
        self.engine.recover()
    }

    /// Number of workflows not yet finished.
    pub fn active(&self) -> usize {
        self.engine.workflows.len()
    }

    /// Run until shutdown, or until the handle is dropped and no work is left.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Driver {
            mut engine,
            mut submissions,
            mut notifications,
        } = self;

        let mut interval = tokio::time::interval(engine.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;
        let mut notified = true;

        info!(active = engine.workflows.len(), "Driver started");

        loop {
            if !accepting && engine.workflows.is_empty() {
                info!("No submissions or workflows left, driver exiting");
                break;
            }

            tokio::select! {
                _ = interval.tick() => engine.tick_due(),
                received = notifications.recv(), if notified => match received {
                    Some(workflow_id) => engine.drive(workflow_id),
                    None => notified = false,
                },
                received = submissions.recv(), if accepting => match received {
                    Some(submission) => engine.register(submission),
                    None => accepting = false,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(active = engine.workflows.len(), "Driver shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Engine {
    fn recover(&mut self) -> Result<usize, SagaError> {
        let recovered = recover_workflows(&mut *self.store, &self.settings)?;
        let count = recovered.len();
        for sequence in recovered {
            let reply: Box<dyn ReplySink> = match &self.outcomes {
                Some(tx) => Box::new(ChannelReply::new(tx.clone())),
                None => Box::new(LogReply),
            };
            self.insert(sequence, reply);
        }
        Ok(count)
    }

    fn insert(
        &mut self,
        sequence: Sequence<ProvisionEnv>,
        reply: Box<dyn ReplySink>,
    ) -> WorkflowId {
        let workflow_id = sequence.workflow_id();
        let env = ProvisionEnv::new(Arc::clone(&self.gateway), reply);
        self.workflows.insert(
            workflow_id,
            Active {
                sequence,
                env,
                not_before: None,
            },
        );
        workflow_id
    }

    fn register(&mut self, submission: Submission) {
        let Submission { request, reply } = submission;
        match start_workflow(&mut *self.store, &self.settings, &request, Utc::now()) {
            Ok(sequence) => {
                let workflow_id = self.insert(sequence, Box::new(OneshotReply::new(reply)));
                info!(
                    workflow_id = %workflow_id,
                    capacity = request.capacity,
                    "Workflow registered"
                );
                self.drive(workflow_id);
            }
            Err(SubmitError::Invalid(e)) => {
                let _ = reply.send(WorkflowReply::invalid_request(&e));
            }
            Err(e) => {
                error!(error = %e, "Failed to start workflow");
                let _ = reply.send(WorkflowReply::not_started(None, e.to_string()));
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn tick_due(&mut self) {
        let now = Instant::now();
        let due: Vec<WorkflowId> = self
            .workflows
            .iter()
            .filter(|(_, active)| active.not_before.map_or(true, |t| t <= now))
            .map(|(id, _)| *id)
            .collect();
        if !due.is_empty() {
            debug!(due = due.len(), total = self.workflows.len(), "Ticking workflows");
        }
        for workflow_id in due {
            self.drive(workflow_id);
        }
    }

    /// Tick one workflow until it suspends or finishes.
    fn drive(&mut self, workflow_id: WorkflowId) {
        let Some(active) = self.workflows.get_mut(&workflow_id) else {
            return;
        };

        let mut finished = None;
        let mut suspended = false;
        for _ in 0..self.config.max_ticks_per_wake {
            match active.sequence.tick(&mut *self.store, &mut active.env) {
                Tick::Progressed => {}
                Tick::Suspended { retry_after } => {
                    active.not_before = retry_after.map(|d| Instant::now() + d);
                    suspended = true;
                    break;
                }
                Tick::Finished(completion) => {
                    finished = Some(completion);
                    break;
                }
            }
        }

        match finished {
            Some(completion) => {
                self.workflows.remove(&workflow_id);
                match completion {
                    Completion::Succeeded => {
                        info!(workflow_id = %workflow_id, "Workflow succeeded")
                    }
                    Completion::RolledBack => {
                        info!(workflow_id = %workflow_id, "Workflow rolled back")
                    }
                }
            }
            None if !suspended => {
                warn!(workflow_id = %workflow_id, "Workflow still progressing after tick limit");
            }
            None => {}
        }
    }
}
