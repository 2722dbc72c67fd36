//! Provisioning steps.

mod check;
mod create;
mod finalize;
mod resources;
mod wait;

use std::sync::Arc;

use burst_saga::{BackoffPolicy, SagaError, StepContext, TryBudget};
use tracing::warn;

use crate::gateway::Gateway;
use crate::handoff::Handoff;
use crate::reply::ReplySink;

pub use check::CheckFunction;
pub use create::{Creatable, CreateStep, ID_FIELD};
pub use finalize::ReplyAndClean;
pub use resources::{FleetRequest, RuleTargets, ScheduleRule};
pub use wait::{WaitForFleet, POLLS_FIELD};

/// Host environment shared by every step of one workflow.
pub struct ProvisionEnv {
    pub gateway: Arc<dyn Gateway>,
    pub reply: Box<dyn ReplySink>,
}

impl ProvisionEnv {
    pub fn new(gateway: Arc<dyn Gateway>, reply: Box<dyn ReplySink>) -> Self {
        Self { gateway, reply }
    }
}

/// The lease function every workflow must find before creating anything.
#[derive(Debug, Clone, Default)]
pub struct FunctionIdentity {
    pub name: String,
    /// Expected ARN, when pinned.
    pub arn: Option<String>,
    /// Expected code hash, when pinned.
    pub code_sha256: Option<String>,
}

/// Tunables shared by the provisioning steps.
#[derive(Debug, Clone, Default)]
pub struct StepSettings {
    pub try_budget: TryBudget,
    pub retry_backoff: BackoffPolicy,
    pub poll_backoff: BackoffPolicy,
    pub lease_function: FunctionIdentity,
}

/// Record a failure report in the scratchpad for the final reply.
pub(crate) fn report_failure(
    ctx: &mut StepContext<'_, ProvisionEnv>,
    step: &str,
    message: &str,
) -> Result<(), SagaError> {
    warn!(workflow_id = %ctx.workflow_id(), step, message, "Step failed");
    ctx.update_scratchpad(|pad: &mut Handoff| pad.report_failure(step, message))
}
