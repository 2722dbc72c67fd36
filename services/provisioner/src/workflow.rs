//! Assembling provisioning workflows from requests.

use burst_id::WorkflowId;
use burst_saga::{BoxedStep, DurableStore, RecordBatch, SagaError, Sequence};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::request::{ProvisionRequest, ValidationError};
use crate::steps::{
    CheckFunction, CreateStep, FleetRequest, ProvisionEnv, ReplyAndClean, RuleTargets,
    ScheduleRule, StepSettings, WaitForFleet,
};

/// Command record field holding the serialized request.
pub const REQUEST_FIELD: &str = "Request";

/// Errors from [`start_workflow`].
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to record workflow: {0}")]
    Saga(#[from] SagaError),
}

/// The steps provisioning `request`, in forward order.
pub fn build_steps(
    workflow_id: WorkflowId,
    request: &ProvisionRequest,
    settings: &StepSettings,
) -> Vec<BoxedStep<ProvisionEnv>> {
    let hint = request.idempotency_hint.clone();
    vec![
        Box::new(CheckFunction::new(settings)),
        Box::new(
            CreateStep::new(ScheduleRule::new(workflow_id, request.lease_expiry), settings)
                .with_token_hint(hint.clone()),
        ),
        Box::new(
            CreateStep::new(RuleTargets::new(workflow_id, request.lease_expiry), settings)
                .with_token_hint(hint.clone()),
        ),
        Box::new(
            CreateStep::new(
                FleetRequest::new(request.fleet_spec(&workflow_id.to_string())),
                settings,
            )
            .with_token_hint(hint),
        ),
        Box::new(WaitForFleet::new(request.capacity, settings)),
    ]
}

/// A provisioning sequence for `request`, not yet started or resumed.
pub fn build_sequence(
    workflow_id: WorkflowId,
    request: &ProvisionRequest,
    settings: &StepSettings,
) -> Sequence<ProvisionEnv> {
    Sequence::new(
        workflow_id,
        build_steps(workflow_id, request, settings),
        Box::new(ReplyAndClean::new()),
    )
}

/// Validate `request` and create its workflow.
///
/// Validation happens before anything is written. On success the command
/// record holds the position, the idempotency token and the request itself,
/// which is enough to rebuild the workflow after a restart.
pub fn start_workflow(
    store: &mut dyn DurableStore,
    settings: &StepSettings,
    request: &ProvisionRequest,
    now: DateTime<Utc>,
) -> Result<Sequence<ProvisionEnv>, SubmitError> {
    request.validate(now)?;

    let workflow_id = WorkflowId::new();
    let encoded = serde_json::to_string(request)?;
    let sequence = build_sequence(workflow_id, request, settings).start(
        store,
        request.idempotency_hint.as_deref(),
        RecordBatch::new().set(REQUEST_FIELD, encoded),
    )?;
    Ok(sequence)
}
