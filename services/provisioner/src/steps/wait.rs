//! Waits for the fleet to reach its target capacity.

use burst_saga::{BackoffPolicy, Outcome, RecordBatch, Step, StepContext, StepResult};
use tracing::{debug, info, warn};

use super::{report_failure, ProvisionEnv, StepSettings};
use crate::gateway::{CallStatus, ErrorClass, FleetState, FleetStatus, GatewayCall, GatewayReply};
use crate::handoff::Handoff;

/// What a fleet description says about readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    InProgress,
    Failed(String),
}

/// Field counting polls so far: `State_WaitForFleet_Polls`.
pub const POLLS_FIELD: &str = "Polls";

pub(crate) fn readiness(status: &FleetStatus, requested: u32) -> Readiness {
    let reason = || {
        status
            .status_message
            .clone()
            .unwrap_or_else(|| "no reason given".to_string())
    };
    match status.state {
        FleetState::Active if status.fulfilled_capacity >= requested => {
            Readiness::Ready
        }
        FleetState::Submitted | FleetState::Active | FleetState::Modifying => Readiness::InProgress,
        FleetState::Failed => Readiness::Failed(format!("fleet failed: {}", reason())),
        FleetState::Cancelled => Readiness::Failed(format!("fleet was cancelled: {}", reason())),
        FleetState::Expired => Readiness::Failed(format!("fleet expired: {}", reason())),
    }
}

/// Polls the fleet until it holds the requested capacity or definitively
/// failed.
///
/// The poll count is kept in the command record so the backoff keeps
/// growing across restarts.
pub struct WaitForFleet {
    capacity: u32,
    backoff: BackoffPolicy,
}

impl WaitForFleet {
    pub const NAME: &'static str = "WaitForFleet";

    pub fn new(capacity: u32, settings: &StepSettings) -> Self {
        Self {
            capacity,
            backoff: settings.poll_backoff.clone(),
        }
    }

    /// Count one more poll and hint the next delay.
    fn back_off(&self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let mut record = ctx.record();
        let polls = record
            .parse_step_field::<u32>(Self::NAME, POLLS_FIELD)?
            .unwrap_or(0);
        record.commit(RecordBatch::new().set_step(Self::NAME, POLLS_FIELD, polls + 1))?;
        ctx.retry_after(self.backoff.delay(polls));
        Ok(Outcome::Suspend)
    }
}

impl Step<ProvisionEnv> for WaitForFleet {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn invoke(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let pad: Handoff = ctx.scratchpad()?;
        let Some(fleet_id) = pad.fleet_id else {
            report_failure(ctx, Self::NAME, "no fleet ID was handed off")?;
            return Ok(Outcome::Abort);
        };

        let workflow = ctx.workflow_id();
        let call = GatewayCall::DescribeFleet {
            fleet_id: fleet_id.clone(),
        };
        let status = match ctx.env().gateway.call(&workflow, &call) {
            CallStatus::NotSubmitted | CallStatus::Pending => return Ok(Outcome::Suspend),
            CallStatus::Ready(Ok(GatewayReply::Fleet(status))) => status,
            CallStatus::Ready(Ok(other)) => {
                report_failure(ctx, Self::NAME, &format!("unexpected reply {other:?}"))?;
                return Ok(Outcome::Abort);
            }
            CallStatus::Ready(Err(e)) => {
                return match e.class {
                    ErrorClass::NotFound => {
                        report_failure(ctx, Self::NAME, &format!("fleet {fleet_id} not found"))?;
                        Ok(Outcome::Abort)
                    }
                    ErrorClass::Rejected => {
                        report_failure(ctx, Self::NAME, &e.to_string())?;
                        Ok(Outcome::Abort)
                    }
                    ErrorClass::Retryable | ErrorClass::MustVerify => {
                        warn!(
                            workflow_id = %workflow,
                            fleet_id = %fleet_id,
                            error = %e,
                            "Describe fleet failed, will retry"
                        );
                        self.back_off(ctx)
                    }
                };
            }
        };

        match readiness(&status, self.capacity) {
            Readiness::Ready => {
                info!(
                    workflow_id = %workflow,
                    fleet_id = %fleet_id,
                    fulfilled = status.fulfilled_capacity,
                    "Fleet is ready"
                );
                ctx.update_scratchpad(|pad: &mut Handoff| {
                    pad.fulfilled_capacity = Some(status.fulfilled_capacity);
                    pad.instance_ids = status.instance_ids.clone();
                })?;
                Ok(Outcome::Advance)
            }
            Readiness::InProgress => {
                debug!(
                    workflow_id = %workflow,
                    fleet_id = %fleet_id,
                    state = ?status.state,
                    fulfilled = status.fulfilled_capacity,
                    requested = self.capacity,
                    "Fleet not ready yet"
                );
                self.back_off(ctx)
            }
            Readiness::Failed(message) => {
                report_failure(ctx, Self::NAME, &message)?;
                Ok(Outcome::Abort)
            }
        }
    }

    fn rollback(&mut self, _ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        // Read-only step.
        Ok(Outcome::Advance)
    }
}
