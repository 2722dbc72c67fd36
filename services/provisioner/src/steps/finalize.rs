//! Final step: reply to the caller and release gateway state.

use burst_saga::{Outcome, Step, StepContext, StepResult};

use super::ProvisionEnv;
use crate::handoff::Handoff;
use crate::reply::{DeliveryStatus, WorkflowReply};

/// Sends the workflow's reply, then releases its gateway calls.
///
/// The sequence deletes the command record and the scratchpad once this
/// step reports anything other than suspend.
#[derive(Default)]
pub struct ReplyAndClean;

impl ReplyAndClean {
    pub const NAME: &'static str = "ReplyAndClean";

    pub fn new() -> Self {
        Self
    }

    fn finish(ctx: &mut StepContext<'_, ProvisionEnv>, reply: WorkflowReply) -> StepResult {
        let workflow = ctx.workflow_id();
        let env = ctx.env();
        match env.reply.deliver(&reply) {
            DeliveryStatus::Pending => Ok(Outcome::Suspend),
            DeliveryStatus::Delivered => {
                env.gateway.release(&workflow);
                Ok(Outcome::Advance)
            }
        }
    }
}

impl Step<ProvisionEnv> for ReplyAndClean {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn invoke(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let pad: Handoff = ctx.scratchpad()?;
        let reply = WorkflowReply::success(ctx.workflow_id(), &pad);
        Self::finish(ctx, reply)
    }

    fn rollback(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let pad: Handoff = ctx.scratchpad()?;
        let reply = WorkflowReply::failure(ctx.workflow_id(), &pad);
        Self::finish(ctx, reply)
    }
}
