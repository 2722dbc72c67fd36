//! Generic create-with-polling step.

use burst_id::IdempotencyToken;
use burst_saga::{
    BackoffPolicy, Outcome, RecordBatch, Step, StepContext, StepResult, TryBudget,
};
use tracing::{info, warn};

use super::{report_failure, ProvisionEnv, StepSettings};
use crate::gateway::{CallStatus, ErrorClass, GatewayCall, GatewayError, GatewayReply};
use crate::handoff::Handoff;

/// Field holding the discovered resource ID: `State_<Step>_Id`.
pub const ID_FIELD: &str = "Id";

/// A remote resource created by a [`CreateStep`].
pub trait Creatable: Send {
    /// Step name.
    fn name(&self) -> &'static str;

    /// The create call. `Err` means a required earlier hand-off is missing.
    fn create_call(&self, token: &IdempotencyToken, pad: &Handoff) -> Result<GatewayCall, String>;

    /// The resource ID carried by a successful create reply.
    fn created_id(&self, reply: &GatewayReply) -> Option<String>;

    /// The call undoing the creation of `id`.
    fn delete_call(&self, id: &str) -> GatewayCall;

    /// Hand the new ID to later steps.
    fn publish(&self, id: &str, pad: &mut Handoff);
}

/// Creates a remote resource and deletes it on rollback.
///
/// The discovered ID is persisted before the step advances, so after a
/// restart the step either sees the ID and advances immediately, or
/// resubmits the create with the workflow's idempotency token.
pub struct CreateStep<R> {
    resource: R,
    budget: TryBudget,
    backoff: BackoffPolicy,
    token_hint: Option<String>,
}

impl<R: Creatable> CreateStep<R> {
    pub fn new(resource: R, settings: &StepSettings) -> Self {
        Self {
            resource,
            budget: settings.try_budget,
            backoff: settings.retry_backoff.clone(),
            token_hint: None,
        }
    }

    /// Hint used if the token has to be derived lazily.
    pub fn with_token_hint(mut self, hint: Option<String>) -> Self {
        self.token_hint = hint;
        self
    }

    fn on_error(
        &self,
        ctx: &mut StepContext<'_, ProvisionEnv>,
        error: GatewayError,
    ) -> StepResult {
        let name = self.resource.name();
        let message = error.to_string();
        match error.class {
            ErrorClass::Retryable => {
                let exhausted = ctx.record().record_failure(name, &self.budget, &message)?;
                let tries = ctx.record().try_count(name)?;
                if exhausted {
                    report_failure(
                        ctx,
                        name,
                        &format!("gave up after {tries} failed attempts: {message}"),
                    )?;
                    return Ok(Outcome::Abort);
                }
                warn!(
                    workflow_id = %ctx.workflow_id(),
                    step = name,
                    tries,
                    limit = self.budget.limit(),
                    error = %message,
                    "Create failed, will retry"
                );
                ctx.retry_after(self.backoff.delay(tries.saturating_sub(1)));
                Ok(Outcome::Suspend)
            }
            ErrorClass::MustVerify => {
                // Outcome unknown; the same token makes the resubmission safe.
                warn!(
                    workflow_id = %ctx.workflow_id(),
                    step = name,
                    error = %message,
                    "Create outcome unknown, resubmitting with the same token"
                );
                ctx.retry_after(self.backoff.delay(0));
                Ok(Outcome::Suspend)
            }
            ErrorClass::NotFound | ErrorClass::Rejected => {
                report_failure(ctx, name, &message)?;
                Ok(Outcome::Abort)
            }
        }
    }
}

impl<R: Creatable> Step<ProvisionEnv> for CreateStep<R> {
    fn name(&self) -> &str {
        self.resource.name()
    }

    fn invoke(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let name = self.resource.name();
        if ctx.record().step_field(name, ID_FIELD)?.is_some() {
            return Ok(Outcome::Advance);
        }

        let token = ctx
            .record()
            .ensure_idempotency_token(self.token_hint.as_deref())?;
        let pad: Handoff = ctx.scratchpad()?;
        let call = match self.resource.create_call(&token, &pad) {
            Ok(call) => call,
            Err(message) => {
                report_failure(ctx, name, &message)?;
                return Ok(Outcome::Abort);
            }
        };

        let workflow = ctx.workflow_id();
        let status = ctx.env().gateway.call(&workflow, &call);
        let reply = match status {
            CallStatus::NotSubmitted | CallStatus::Pending => return Ok(Outcome::Suspend),
            CallStatus::Ready(Err(error)) => return self.on_error(ctx, error),
            CallStatus::Ready(Ok(reply)) => reply,
        };

        let Some(id) = self.resource.created_id(&reply) else {
            report_failure(ctx, name, &format!("unexpected reply {reply:?}"))?;
            return Ok(Outcome::Abort);
        };

        // Publish first: a crash before the ID is recorded resubmits the
        // create with the same token and gets the same ID back.
        ctx.update_scratchpad(|pad: &mut Handoff| self.resource.publish(&id, pad))?;
        ctx.record()
            .commit(RecordBatch::new().set_step(name, ID_FIELD, &id))?;
        info!(workflow_id = %workflow, step = name, id = %id, "Resource created");
        Ok(Outcome::Advance)
    }

    fn rollback(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let name = self.resource.name();
        let Some(id) = ctx.record().step_field(name, ID_FIELD)? else {
            return Ok(Outcome::Advance);
        };

        let workflow = ctx.workflow_id();
        let call = self.resource.delete_call(&id);
        match ctx.env().gateway.call(&workflow, &call) {
            CallStatus::NotSubmitted | CallStatus::Pending => return Ok(Outcome::Suspend),
            CallStatus::Ready(Ok(_)) => {
                info!(workflow_id = %workflow, step = name, id = %id, "Resource deleted");
            }
            CallStatus::Ready(Err(e)) if e.class == ErrorClass::NotFound => {
                info!(workflow_id = %workflow, step = name, id = %id, "Resource already gone");
            }
            CallStatus::Ready(Err(e)) => {
                warn!(
                    workflow_id = %workflow,
                    step = name,
                    id = %id,
                    error = %e,
                    "Delete failed, will retry"
                );
                ctx.retry_after(self.backoff.delay(0));
                return Ok(Outcome::Suspend);
            }
        }

        ctx.record()
            .commit(RecordBatch::new().delete_step(name, ID_FIELD))?;
        Ok(Outcome::Advance)
    }
}
