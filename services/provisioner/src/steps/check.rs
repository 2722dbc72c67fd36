//! Verifies the lease function before anything is created.

use burst_saga::{Outcome, Step, StepContext, StepResult};
use tracing::info;

use super::{report_failure, FunctionIdentity, ProvisionEnv, StepSettings};
use crate::gateway::{CallStatus, GatewayCall, GatewayReply};
use crate::handoff::Handoff;

/// Checks that the lease function exists and matches its pinned identity.
pub struct CheckFunction {
    function: FunctionIdentity,
}

impl CheckFunction {
    pub const NAME: &'static str = "CheckFunction";

    pub fn new(settings: &StepSettings) -> Self {
        Self {
            function: settings.lease_function.clone(),
        }
    }

    fn mismatch(&self, arn: &str, code_sha256: Option<&str>) -> Option<String> {
        if let Some(expected) = &self.function.arn {
            if expected != arn {
                return Some(format!(
                    "function {} has ARN {arn}, expected {expected}",
                    self.function.name
                ));
            }
        }
        if let Some(expected) = &self.function.code_sha256 {
            if code_sha256 != Some(expected.as_str()) {
                return Some(format!(
                    "function {} has code hash {}, expected {expected}",
                    self.function.name,
                    code_sha256.unwrap_or("<none>")
                ));
            }
        }
        None
    }
}

impl Step<ProvisionEnv> for CheckFunction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn invoke(&mut self, ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        let workflow = ctx.workflow_id();
        let call = GatewayCall::DescribeFunction {
            function_name: self.function.name.clone(),
        };

        let (arn, code_sha256) = match ctx.env().gateway.call(&workflow, &call) {
            CallStatus::NotSubmitted | CallStatus::Pending => return Ok(Outcome::Suspend),
            CallStatus::Ready(Ok(GatewayReply::Function { arn, code_sha256 })) => {
                (arn, code_sha256)
            }
            CallStatus::Ready(Ok(other)) => {
                report_failure(ctx, Self::NAME, &format!("unexpected reply {other:?}"))?;
                return Ok(Outcome::Abort);
            }
            CallStatus::Ready(Err(e)) => {
                let message = format!("could not describe function {}: {e}", self.function.name);
                report_failure(ctx, Self::NAME, &message)?;
                return Ok(Outcome::Abort);
            }
        };

        if let Some(message) = self.mismatch(&arn, code_sha256.as_deref()) {
            report_failure(ctx, Self::NAME, &message)?;
            return Ok(Outcome::Abort);
        }

        info!(workflow_id = %workflow, function_arn = %arn, "Lease function verified");
        ctx.update_scratchpad(|pad: &mut Handoff| pad.function_arn = Some(arn))?;
        Ok(Outcome::Advance)
    }

    fn rollback(&mut self, _ctx: &mut StepContext<'_, ProvisionEnv>) -> StepResult {
        Ok(Outcome::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(arn: Option<&str>, sha: Option<&str>) -> CheckFunction {
        CheckFunction::new(&StepSettings {
            lease_function: FunctionIdentity {
                name: "lease-reaper".to_string(),
                arn: arn.map(str::to_string),
                code_sha256: sha.map(str::to_string),
            },
            ..StepSettings::default()
        })
    }

    #[test]
    fn test_unpinned_function_always_matches() {
        assert_eq!(check(None, None).mismatch("arn:any", None), None);
    }

    #[test]
    fn test_pinned_arn_and_hash() {
        let c = check(Some("arn:a"), Some("abc"));
        assert_eq!(c.mismatch("arn:a", Some("abc")), None);
        assert!(c.mismatch("arn:b", Some("abc")).unwrap().contains("expected arn:a"));
        assert!(c.mismatch("arn:a", None).unwrap().contains("<none>"));
    }
}
