//! The remote resources a provisioning workflow creates.

use burst_id::{IdempotencyToken, WorkflowId};
use chrono::{DateTime, Utc};
use serde_json::json;

use super::Creatable;
use crate::gateway::{FleetSpec, GatewayCall, GatewayReply};
use crate::handoff::Handoff;

const LEASE_TARGET_ID: &str = "lease-reaper";

fn lease_rule_name(workflow_id: &WorkflowId) -> String {
    format!("burst-lease-{workflow_id}")
}

/// Schedule rule firing at lease expiry.
pub struct ScheduleRule {
    workflow_id: WorkflowId,
    rule_name: String,
    expiry: DateTime<Utc>,
}

impl ScheduleRule {
    pub fn new(workflow_id: WorkflowId, expiry: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            rule_name: lease_rule_name(&workflow_id),
            expiry,
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }
}

impl Creatable for ScheduleRule {
    fn name(&self) -> &'static str {
        "ScheduleRule"
    }

    fn create_call(&self, token: &IdempotencyToken, _pad: &Handoff) -> Result<GatewayCall, String> {
        Ok(GatewayCall::PutRule {
            rule_name: self.rule_name.clone(),
            schedule: format!("at({})", self.expiry.format("%Y-%m-%dT%H:%M:%S")),
            description: format!("Lease expiry for {}", self.workflow_id),
            token: token.to_string(),
        })
    }

    fn created_id(&self, reply: &GatewayReply) -> Option<String> {
        match reply {
            GatewayReply::RuleCreated { rule_arn } => Some(rule_arn.clone()),
            _ => None,
        }
    }

    fn delete_call(&self, _id: &str) -> GatewayCall {
        GatewayCall::DeleteRule {
            rule_name: self.rule_name.clone(),
        }
    }

    fn publish(&self, id: &str, pad: &mut Handoff) {
        pad.rule_arn = Some(id.to_string());
    }
}

/// Points the lease rule at the lease function.
pub struct RuleTargets {
    workflow_id: WorkflowId,
    rule_name: String,
    expiry: DateTime<Utc>,
}

impl RuleTargets {
    pub fn new(workflow_id: WorkflowId, expiry: DateTime<Utc>) -> Self {
        Self {
            workflow_id,
            rule_name: lease_rule_name(&workflow_id),
            expiry,
        }
    }
}

impl Creatable for RuleTargets {
    fn name(&self) -> &'static str {
        "RuleTargets"
    }

    fn create_call(&self, token: &IdempotencyToken, pad: &Handoff) -> Result<GatewayCall, String> {
        let function_arn = pad
            .function_arn
            .clone()
            .ok_or_else(|| "lease function ARN was not handed off".to_string())?;

        // The lease function finds the fleet by client token.
        Ok(GatewayCall::PutTargets {
            rule_name: self.rule_name.clone(),
            target_id: LEASE_TARGET_ID.to_string(),
            function_arn,
            input: json!({
                "workflow_id": self.workflow_id.to_string(),
                "client_token": token.as_str(),
                "lease_expiry": self.expiry.to_rfc3339(),
            }),
            token: token.to_string(),
        })
    }

    fn created_id(&self, reply: &GatewayReply) -> Option<String> {
        match reply {
            GatewayReply::TargetsPut => Some(LEASE_TARGET_ID.to_string()),
            _ => None,
        }
    }

    fn delete_call(&self, id: &str) -> GatewayCall {
        GatewayCall::RemoveTargets {
            rule_name: self.rule_name.clone(),
            target_id: id.to_string(),
        }
    }

    fn publish(&self, id: &str, pad: &mut Handoff) {
        pad.target_id = Some(id.to_string());
    }
}

/// The capacity request itself.
pub struct FleetRequest {
    spec: FleetSpec,
}

impl FleetRequest {
    pub fn new(spec: FleetSpec) -> Self {
        Self { spec }
    }
}

impl Creatable for FleetRequest {
    fn name(&self) -> &'static str {
        "FleetRequest"
    }

    fn create_call(&self, token: &IdempotencyToken, _pad: &Handoff) -> Result<GatewayCall, String> {
        Ok(GatewayCall::RequestFleet {
            token: token.to_string(),
            spec: self.spec.clone(),
        })
    }

    fn created_id(&self, reply: &GatewayReply) -> Option<String> {
        match reply {
            GatewayReply::FleetRequested { fleet_id } => Some(fleet_id.clone()),
            _ => None,
        }
    }

    fn delete_call(&self, id: &str) -> GatewayCall {
        GatewayCall::CancelFleet {
            fleet_id: id.to_string(),
        }
    }

    fn publish(&self, id: &str, pad: &mut Handoff) {
        pad.fleet_id = Some(id.to_string());
    }
}
