//! Shared fixtures for provisioner integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use burst_provisioner::gateway::{FleetState, FleetStatus, GatewayReply, MockGateway};
use burst_provisioner::reply::ChannelReply;
use burst_provisioner::steps::{FunctionIdentity, ProvisionEnv, StepSettings};
use burst_provisioner::{LaunchSpec, ProvisionRequest, WorkflowReply};
use burst_saga::{BackoffPolicy, TryBudget};
use chrono::Utc;
use tokio::sync::mpsc;

pub fn request(capacity: u32) -> ProvisionRequest {
    ProvisionRequest {
        capacity,
        launch: LaunchSpec {
            image_id: "img-render-2024".to_string(),
            instance_types: vec!["c5.2xlarge".to_string(), "c5a.2xlarge".to_string()],
            user_data: None,
            key_name: None,
        },
        lease_expiry: Utc::now() + chrono::Duration::hours(3),
        tags: BTreeMap::from([("team".to_string(), "render".to_string())]),
        idempotency_hint: None,
    }
}

/// Settings with near-zero backoff so tests never wait.
pub fn settings() -> StepSettings {
    let fast = BackoffPolicy {
        base: Duration::from_millis(1),
        max: Duration::from_millis(5),
        jitter: 0.0,
    };
    StepSettings {
        try_budget: TryBudget::new(3),
        retry_backoff: fast.clone(),
        poll_backoff: fast,
        lease_function: FunctionIdentity {
            name: "lease-reaper".to_string(),
            arn: None,
            code_sha256: None,
        },
    }
}

pub fn fleet(state: FleetState, target: u32, fulfilled: u32) -> GatewayReply {
    GatewayReply::Fleet(FleetStatus {
        state,
        target_capacity: target,
        fulfilled_capacity: fulfilled,
        instance_ids: (0..fulfilled).map(|i| format!("i-{i:04}")).collect(),
        status_message: match state {
            FleetState::Failed => Some("capacity-not-available".to_string()),
            _ => None,
        },
    })
}

/// Environment whose replies land on a channel.
pub fn env(
    gateway: &Arc<MockGateway>,
    replies: &mpsc::UnboundedSender<WorkflowReply>,
) -> ProvisionEnv {
    ProvisionEnv::new(
        Arc::clone(gateway) as _,
        Box::new(ChannelReply::new(replies.clone())),
    )
}
