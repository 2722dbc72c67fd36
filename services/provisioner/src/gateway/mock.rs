//! Scripted in-process gateway for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use burst_id::WorkflowId;

use super::{CallKind, CallStatus, FleetState, FleetStatus, Gateway, GatewayCall, GatewayReply};

#[derive(Default)]
struct Inner {
    scripts: HashMap<CallKind, VecDeque<CallStatus>>,
    defaults: HashMap<CallKind, CallStatus>,
    calls: Vec<(WorkflowId, GatewayCall)>,
    released: Vec<WorkflowId>,
    /// Target capacity of every fleet created by a default reply.
    fleets: HashMap<String, u32>,
}

/// Gateway answering from per-operation scripts.
///
/// Each call pops the next scripted status for its [`CallKind`]. When the
/// script is empty the kind's default is returned, which unless overridden
/// is a successful reply. Default fleets come up fully fulfilled.
#[derive(Default)]
pub struct MockGateway {
    inner: Mutex<Inner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue statuses for the next calls of `kind`.
    pub fn script(&self, kind: CallKind, statuses: impl IntoIterator<Item = CallStatus>) -> &Self {
        self.lock()
            .scripts
            .entry(kind)
            .or_default()
            .extend(statuses);
        self
    }

    /// Replace the status returned for `kind` once its script is empty.
    pub fn set_default(&self, kind: CallKind, status: CallStatus) -> &Self {
        self.lock().defaults.insert(kind, status);
        self
    }

    /// Number of calls of `kind` seen so far.
    pub fn count(&self, kind: CallKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(_, call)| call.kind() == kind)
            .count()
    }

    /// Every call seen, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    /// Kinds of every call seen, in order.
    pub fn kinds(&self) -> Vec<CallKind> {
        self.lock().calls.iter().map(|(_, call)| call.kind()).collect()
    }

    /// Workflows released so far.
    pub fn released(&self) -> Vec<WorkflowId> {
        self.lock().released.clone()
    }
}

fn default_reply(call: &GatewayCall, fleets: &mut HashMap<String, u32>) -> GatewayReply {
    match call {
        GatewayCall::DescribeFunction { function_name } => GatewayReply::Function {
            arn: format!("arn:mock:function:{function_name}"),
            code_sha256: None,
        },
        GatewayCall::PutRule { rule_name, .. } => GatewayReply::RuleCreated {
            rule_arn: format!("arn:mock:rule/{rule_name}"),
        },
        GatewayCall::PutTargets { .. } => GatewayReply::TargetsPut,
        GatewayCall::RequestFleet { token, spec } => {
            let fleet_id = format!("sfr-{}", token.chars().skip(3).take(8).collect::<String>());
            fleets.insert(fleet_id.clone(), spec.target_capacity);
            GatewayReply::FleetRequested { fleet_id }
        }
        GatewayCall::DescribeFleet { fleet_id } => {
            let capacity = fleets.get(fleet_id).copied().unwrap_or(1);
            GatewayReply::Fleet(FleetStatus {
                state: FleetState::Active,
                target_capacity: capacity,
                fulfilled_capacity: capacity,
                instance_ids: (0..capacity).map(|i| format!("i-mock-{i}")).collect(),
                status_message: None,
            })
        }
        GatewayCall::DeleteRule { .. }
        | GatewayCall::RemoveTargets { .. }
        | GatewayCall::CancelFleet { .. } => GatewayReply::Deleted,
    }
}

impl Gateway for MockGateway {
    fn call(&self, workflow: &WorkflowId, call: &GatewayCall) -> CallStatus {
        let mut inner = self.lock();
        inner.calls.push((*workflow, call.clone()));

        let kind = call.kind();
        if let Some(status) = inner.scripts.get_mut(&kind).and_then(VecDeque::pop_front) {
            return status;
        }
        match inner.defaults.get(&kind).cloned() {
            Some(status) => status,
            None => CallStatus::Ready(Ok(default_reply(call, &mut inner.fleets))),
        }
    }

    fn release(&self, workflow: &WorkflowId) {
        self.lock().released.push(*workflow);
    }
}
