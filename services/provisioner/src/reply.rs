//! Replies to the caller and where they are delivered.

use std::fmt;

use burst_id::WorkflowId;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::handoff::Handoff;
use crate::request::ValidationError;

/// Final result of a provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    Failure,
    InvalidRequest,
    CommunicationError,
}

impl ResultCode {
    /// Process exit status for this result.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::InvalidRequest => 2,
            Self::CommunicationError => 3,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::CommunicationError => "COMMUNICATION_ERROR",
        };
        f.write_str(s)
    }
}

/// The reply sent back to whoever submitted a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReply {
    /// Absent when the request never became a workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,

    pub result: ResultCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<String>,

    #[serde(default)]
    pub fulfilled_capacity: u32,
}

impl WorkflowReply {
    fn bare(workflow_id: Option<WorkflowId>, result: ResultCode, message: Option<String>) -> Self {
        Self {
            workflow_id,
            result,
            message,
            fleet_id: None,
            instance_ids: Vec::new(),
            fulfilled_capacity: 0,
        }
    }

    /// Capacity is up.
    pub fn success(workflow_id: WorkflowId, pad: &Handoff) -> Self {
        Self {
            fleet_id: pad.fleet_id.clone(),
            instance_ids: pad.instance_ids.clone(),
            fulfilled_capacity: pad.fulfilled_capacity.unwrap_or(0),
            ..Self::bare(Some(workflow_id), ResultCode::Success, None)
        }
    }

    /// The workflow rolled back.
    pub fn failure(workflow_id: WorkflowId, pad: &Handoff) -> Self {
        let message = pad
            .failure_summary()
            .unwrap_or_else(|| "provisioning rolled back".to_string());
        Self::bare(Some(workflow_id), ResultCode::Failure, Some(message))
    }

    /// The workflow could not be created.
    pub fn not_started(workflow_id: Option<WorkflowId>, message: impl Into<String>) -> Self {
        Self::bare(workflow_id, ResultCode::Failure, Some(message.into()))
    }

    /// The request was refused by validation.
    pub fn invalid_request(error: &ValidationError) -> Self {
        Self::bare(
            None,
            ResultCode::InvalidRequest,
            Some(format!("{}: {error}", error.reason_code())),
        )
    }

    /// The provisioner could not be reached.
    pub fn communication_error(message: impl Into<String>) -> Self {
        Self::bare(None, ResultCode::CommunicationError, Some(message.into()))
    }
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Not handed over yet; try again on a later tick.
    Pending,
    Delivered,
}

/// Destination of a workflow's final reply.
pub trait ReplySink: Send {
    fn deliver(&mut self, reply: &WorkflowReply) -> DeliveryStatus;
}

/// Reply to a caller waiting on a oneshot channel.
pub struct OneshotReply {
    tx: Option<oneshot::Sender<WorkflowReply>>,
}

impl OneshotReply {
    pub fn new(tx: oneshot::Sender<WorkflowReply>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink together with the receiver the caller waits on.
    pub fn channel() -> (Self, oneshot::Receiver<WorkflowReply>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }
}

impl ReplySink for OneshotReply {
    fn deliver(&mut self, reply: &WorkflowReply) -> DeliveryStatus {
        if let Some(tx) = self.tx.take() {
            if tx.send(reply.clone()).is_err() {
                warn!(
                    workflow_id = ?reply.workflow_id,
                    result = %reply.result,
                    "Caller went away before the reply was delivered"
                );
            }
        }
        DeliveryStatus::Delivered
    }
}

/// Reply forwarded onto a shared channel.
///
/// Used for workflows recovered after a restart, whose original caller is gone.
pub struct ChannelReply {
    tx: mpsc::UnboundedSender<WorkflowReply>,
}

impl ChannelReply {
    pub fn new(tx: mpsc::UnboundedSender<WorkflowReply>) -> Self {
        Self { tx }
    }
}

impl ReplySink for ChannelReply {
    fn deliver(&mut self, reply: &WorkflowReply) -> DeliveryStatus {
        if self.tx.send(reply.clone()).is_err() {
            LogReply.deliver(reply);
        }
        DeliveryStatus::Delivered
    }
}

/// Reply written to the log only.
pub struct LogReply;

impl ReplySink for LogReply {
    fn deliver(&mut self, reply: &WorkflowReply) -> DeliveryStatus {
        match reply.result {
            ResultCode::Success => info!(
                workflow_id = ?reply.workflow_id,
                fleet_id = ?reply.fleet_id,
                fulfilled_capacity = reply.fulfilled_capacity,
                "Workflow succeeded"
            ),
            _ => warn!(
                workflow_id = ?reply.workflow_id,
                result = %reply.result,
                message = ?reply.message,
                "Workflow did not succeed"
            ),
        }
        DeliveryStatus::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reply_carries_failure_summary() {
        let wf = WorkflowId::new();
        let mut pad = Handoff::default();
        pad.report_failure("WaitForFleet", "fleet failed: capacity-not-available");

        let reply = WorkflowReply::failure(wf, &pad);
        assert_eq!(reply.result, ResultCode::Failure);
        assert_eq!(
            reply.message.as_deref(),
            Some("WaitForFleet: fleet failed: capacity-not-available")
        );
    }

    #[test]
    fn test_oneshot_delivers_once() {
        let (mut sink, mut rx) = OneshotReply::channel();
        let reply = WorkflowReply::communication_error("down");

        assert_eq!(sink.deliver(&reply), DeliveryStatus::Delivered);
        assert_eq!(sink.deliver(&reply), DeliveryStatus::Delivered);
        assert_eq!(rx.try_recv().unwrap(), reply);
    }

    #[test]
    fn test_result_code_wire_format() {
        let json = serde_json::to_string(&ResultCode::InvalidRequest).unwrap();
        assert_eq!(json, "\"INVALID_REQUEST\"");
        assert_eq!(ResultCode::CommunicationError.exit_code(), 3);
    }
}
