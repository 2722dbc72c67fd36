//! Asynchronous cloud gateway contract.
//!
//! Steps never await. They call [`Gateway::call`] with the full arguments of
//! a remote operation and get back a [`CallStatus`]:
//!
//! - `NotSubmitted`: the gateway could not take the call now
//! - `Pending`: the call is in flight
//! - `Ready`: the call finished; the result is handed over exactly once
//!
//! Callers re-invoke with identical arguments until the status is `Ready`.
//! When a result becomes available the gateway sends the workflow's ID on its
//! notification channel so the driver can tick that workflow early.

mod async_gateway;
mod http;
mod mock;

use std::collections::BTreeMap;
use std::fmt;

use burst_id::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use async_gateway::{AsyncGateway, CloudApi};
pub use http::{HttpCloudApi, IDEMPOTENCY_KEY_HEADER};
pub use mock::MockGateway;

/// The gateway seam used by steps.
pub trait Gateway: Send + Sync {
    /// Submit or poll a call on behalf of `workflow`.
    fn call(&self, workflow: &WorkflowId, call: &GatewayCall) -> CallStatus;

    /// Drop every pending call and cached result for `workflow`.
    fn release(&self, workflow: &WorkflowId);
}

/// Status of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    NotSubmitted,
    Pending,
    Ready(Result<GatewayReply, GatewayError>),
}

impl CallStatus {
    /// Whether the caller must simply try again later.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::NotSubmitted | Self::Pending)
    }
}

/// Parameters of a capacity (fleet) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSpec {
    pub target_capacity: u32,
    pub image_id: String,
    pub instance_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A remote operation with all of its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayCall {
    DescribeFunction {
        function_name: String,
    },
    PutRule {
        rule_name: String,
        schedule: String,
        description: String,
        token: String,
    },
    DeleteRule {
        rule_name: String,
    },
    PutTargets {
        rule_name: String,
        target_id: String,
        function_arn: String,
        input: serde_json::Value,
        token: String,
    },
    RemoveTargets {
        rule_name: String,
        target_id: String,
    },
    RequestFleet {
        token: String,
        spec: FleetSpec,
    },
    CancelFleet {
        fleet_id: String,
    },
    DescribeFleet {
        fleet_id: String,
    },
}

/// Operation kind, without arguments. Used for scripting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    DescribeFunction,
    PutRule,
    DeleteRule,
    PutTargets,
    RemoveTargets,
    RequestFleet,
    CancelFleet,
    DescribeFleet,
}

impl GatewayCall {
    /// The call's kind.
    pub fn kind(&self) -> CallKind {
        match self {
            Self::DescribeFunction { .. } => CallKind::DescribeFunction,
            Self::PutRule { .. } => CallKind::PutRule,
            Self::DeleteRule { .. } => CallKind::DeleteRule,
            Self::PutTargets { .. } => CallKind::PutTargets,
            Self::RemoveTargets { .. } => CallKind::RemoveTargets,
            Self::RequestFleet { .. } => CallKind::RequestFleet,
            Self::CancelFleet { .. } => CallKind::CancelFleet,
            Self::DescribeFleet { .. } => CallKind::DescribeFleet,
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::DescribeFunction { .. } | Self::DescribeFleet { .. }
        )
    }
}

/// Lifecycle state of a fleet request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetState {
    Submitted,
    Active,
    Modifying,
    Failed,
    Cancelled,
    Expired,
}

/// Result of describing a fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub state: FleetState,
    pub target_capacity: u32,
    pub fulfilled_capacity: u32,
    #[serde(default)]
    pub instance_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Successful result of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    Function {
        arn: String,
        code_sha256: Option<String>,
    },
    RuleCreated {
        rule_arn: String,
    },
    TargetsPut,
    FleetRequested {
        fleet_id: String,
    },
    Fleet(FleetStatus),
    Deleted,
}

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing happened remotely; try again within the step's budget.
    Retryable,
    /// The side effect may have happened; retry with the same token.
    MustVerify,
    /// The target does not exist.
    NotFound,
    /// The request was refused and will be refused again.
    Rejected,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retryable => "retryable",
            Self::MustVerify => "must_verify",
            Self::NotFound => "not_found",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A failed gateway call plus its side-channel error string.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Retryable, "Throttled", message)
    }

    pub fn must_verify(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::MustVerify, "Unknown", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotFound, "NotFound", message)
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Rejected, code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_serialization_is_tagged() {
        let call = GatewayCall::DescribeFleet {
            fleet_id: "sfr-1".to_string(),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["op"], "describe_fleet");
        assert_eq!(json["fleet_id"], "sfr-1");
    }

    #[test]
    fn test_mutating_calls() {
        assert!(!GatewayCall::DescribeFunction {
            function_name: "f".to_string()
        }
        .is_mutating());
        assert!(GatewayCall::CancelFleet {
            fleet_id: "sfr-1".to_string()
        }
        .is_mutating());
    }

    #[test]
    fn test_gateway_error_display() {
        let e = GatewayError::rejected("InvalidParameter", "bad image");
        assert_eq!(e.to_string(), "InvalidParameter: bad image");
    }
}
