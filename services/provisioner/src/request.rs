//! Provisioning requests and their synchronous validation.

use std::collections::BTreeMap;

use burst_id::IdError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::FleetSpec;

/// Largest capacity a single request may ask for.
pub const MAX_CAPACITY: u32 = 1_000;

/// Most caller tags accepted on one request.
pub const MAX_TAGS: usize = 40;

/// Tag prefix reserved for tags the provisioner sets itself.
pub const RESERVED_TAG_PREFIX: &str = "burst:";

/// Tag carrying the workflow ID on every fleet.
pub const WORKFLOW_TAG: &str = "burst:workflow-id";

/// How to launch the instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

/// A request for elastic capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Number of instances.
    pub capacity: u32,

    pub launch: LaunchSpec,

    /// When the lease ends and the capacity is reclaimed.
    pub lease_expiry: DateTime<Utc>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Caller-chosen key making resubmissions idempotent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_hint: Option<String>,
}

/// Why a request was refused before any workflow was created.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("capacity must be at least 1")]
    ZeroCapacity,

    #[error("capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge { requested: u32, max: u32 },

    #[error("launch.image_id must not be empty")]
    MissingImage,

    #[error("launch.instance_types must name at least one type")]
    NoInstanceTypes,

    #[error("instance type at index {0} is empty")]
    EmptyInstanceType(usize),

    #[error("lease expiry {expiry} is not in the future")]
    LeaseExpired { expiry: DateTime<Utc> },

    #[error("too many tags: {count} (max {max})")]
    TooManyTags { count: usize, max: usize },

    #[error("invalid tag {key:?}: {reason}")]
    InvalidTag { key: String, reason: &'static str },

    #[error("invalid idempotency hint: {0}")]
    InvalidHint(#[from] IdError),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Stable machine-readable reason.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ZeroCapacity | Self::CapacityTooLarge { .. } => "invalid_capacity",
            Self::MissingImage | Self::NoInstanceTypes | Self::EmptyInstanceType(_) => {
                "invalid_launch_spec"
            }
            Self::LeaseExpired { .. } => "invalid_lease_expiry",
            Self::TooManyTags { .. } | Self::InvalidTag { .. } => "invalid_tags",
            Self::InvalidHint(_) => "invalid_idempotency_hint",
            Self::Malformed(_) => "malformed_request",
        }
    }
}

impl ProvisionRequest {
    /// Decode a request from JSON.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Check the request against `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::ZeroCapacity);
        }
        if self.capacity > MAX_CAPACITY {
            return Err(ValidationError::CapacityTooLarge {
                requested: self.capacity,
                max: MAX_CAPACITY,
            });
        }

        if self.launch.image_id.trim().is_empty() {
            return Err(ValidationError::MissingImage);
        }
        if self.launch.instance_types.is_empty() {
            return Err(ValidationError::NoInstanceTypes);
        }
        if let Some(i) = self
            .launch
            .instance_types
            .iter()
            .position(|t| t.trim().is_empty())
        {
            return Err(ValidationError::EmptyInstanceType(i));
        }

        if self.lease_expiry <= now {
            return Err(ValidationError::LeaseExpired {
                expiry: self.lease_expiry,
            });
        }

        if self.tags.len() > MAX_TAGS {
            return Err(ValidationError::TooManyTags {
                count: self.tags.len(),
                max: MAX_TAGS,
            });
        }
        for (key, value) in &self.tags {
            let reason = if key.is_empty() {
                Some("key is empty")
            } else if key.len() > 128 {
                Some("key is longer than 128 bytes")
            } else if value.len() > 256 {
                Some("value is longer than 256 bytes")
            } else if key.starts_with(RESERVED_TAG_PREFIX) {
                Some("prefix is reserved")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ValidationError::InvalidTag {
                    key: key.clone(),
                    reason,
                });
            }
        }

        if let Some(hint) = &self.idempotency_hint {
            validate_hint(hint)?;
        }

        Ok(())
    }

    /// Fleet parameters for this request.
    pub fn fleet_spec(&self, workflow_tag: &str) -> FleetSpec {
        let mut tags = self.tags.clone();
        tags.insert(WORKFLOW_TAG.to_string(), workflow_tag.to_string());
        FleetSpec {
            target_capacity: self.capacity,
            image_id: self.launch.image_id.clone(),
            instance_types: self.launch.instance_types.clone(),
            user_data: self.launch.user_data.clone(),
            key_name: self.launch.key_name.clone(),
            valid_until: self.lease_expiry,
            tags,
        }
    }
}

fn validate_hint(hint: &str) -> Result<(), IdError> {
    if hint.is_empty() {
        return Err(IdError::Empty);
    }
    // Hints are hashed, but keep them printable and bounded for logs.
    if hint.len() > 256 {
        return Err(IdError::TooLong {
            len: hint.len(),
            max: 256,
        });
    }
    if let Some(c) = hint.chars().find(|c| c.is_control()) {
        return Err(IdError::InvalidCharacter(c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            capacity: 4,
            launch: LaunchSpec {
                image_id: "img-123".to_string(),
                instance_types: vec!["c5.large".to_string()],
                user_data: None,
                key_name: None,
            },
            lease_expiry: Utc::now() + Duration::hours(2),
            tags: BTreeMap::new(),
            idempotency_hint: None,
        }
    }

    #[test]
    fn test_valid_request() {
        assert_eq!(request().validate(Utc::now()), Ok(()));
    }

    #[rstest]
    #[case::zero_capacity(|r: &mut ProvisionRequest| r.capacity = 0, "invalid_capacity")]
    #[case::huge_capacity(|r: &mut ProvisionRequest| r.capacity = MAX_CAPACITY + 1, "invalid_capacity")]
    #[case::no_image(|r: &mut ProvisionRequest| r.launch.image_id = " ".to_string(), "invalid_launch_spec")]
    #[case::no_types(|r: &mut ProvisionRequest| r.launch.instance_types.clear(), "invalid_launch_spec")]
    #[case::past_expiry(|r: &mut ProvisionRequest| r.lease_expiry = Utc::now() - Duration::minutes(1), "invalid_lease_expiry")]
    #[case::reserved_tag(|r: &mut ProvisionRequest| { r.tags.insert("burst:owner".to_string(), "x".to_string()); }, "invalid_tags")]
    #[case::empty_hint(|r: &mut ProvisionRequest| r.idempotency_hint = Some(String::new()), "invalid_idempotency_hint")]
    fn test_invalid_requests(#[case] mutate: fn(&mut ProvisionRequest), #[case] code: &str) {
        let mut r = request();
        mutate(&mut r);
        let err = r.validate(Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), code);
    }

    #[test]
    fn test_fleet_spec_tags_workflow() {
        let mut r = request();
        r.tags.insert("team".to_string(), "render".to_string());
        let spec = r.fleet_spec("wf_01J00000000000000000000000");

        assert_eq!(spec.target_capacity, 4);
        assert_eq!(spec.tags["team"], "render");
        assert_eq!(spec.tags[WORKFLOW_TAG], "wf_01J00000000000000000000000");
        assert_eq!(spec.valid_until, r.lease_expiry);
    }

    #[test]
    fn test_request_json_shape() {
        let json = r#"{
            "capacity": 2,
            "launch": {"image_id": "img-1", "instance_types": ["m5.xlarge"]},
            "lease_expiry": "2030-01-01T00:00:00Z"
        }"#;
        let r = ProvisionRequest::from_json(json).unwrap();
        assert_eq!(r.capacity, 2);
        assert!(r.tags.is_empty());
        assert!(r.idempotency_hint.is_none());
    }

    #[test]
    fn test_malformed_json() {
        let err = ProvisionRequest::from_json(r#"{"capacity": "lots"}"#).unwrap_err();
        assert_eq!(err.reason_code(), "malformed_request");
    }
}
