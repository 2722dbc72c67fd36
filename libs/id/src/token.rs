//! Idempotency tokens for side-effecting cloud calls.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::{IdError, WorkflowId};

/// An opaque token passed to the cloud API so a repeated submission of the
/// same logical request is de-duplicated remotely.
///
/// Tokens are derived once per workflow and persisted in its command record.
/// They are never regenerated for the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Prefix of every derived token.
    pub const PREFIX: &'static str = "bt_";

    /// Longest token the cloud API accepts.
    pub const MAX_LEN: usize = 64;

    /// Derives a token namespaced to a workflow.
    ///
    /// The workflow ID is always hashed in, so two workflows never share a
    /// token. The caller hint, or a random ULID without one, follows it.
    #[must_use]
    pub fn derive(workflow: &WorkflowId, hint: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workflow.to_string().as_bytes());
        hasher.update(b"\n");
        match hint {
            Some(hint) => hasher.update(hint.as_bytes()),
            None => hasher.update(Ulid::new().to_string().as_bytes()),
        }
        let digest = hasher.finalize();
        Self(format!("{}{}", Self::PREFIX, hex::encode(&digest[..16])))
    }

    /// Parses a token read back from storage or supplied by a caller.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(IdError::TooLong {
                len: s.len(),
                max: Self::MAX_LEN,
            });
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidCharacter(c));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for IdempotencyToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IdempotencyToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
