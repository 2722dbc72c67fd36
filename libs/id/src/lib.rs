//! # burst-id
//!
//! Identifiers shared by the saga engine and the provisioner.
//!
//! - [`WorkflowId`] names one provisioning workflow. It is the key of the
//!   workflow's command record, so it must round-trip through its string
//!   form exactly: `wf_{ulid}`.
//! - [`IdempotencyToken`] is handed to the cloud API on every create call.
//!   It is derived once per workflow and persisted, so a retried call after a
//!   crash carries the same token and the remote side de-duplicates it.

mod error;
mod token;
mod workflow;

pub use error::IdError;
pub use token::IdempotencyToken;
pub use workflow::WorkflowId;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
