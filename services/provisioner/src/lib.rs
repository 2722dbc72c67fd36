//! burst provisioner
//!
//! Provisions elastic cloud capacity for a bounded lease. Each request runs
//! as a crash-safe step sequence:
//!
//! ```text
//! CheckFunction -> ScheduleRule -> RuleTargets -> FleetRequest -> WaitForFleet
//!                                                                     |
//!                                                       ReplyAndClean (finalize)
//! ```
//!
//! Any step may abort, in which case every completed step is undone in
//! reverse order before the caller receives a failure reply. The schedule
//! rule fires the lease function at expiry, which reclaims the fleet even if
//! this process is gone by then.
//!
//! ## Modules
//!
//! - `gateway`: non-blocking cloud API contract, HTTP client and mock
//! - `steps`: the provisioning steps
//! - `workflow`: building sequences from requests
//! - `recovery`: rebuilding workflows after a restart
//! - `driver`: the single-task event loop

pub mod config;
pub mod driver;
pub mod gateway;
pub mod handoff;
pub mod logging;
pub mod recovery;
pub mod reply;
pub mod request;
pub mod steps;
pub mod workflow;

pub use config::Config;
pub use driver::{Driver, DriverConfig, DriverHandle};
pub use reply::{ResultCode, WorkflowReply};
pub use request::{LaunchSpec, ProvisionRequest, ValidationError};
