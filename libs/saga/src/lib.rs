//! # burst-saga
//!
//! A small, crash-safe saga engine for workflows made of dependent remote
//! operations.
//!
//! A [`Sequence`] owns an ordered list of [`Step`]s plus one finalize step.
//! The host event loop calls [`Sequence::tick`] repeatedly; every tick runs
//! exactly one step action and never blocks:
//!
//! ```text
//!   Forward(0) -> Forward(1) -> ... -> Forward(N-1) -> FinalizeSuccess -> Done
//!       |             |                    |
//!     Abort         Abort                Abort
//!       v             v                    v
//!   RollingBack(i) -> RollingBack(i-1) -> ... -> RollingBack(0) -> FinalizeRollback -> Done
//! ```
//!
//! The cursor and direction live in the workflow's [`CommandRecord`] and are
//! rewritten whenever they change, so a process restart resumes at the same
//! step. Steps keep their own hard state (try counts, discovered resource
//! IDs) in the same record and hand values to later steps through a typed
//! [scratchpad](scratchpad).
//!
//! ## Invariants
//!
//! - `cursor ∈ [-1, N]`
//! - steps run in declared order forward and in exact reverse order backward
//! - a rollback action never fails terminally; it is retried until it
//!   advances

mod error;
mod record;
mod retry;
pub mod scratchpad;
mod sequence;
mod step;
pub mod store;

pub use burst_id::{IdempotencyToken, WorkflowId};
pub use error::SagaError;
pub use record::{CommandRecord, RecordBatch, CURSOR_FIELD, ROLLING_BACK_FIELD, TOKEN_FIELD};
pub use retry::{BackoffPolicy, TryBudget};
pub use sequence::{BoxedStep, Completion, Sequence, SequencePhase, Tick};
pub use step::{Outcome, Step, StepContext, StepResult};
pub use store::{DurableStore, MemoryStore, Record, SqliteStore, StoreError};
