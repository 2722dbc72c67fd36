//! The step contract.

use std::time::Duration;

use burst_id::WorkflowId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SagaError;
use crate::record::CommandRecord;
use crate::scratchpad;
use crate::store::DurableStore;

/// What a step action reports back to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// An external call is pending; tick again later with no state change.
    Suspend,
    /// This direction of this step is done.
    Advance,
    /// Unrecoverable failure. Only meaningful from [`Step::invoke`].
    Abort,
}

/// Result of a step action. Errors are treated as [`Outcome::Suspend`].
pub type StepResult = Result<Outcome, SagaError>;

/// One unit of work in a sequence.
///
/// Steps are rebuilt from scratch whenever a workflow is (re)constructed, so
/// anything they must remember across a restart goes into the command record
/// via [`StepContext::record`].
pub trait Step<E>: Send {
    /// Stable name, used in `State_<name>_<field>` keys and logs.
    fn name(&self) -> &str;

    /// Perform the forward action.
    fn invoke(&mut self, ctx: &mut StepContext<'_, E>) -> StepResult;

    /// Perform the compensating action.
    ///
    /// Must tolerate the forward action never having run, having partially
    /// run, or having completed. Returning [`Outcome::Abort`] or an error is
    /// treated as [`Outcome::Suspend`]: rollbacks are retried, never given up.
    fn rollback(&mut self, ctx: &mut StepContext<'_, E>) -> StepResult;
}

/// Everything a step may touch during one tick.
pub struct StepContext<'a, E> {
    workflow_id: WorkflowId,
    store: &'a mut dyn DurableStore,
    env: &'a mut E,
    retry_after: Option<Duration>,
}

impl<'a, E> StepContext<'a, E> {
    /// Build a context for one step action.
    pub fn new(workflow_id: WorkflowId, store: &'a mut dyn DurableStore, env: &'a mut E) -> Self {
        Self {
            workflow_id,
            store,
            env,
            retry_after: None,
        }
    }

    /// The workflow being driven.
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// The workflow's command record.
    pub fn record(&mut self) -> CommandRecord<'_> {
        CommandRecord::new(self.workflow_id, &mut *self.store)
    }

    /// The host environment.
    pub fn env(&mut self) -> &mut E {
        &mut *self.env
    }

    /// Load the typed scratchpad.
    pub fn scratchpad<T>(&self) -> Result<T, SagaError>
    where
        T: DeserializeOwned + Default,
    {
        scratchpad::load(&*self.store, &self.workflow_id)
    }

    /// Load, modify and save the scratchpad.
    pub fn update_scratchpad<T, F>(&mut self, f: F) -> Result<(), SagaError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let mut pad: T = self.scratchpad()?;
        f(&mut pad);
        scratchpad::save(&mut *self.store, &self.workflow_id, &pad)
    }

    /// Ask the host to wait at least `delay` before the next tick.
    pub fn retry_after(&mut self, delay: Duration) {
        self.retry_after = Some(self.retry_after.map_or(delay, |d| d.max(delay)));
    }

    pub(crate) fn take_retry_after(&mut self) -> Option<Duration> {
        self.retry_after.take()
    }
}
