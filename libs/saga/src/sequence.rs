//! The sequence engine.

use std::time::Duration;

use burst_id::{IdempotencyToken, WorkflowId};
use tracing::{debug, error, info, warn};

use crate::error::SagaError;
use crate::record::{
    CommandRecord, RecordBatch, CREATED_AT_FIELD, CURSOR_FIELD, ROLLING_BACK_FIELD, TOKEN_FIELD,
};
use crate::step::{Outcome, Step, StepContext, StepResult};
use crate::store::DurableStore;

/// A step owned by a sequence.
pub type BoxedStep<E> = Box<dyn Step<E>>;

/// Where a sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePhase {
    /// Running the forward action of step `i`.
    Forward(usize),
    /// Running the compensating action of step `i`.
    RollingBack(usize),
    /// All steps advanced; finalize has not finished yet.
    FinalizeSuccess,
    /// Every step was rolled back; finalize has not finished yet.
    FinalizeRollback,
    /// Finalize finished and all durable state is gone.
    Done,
}

/// How a finished sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    RolledBack,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The cursor or direction changed; the host may tick again at once.
    Progressed,
    /// Waiting on something external.
    Suspended {
        /// Minimum wait requested by the step, if any.
        retry_after: Option<Duration>,
    },
    /// The sequence is done; the owner should drop it.
    Finished(Completion),
}

/// Drives an ordered list of steps forward, or backward after an abort.
pub struct Sequence<E> {
    workflow_id: WorkflowId,
    steps: Vec<BoxedStep<E>>,
    finalize: BoxedStep<E>,
    cursor: isize,
    rolling_back: bool,
    teardown: Option<Completion>,
    done: Option<Completion>,
}

impl<E> Sequence<E> {
    /// Assemble a sequence. Call [`start`](Self::start) or
    /// [`resume`](Self::resume) before ticking it.
    pub fn new(workflow_id: WorkflowId, steps: Vec<BoxedStep<E>>, finalize: BoxedStep<E>) -> Self {
        Self {
            workflow_id,
            steps,
            finalize,
            cursor: 0,
            rolling_back: false,
            teardown: None,
            done: None,
        }
    }

    /// Create the command record and position the sequence at `Forward(0)`.
    ///
    /// The cursor, direction flag, idempotency token and `initial` fields are
    /// written in one transaction, before any step runs.
    pub fn start(
        mut self,
        store: &mut dyn DurableStore,
        token_hint: Option<&str>,
        initial: RecordBatch,
    ) -> Result<Self, SagaError> {
        let mut record = CommandRecord::new(self.workflow_id, store);
        if record.exists()? {
            return Err(SagaError::AlreadyExists(record.key().to_string()));
        }

        let token = IdempotencyToken::derive(&self.workflow_id, token_hint);
        record.commit(
            initial
                .set(CURSOR_FIELD, 0)
                .set(ROLLING_BACK_FIELD, false)
                .set(TOKEN_FIELD, &token)
                .set(CREATED_AT_FIELD, chrono::Utc::now().to_rfc3339()),
        )?;

        self.cursor = 0;
        self.rolling_back = false;
        info!(
            workflow_id = %self.workflow_id,
            steps = self.steps.len(),
            "Workflow started"
        );
        Ok(self)
    }

    /// Position the sequence from an existing command record.
    pub fn resume(mut self, store: &mut dyn DurableStore) -> Result<Self, SagaError> {
        let record = CommandRecord::new(self.workflow_id, store);
        let Some((cursor, rolling_back)) = record.position()? else {
            return Err(SagaError::RecordNotFound(record.key().to_string()));
        };

        let n = self.steps.len();
        if cursor < -1 || cursor > n as isize {
            return Err(SagaError::InvariantViolation { cursor, steps: n });
        }

        self.cursor = cursor;
        self.rolling_back = rolling_back;
        info!(
            workflow_id = %self.workflow_id,
            cursor,
            rolling_back,
            "Workflow resumed"
        );
        Ok(self)
    }

    /// The workflow being driven.
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Current cursor, in `[-1, N]`.
    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Whether the sequence is unwinding.
    pub fn is_rolling_back(&self) -> bool {
        self.rolling_back
    }

    /// Number of steps, not counting finalize.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the sequence has no steps besides finalize.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps in declared order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Current phase.
    pub fn phase(&self) -> SequencePhase {
        if self.done.is_some() {
            return SequencePhase::Done;
        }
        match self.teardown {
            Some(Completion::Succeeded) => return SequencePhase::FinalizeSuccess,
            Some(Completion::RolledBack) => return SequencePhase::FinalizeRollback,
            None => {}
        }
        if self.cursor == self.steps.len() as isize {
            SequencePhase::FinalizeSuccess
        } else if self.cursor < 0 {
            SequencePhase::FinalizeRollback
        } else if self.rolling_back {
            SequencePhase::RollingBack(self.cursor as usize)
        } else {
            SequencePhase::Forward(self.cursor as usize)
        }
    }

    /// Run exactly one step action and return without blocking.
    pub fn tick(&mut self, store: &mut dyn DurableStore, env: &mut E) -> Tick {
        if let Some(completion) = self.done {
            return Tick::Finished(completion);
        }
        if let Some(completion) = self.teardown {
            return self.tear_down(store, completion);
        }

        let n = self.steps.len() as isize;
        assert!(
            (-1..=n).contains(&self.cursor),
            "cursor {} outside [-1, {}] for {}",
            self.cursor,
            n,
            self.workflow_id
        );

        if self.cursor == n {
            return self.run_finalize(store, env, Completion::Succeeded);
        }
        if self.cursor < 0 {
            return self.run_finalize(store, env, Completion::RolledBack);
        }

        let index = self.cursor as usize;
        let rolling_back = self.rolling_back;
        let (result, retry_after) = {
            let step = &mut self.steps[index];
            let mut ctx = StepContext::new(self.workflow_id, &mut *store, &mut *env);
            let result = if rolling_back {
                step.rollback(&mut ctx)
            } else {
                step.invoke(&mut ctx)
            };
            (result, ctx.take_retry_after())
        };

        let step = self.steps[index].name();
        debug!(
            workflow_id = %self.workflow_id,
            step,
            cursor = self.cursor,
            rolling_back,
            result = ?result,
            "Step dispatched"
        );

        match (rolling_back, result) {
            (_, Ok(Outcome::Suspend)) => Tick::Suspended { retry_after },
            (false, Ok(Outcome::Advance)) => self.move_to(store, self.cursor + 1, false),
            (true, Ok(Outcome::Advance)) => self.move_to(store, self.cursor - 1, true),
            (false, Ok(Outcome::Abort)) => {
                info!(
                    workflow_id = %self.workflow_id,
                    step,
                    "Step aborted, rolling back"
                );
                self.move_to(store, self.cursor, true)
            }
            (true, Ok(Outcome::Abort)) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    step,
                    "Rollback reported abort; never stop a rollback, retrying"
                );
                Tick::Suspended { retry_after }
            }
            (false, Err(e)) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    step,
                    error = %e,
                    "Step failed, retrying"
                );
                Tick::Suspended { retry_after }
            }
            (true, Err(e)) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    step,
                    error = %e,
                    "Rollback failed; never stop a rollback, retrying"
                );
                Tick::Suspended { retry_after }
            }
        }
    }

    fn run_finalize(
        &mut self,
        store: &mut dyn DurableStore,
        env: &mut E,
        completion: Completion,
    ) -> Tick {
        let (result, retry_after): (StepResult, _) = {
            let mut ctx = StepContext::new(self.workflow_id, &mut *store, &mut *env);
            let result = match completion {
                Completion::Succeeded => self.finalize.invoke(&mut ctx),
                Completion::RolledBack => self.finalize.rollback(&mut ctx),
            };
            (result, ctx.take_retry_after())
        };

        match result {
            Ok(Outcome::Suspend) => Tick::Suspended { retry_after },
            Ok(_) => self.tear_down(store, completion),
            Err(e) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    step = self.finalize.name(),
                    error = %e,
                    "Finalize failed, retrying"
                );
                Tick::Suspended { retry_after }
            }
        }
    }

    fn tear_down(&mut self, store: &mut dyn DurableStore, completion: Completion) -> Tick {
        match CommandRecord::new(self.workflow_id, store).destroy() {
            Ok(()) => {
                self.teardown = None;
                self.done = Some(completion);
                info!(
                    workflow_id = %self.workflow_id,
                    completion = ?completion,
                    "Workflow finished"
                );
                Tick::Finished(completion)
            }
            Err(e) => {
                self.teardown = Some(completion);
                error!(
                    workflow_id = %self.workflow_id,
                    error = %e,
                    "Failed to delete workflow state, will retry"
                );
                Tick::Suspended { retry_after: None }
            }
        }
    }

    /// Persist a new position, then adopt it. On a store failure the
    /// position is left unchanged and the same action runs again next tick.
    fn move_to(&mut self, store: &mut dyn DurableStore, cursor: isize, rolling_back: bool) -> Tick {
        let persisted = CommandRecord::new(self.workflow_id, store).commit(
            RecordBatch::new()
                .set(CURSOR_FIELD, cursor)
                .set(ROLLING_BACK_FIELD, rolling_back),
        );

        if let Err(e) = persisted {
            error!(
                workflow_id = %self.workflow_id,
                cursor,
                rolling_back,
                error = %e,
                "Failed to persist sequence position"
            );
            return Tick::Suspended { retry_after: None };
        }

        if rolling_back && !self.rolling_back {
            info!(workflow_id = %self.workflow_id, cursor, "Rollback started");
        }
        self.cursor = cursor;
        self.rolling_back = rolling_back;
        Tick::Progressed
    }
}
