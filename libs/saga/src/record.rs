//! The command record: a workflow's durable hard state.
//!
//! Field layout:
//!
//! | field | owner | meaning |
//! |-------|-------|---------|
//! | `State_cursor` | engine | index of the in-progress step, `N` or `-1` |
//! | `State_rollingBack` | engine | `true` once any step aborted |
//! | `State_idempotencyToken` | engine/steps | token passed to create calls |
//! | `State_<Step>_<Field>` | step | try counts, discovered resource IDs |
//! | `CreatedAt` | engine | RFC 3339 creation time |
//!
//! Hosts may add their own top-level fields (the provisioner stores the
//! original request) through the initial [`RecordBatch`].

use std::fmt::Display;
use std::str::FromStr;

use burst_id::{IdempotencyToken, WorkflowId};

use crate::error::SagaError;
use crate::retry::TryBudget;
use crate::scratchpad;
use crate::store::{with_transaction, DurableStore};

pub const CURSOR_FIELD: &str = "State_cursor";
pub const ROLLING_BACK_FIELD: &str = "State_rollingBack";
pub const TOKEN_FIELD: &str = "State_idempotencyToken";
pub(crate) const CREATED_AT_FIELD: &str = "CreatedAt";

const TRY_COUNT: &str = "TryCount";
const LAST_ERROR: &str = "LastError";

/// Name of a step-owned field.
pub fn step_field(step: &str, field: &str) -> String {
    format!("State_{step}_{field}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mutation {
    Set(String, String),
    Delete(String),
}

/// A set of field changes applied to a command record in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    ops: Vec<Mutation>,
}

impl RecordBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a top-level field.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Display) -> Self {
        self.ops.push(Mutation::Set(field.into(), value.to_string()));
        self
    }

    /// Delete a top-level field.
    #[must_use]
    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.ops.push(Mutation::Delete(field.into()));
        self
    }

    /// Set a `State_<step>_<field>` field.
    #[must_use]
    pub fn set_step(self, step: &str, field: &str, value: impl Display) -> Self {
        self.set(step_field(step, field), value)
    }

    /// Delete a `State_<step>_<field>` field.
    #[must_use]
    pub fn delete_step(self, step: &str, field: &str) -> Self {
        self.delete(step_field(step, field))
    }

    /// Whether the batch has no changes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn apply(&self, key: &str, store: &mut dyn DurableStore) -> Result<(), crate::StoreError> {
        for op in &self.ops {
            match op {
                Mutation::Set(field, value) => store.set_field(key, field, value)?,
                Mutation::Delete(field) => store.delete_field(key, field)?,
            }
        }
        Ok(())
    }
}

/// A read/write view of one workflow's command record.
pub struct CommandRecord<'a> {
    workflow_id: WorkflowId,
    key: String,
    store: &'a mut dyn DurableStore,
}

impl<'a> CommandRecord<'a> {
    /// Open the view. The record itself may not exist yet.
    pub fn new(workflow_id: WorkflowId, store: &'a mut dyn DurableStore) -> Self {
        Self {
            workflow_id,
            key: workflow_id.to_string(),
            store,
        }
    }

    /// The record key (the workflow ID string).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the record exists.
    pub fn exists(&self) -> Result<bool, SagaError> {
        Ok(self.store.lookup(&self.key)?.is_some())
    }

    /// Read a top-level field.
    pub fn field(&self, field: &str) -> Result<Option<String>, SagaError> {
        Ok(self.store.get_field(&self.key, field)?)
    }

    /// Read a `State_<step>_<field>` field.
    pub fn step_field(&self, step: &str, field: &str) -> Result<Option<String>, SagaError> {
        self.field(&step_field(step, field))
    }

    /// Read and parse a `State_<step>_<field>` field.
    pub fn parse_step_field<T>(&self, step: &str, field: &str) -> Result<Option<T>, SagaError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let name = step_field(step, field);
        self.field(&name)?
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| SagaError::corrupt(&self.key, &name, e))
            })
            .transpose()
    }

    /// Apply a batch of changes atomically.
    pub fn commit(&mut self, batch: RecordBatch) -> Result<(), SagaError> {
        if batch.is_empty() {
            return Ok(());
        }
        let key = self.key.clone();
        with_transaction(&mut *self.store, |s| batch.apply(&key, s))?;
        Ok(())
    }

    /// Failed attempts recorded for a step.
    pub fn try_count(&self, step: &str) -> Result<u32, SagaError> {
        Ok(self.parse_step_field(step, TRY_COUNT)?.unwrap_or(0))
    }

    /// Last failure message recorded for a step.
    pub fn last_error(&self, step: &str) -> Result<Option<String>, SagaError> {
        self.step_field(step, LAST_ERROR)
    }

    /// Count one failed attempt for `step`.
    ///
    /// The incremented count and the failure message are written in one
    /// transaction. Returns `true` once the budget is exhausted.
    pub fn record_failure(
        &mut self,
        step: &str,
        budget: &TryBudget,
        message: &str,
    ) -> Result<bool, SagaError> {
        let tries = self.try_count(step)? + 1;
        self.commit(
            RecordBatch::new()
                .set_step(step, TRY_COUNT, tries)
                .set_step(step, LAST_ERROR, message),
        )?;
        Ok(budget.is_exhausted(tries))
    }

    /// The persisted idempotency token, if one was written.
    pub fn idempotency_token(&self) -> Result<Option<IdempotencyToken>, SagaError> {
        self.field(TOKEN_FIELD)?
            .map(|raw| {
                IdempotencyToken::parse(&raw)
                    .map_err(|e| SagaError::corrupt(&self.key, TOKEN_FIELD, e))
            })
            .transpose()
    }

    /// Read the token, deriving and persisting one first if none exists.
    pub fn ensure_idempotency_token(
        &mut self,
        hint: Option<&str>,
    ) -> Result<IdempotencyToken, SagaError> {
        if let Some(token) = self.idempotency_token()? {
            return Ok(token);
        }
        let token = IdempotencyToken::derive(&self.workflow_id, hint);
        self.commit(RecordBatch::new().set(TOKEN_FIELD, &token))?;
        Ok(token)
    }

    /// Read the persisted `(cursor, rolling_back)` pair.
    pub(crate) fn position(&self) -> Result<Option<(isize, bool)>, SagaError> {
        let Some(record) = self.store.lookup(&self.key)? else {
            return Ok(None);
        };

        let cursor = record
            .get(CURSOR_FIELD)
            .ok_or_else(|| SagaError::corrupt(&self.key, CURSOR_FIELD, "missing"))?
            .parse::<isize>()
            .map_err(|e| SagaError::corrupt(&self.key, CURSOR_FIELD, e))?;

        let rolling_back = match record.get(ROLLING_BACK_FIELD) {
            None => false,
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|e| SagaError::corrupt(&self.key, ROLLING_BACK_FIELD, e))?,
        };

        Ok(Some((cursor, rolling_back)))
    }

    /// Destroy the command record and the scratchpad in one transaction.
    pub(crate) fn destroy(&mut self) -> Result<(), SagaError> {
        let key = self.key.clone();
        let pad = scratchpad::key(&self.workflow_id);
        with_transaction(&mut *self.store, |s| {
            s.destroy_record(&key)?;
            s.destroy_record(&pad)
        })?;
        Ok(())
    }
}
