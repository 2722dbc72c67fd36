//! Typed scratchpad for values handed from one step to a later one.
//!
//! The scratchpad is any serde struct whose fields are all optional (or
//! defaulted). It is persisted as its own record, one field per struct
//! member, with each value stored as JSON text. Saving replaces the whole
//! record.

use burst_id::WorkflowId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SagaError;
use crate::store::{with_transaction, DurableStore};

/// Record key of a workflow's scratchpad.
pub fn key(workflow_id: &WorkflowId) -> String {
    format!("{workflow_id}-scratchpad")
}

/// Load the scratchpad, or `T::default()` when none was saved.
pub fn load<T>(store: &dyn DurableStore, workflow_id: &WorkflowId) -> Result<T, SagaError>
where
    T: DeserializeOwned + Default,
{
    let Some(record) = store.lookup(&key(workflow_id))? else {
        return Ok(T::default());
    };

    let mut object = serde_json::Map::new();
    for (field, raw) in record {
        object.insert(field, serde_json::from_str(&raw)?);
    }
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}

/// Replace the scratchpad with `value`.
///
/// `None` members are not written, so they read back as absent.
pub fn save<T>(
    store: &mut dyn DurableStore,
    workflow_id: &WorkflowId,
    value: &T,
) -> Result<(), SagaError>
where
    T: Serialize,
{
    let serde_json::Value::Object(object) = serde_json::to_value(value)? else {
        return Err(SagaError::corrupt(
            &key(workflow_id),
            "*",
            "scratchpad must serialize to a JSON object",
        ));
    };

    let mut fields = Vec::with_capacity(object.len());
    for (field, value) in object {
        if !value.is_null() {
            fields.push((field, serde_json::to_string(&value)?));
        }
    }

    let key = key(workflow_id);
    with_transaction(store, |s| {
        s.destroy_record(&key)?;
        for (field, raw) in &fields {
            s.set_field(&key, field, raw)?;
        }
        Ok(())
    })?;
    Ok(())
}
