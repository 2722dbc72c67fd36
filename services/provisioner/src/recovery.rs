//! Rebuilding in-flight workflows from the durable store after a restart.

use burst_id::WorkflowId;
use burst_saga::{CommandRecord, DurableStore, SagaError, Sequence};
use thiserror::Error;
use tracing::{error, info};

use crate::request::ProvisionRequest;
use crate::steps::{ProvisionEnv, StepSettings};
use crate::workflow::{build_sequence, REQUEST_FIELD};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error("workflow {0} has no stored request")]
    MissingRequest(WorkflowId),

    #[error("workflow {workflow_id} has an unreadable request: {source}")]
    BadRequest {
        workflow_id: WorkflowId,
        source: serde_json::Error,
    },
}

/// Rebuild one workflow from its command record.
pub fn rebuild(
    store: &mut dyn DurableStore,
    workflow_id: WorkflowId,
    settings: &StepSettings,
) -> Result<Sequence<ProvisionEnv>, RecoveryError> {
    let raw = CommandRecord::new(workflow_id, &mut *store)
        .field(REQUEST_FIELD)?
        .ok_or(RecoveryError::MissingRequest(workflow_id))?;
    let request: ProvisionRequest = serde_json::from_str(&raw)
        .map_err(|source| RecoveryError::BadRequest {
            workflow_id,
            source,
        })?;

    Ok(build_sequence(workflow_id, &request, settings).resume(store)?)
}

/// Rebuild every workflow with a command record in `store`.
///
/// Workflows that cannot be rebuilt are logged and left in place.
pub fn recover_workflows(
    store: &mut dyn DurableStore,
    settings: &StepSettings,
) -> Result<Vec<Sequence<ProvisionEnv>>, SagaError> {
    let keys = store.record_keys()?;
    let mut recovered = Vec::new();

    // Scratchpad and foreign keys do not parse as workflow IDs.
    for workflow_id in keys.iter().filter_map(|key| WorkflowId::parse(key).ok()) {
        match rebuild(store, workflow_id, settings) {
            Ok(sequence) => recovered.push(sequence),
            Err(e) => {
                error!(workflow_id = %workflow_id, error = %e, "Failed to recover workflow");
            }
        }
    }

    info!(count = recovered.len(), "Recovered workflows");
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use burst_saga::{MemoryStore, CURSOR_FIELD};
    use chrono::{Duration, Utc};

    use crate::request::LaunchSpec;
    use crate::workflow::start_workflow;

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            capacity: 1,
            launch: LaunchSpec {
                image_id: "img-1".to_string(),
                instance_types: vec!["t3.micro".to_string()],
                user_data: None,
                key_name: None,
            },
            lease_expiry: Utc::now() + Duration::hours(1),
            tags: BTreeMap::new(),
            idempotency_hint: None,
        }
    }

    #[test]
    fn test_recovers_started_workflows_and_skips_broken_ones() {
        let mut store = MemoryStore::new();
        let settings = StepSettings::default();
        let a = start_workflow(&mut store, &settings, &request(), Utc::now()).unwrap();
        let b = start_workflow(&mut store, &settings, &request(), Utc::now()).unwrap();

        // A record without a request cannot be rebuilt.
        let broken = WorkflowId::new();
        store.set_field(&broken.to_string(), CURSOR_FIELD, "0").unwrap();

        let mut ids: Vec<_> = recover_workflows(&mut store, &settings)
            .unwrap()
            .iter()
            .map(|s| s.workflow_id())
            .collect();
        ids.sort();
        let mut expected = vec![a.workflow_id(), b.workflow_id()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_rebuild_reports_missing_request() {
        let mut store = MemoryStore::new();
        let wf = WorkflowId::new();
        store.set_field(&wf.to_string(), CURSOR_FIELD, "0").unwrap();

        let err = rebuild(&mut store, wf, &StepSettings::default()).err().unwrap();
        assert!(matches!(err, RecoveryError::MissingRequest(id) if id == wf));
    }
}
