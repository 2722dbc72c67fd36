//! Adapter from an async cloud API to the non-blocking [`Gateway`] contract.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use burst_id::WorkflowId;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CallStatus, Gateway, GatewayCall, GatewayError, GatewayReply};

/// Async cloud API executed by [`AsyncGateway`].
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn execute(&self, call: GatewayCall) -> Result<GatewayReply, GatewayError>;
}

type CallKey = (WorkflowId, String);

enum Slot {
    InFlight,
    Done(Result<GatewayReply, GatewayError>),
}

/// Runs calls on the tokio runtime and hands results back through polling.
///
/// Calls are deduplicated by `(workflow, sha256(call))`, so re-invoking with
/// the same arguments never submits twice. A finished result is handed over
/// on the next matching call and then forgotten.
pub struct AsyncGateway<A> {
    api: Arc<A>,
    slots: Arc<Mutex<HashMap<CallKey, Slot>>>,
    notify: mpsc::UnboundedSender<WorkflowId>,
    max_in_flight: usize,
}

impl<A: CloudApi> AsyncGateway<A> {
    /// Create a gateway and the receiver for its ready notifications.
    pub fn new(api: A, max_in_flight: usize) -> (Self, mpsc::UnboundedReceiver<WorkflowId>) {
        let (notify, notifications) = mpsc::unbounded_channel();
        let gateway = Self {
            api: Arc::new(api),
            slots: Arc::new(Mutex::new(HashMap::new())),
            notify,
            max_in_flight: max_in_flight.max(1),
        };
        (gateway, notifications)
    }

    /// Number of calls currently executing.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fingerprint(call: &GatewayCall) -> String {
    // GatewayCall serialization cannot fail: it holds only strings, numbers and JSON values.
    let body = serde_json::to_vec(call).unwrap_or_default();
    hex::encode(Sha256::digest(&body))
}

impl<A: CloudApi> Gateway for AsyncGateway<A> {
    fn call(&self, workflow: &WorkflowId, call: &GatewayCall) -> CallStatus {
        let key = (*workflow, fingerprint(call));
        let mut slots = lock(&self.slots);

        match slots.get(&key) {
            Some(Slot::InFlight) => return CallStatus::Pending,
            Some(Slot::Done(_)) => {
                if let Some(Slot::Done(result)) = slots.remove(&key) {
                    return CallStatus::Ready(result);
                }
            }
            None => {}
        }

        let in_flight = slots
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight))
            .count();
        if in_flight >= self.max_in_flight {
            debug!(workflow_id = %workflow, in_flight, "Gateway saturated, call not submitted");
            return CallStatus::NotSubmitted;
        }

        slots.insert(key.clone(), Slot::InFlight);
        drop(slots);

        let api = Arc::clone(&self.api);
        let slots = Arc::clone(&self.slots);
        let notify = self.notify.clone();
        let call = call.clone();
        let kind = call.kind();
        tokio::spawn(async move {
            let result = api.execute(call).await;
            if let Err(e) = &result {
                warn!(
                    workflow_id = %key.0,
                    ?kind,
                    class = %e.class,
                    error = %e,
                    "Gateway call failed"
                );
            }

            let workflow = key.0;
            {
                let mut slots = lock(&slots);
                match slots.get_mut(&key) {
                    Some(slot) => *slot = Slot::Done(result),
                    // Released while in flight.
                    None => return,
                }
            }
            let _ = notify.send(workflow);
        });

        CallStatus::Pending
    }

    fn release(&self, workflow: &WorkflowId) {
        lock(&self.slots).retain(|(owner, _), _| owner != workflow);
    }
}
