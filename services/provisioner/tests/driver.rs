//! Driver loop tests: submissions, notifications and recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use burst_provisioner::gateway::{
    AsyncGateway, CallKind, CallStatus, CloudApi, FleetState, GatewayCall, GatewayError,
    GatewayReply, MockGateway,
};
use burst_provisioner::workflow::start_workflow;
use burst_provisioner::{Driver, DriverConfig, ResultCode};
use burst_saga::{MemoryStore, SqliteStore};
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use common::{fleet, request, settings};

fn fast() -> DriverConfig {
    DriverConfig {
        tick_interval: Duration::from_millis(10),
        ..DriverConfig::default()
    }
}

#[tokio::test]
async fn test_submit_runs_workflow_to_success() {
    let gateway = Arc::new(MockGateway::new());
    let (_tx, notifications) = mpsc::unbounded_channel();
    let (driver, handle) = Driver::new(
        Box::new(MemoryStore::new()),
        gateway.clone(),
        notifications,
        settings(),
        fast(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(driver.run(shutdown_rx));

    let reply = tokio::time::timeout(Duration::from_secs(5), handle.submit(request(1)))
        .await
        .expect("reply timed out");

    assert_eq!(reply.result, ResultCode::Success);
    assert!(reply.workflow_id.is_some());
    assert_eq!(gateway.count(CallKind::RequestFleet), 1);
    assert_eq!(gateway.count(CallKind::PutRule), 1);

    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("driver did not exit")
        .unwrap();
}

#[tokio::test]
async fn test_invalid_request_is_refused_without_calls() {
    let gateway = Arc::new(MockGateway::new());
    let (_tx, notifications) = mpsc::unbounded_channel();
    let (driver, handle) = Driver::new(
        Box::new(MemoryStore::new()),
        gateway.clone(),
        notifications,
        settings(),
        fast(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(driver.run(shutdown_rx));

    let mut bad = request(1);
    bad.launch.instance_types.clear();
    let reply = handle.submit(bad).await;

    assert_eq!(reply.result, ResultCode::InvalidRequest);
    assert!(reply.workflow_id.is_none());
    assert!(reply.message.unwrap().starts_with("invalid_launch_spec"));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_stopped_driver_is_a_communication_error() {
    let (_tx, notifications) = mpsc::unbounded_channel();
    let (driver, handle) = Driver::new(
        Box::new(MemoryStore::new()),
        Arc::new(MockGateway::new()),
        notifications,
        settings(),
        fast(),
    );
    drop(driver);

    let reply = handle.submit(request(1)).await;
    assert_eq!(reply.result, ResultCode::CommunicationError);
}

#[tokio::test]
async fn test_recovered_workflows_finish_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    // A previous run created a workflow, then stopped.
    let workflow_id = {
        let mut store = SqliteStore::open(&path).unwrap();
        let sequence = start_workflow(&mut store, &settings(), &request(2), Utc::now()).unwrap();
        sequence.workflow_id()
    };

    let gateway = Arc::new(MockGateway::new());
    gateway.script(
        CallKind::DescribeFleet,
        [CallStatus::Ready(Ok(fleet(FleetState::Failed, 2, 0)))],
    );
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();
    let (_tx, notifications) = mpsc::unbounded_channel();
    let (driver, handle) = Driver::new(
        Box::new(SqliteStore::open(&path).unwrap()),
        gateway.clone(),
        notifications,
        settings(),
        fast(),
    );
    let mut driver = driver.with_outcomes(outcomes_tx);
    assert_eq!(driver.recover().unwrap(), 1);
    assert_eq!(driver.active(), 1);

    drop(handle);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(5), driver.run(shutdown_rx))
        .await
        .expect("driver did not finish recovered work");

    let reply = outcomes.try_recv().unwrap();
    assert_eq!(reply.workflow_id, Some(workflow_id));
    assert_eq!(reply.result, ResultCode::Failure);
    assert_eq!(gateway.count(CallKind::CancelFleet), 1);
    assert_eq!(gateway.count(CallKind::DeleteRule), 1);

    let store = SqliteStore::open(&path).unwrap();
    assert!(burst_saga::DurableStore::record_keys(&store).unwrap().is_empty());
}

/// Cloud API that answers every call after a short delay.
struct SlowCloud;

#[async_trait::async_trait]
impl CloudApi for SlowCloud {
    async fn execute(&self, call: GatewayCall) -> Result<GatewayReply, GatewayError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(match call {
            GatewayCall::DescribeFunction { function_name } => GatewayReply::Function {
                arn: format!("arn:fn:{function_name}"),
                code_sha256: None,
            },
            GatewayCall::PutRule { rule_name, .. } => GatewayReply::RuleCreated {
                rule_arn: format!("arn:rule:{rule_name}"),
            },
            GatewayCall::PutTargets { .. } => GatewayReply::TargetsPut,
            GatewayCall::RequestFleet { .. } => GatewayReply::FleetRequested {
                fleet_id: "sfr-slow".to_string(),
            },
            GatewayCall::DescribeFleet { .. } => fleet(FleetState::Active, 1, 1),
            _ => GatewayReply::Deleted,
        })
    }
}

#[tokio::test]
async fn test_notifications_drive_async_gateway_results() {
    let (gateway, notifications) = AsyncGateway::new(SlowCloud, 4);
    // Long tick interval: progress must come from ready notifications.
    let config = DriverConfig {
        tick_interval: Duration::from_secs(3600),
        ..DriverConfig::default()
    };
    let (driver, handle) = Driver::new(
        Box::new(MemoryStore::new()),
        Arc::new(gateway),
        notifications,
        settings(),
        config,
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(driver.run(shutdown_rx));

    let reply = tokio::time::timeout(Duration::from_secs(5), handle.submit(request(1)))
        .await
        .expect("reply timed out");
    assert_eq!(reply.result, ResultCode::Success);
    assert_eq!(reply.fleet_id.as_deref(), Some("sfr-slow"));
}
