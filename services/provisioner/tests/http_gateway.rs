//! HTTP cloud API client against a mock server.

use std::collections::BTreeMap;
use std::time::Duration;

use burst_provisioner::gateway::{
    AsyncGateway, CallStatus, CloudApi, ErrorClass, FleetSpec, FleetState, Gateway, GatewayCall,
    GatewayReply, HttpCloudApi, IDEMPOTENCY_KEY_HEADER,
};
use burst_saga::{IdempotencyToken, WorkflowId};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer) -> HttpCloudApi {
    HttpCloudApi::new(server.uri(), Some("test-token".to_string()), Duration::from_secs(5)).unwrap()
}

fn fleet_call(token: &IdempotencyToken) -> GatewayCall {
    GatewayCall::RequestFleet {
        token: token.to_string(),
        spec: FleetSpec {
            target_capacity: 3,
            image_id: "img-1".to_string(),
            instance_types: vec!["c5.large".to_string()],
            user_data: None,
            key_name: None,
            valid_until: Utc::now() + chrono::Duration::hours(1),
            tags: BTreeMap::new(),
        },
    }
}

#[tokio::test]
async fn test_fleet_request_carries_idempotency_key() {
    let server = MockServer::start().await;
    let token = IdempotencyToken::derive(&WorkflowId::new(), Some("batch-1"));

    Mock::given(method("POST"))
        .and(path("/v1/fleets"))
        .and(header(IDEMPOTENCY_KEY_HEADER, token.as_str()))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({ "target_capacity": 3 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "fleet_id": "sfr-77" })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = api(&server).execute(fleet_call(&token)).await.unwrap();
    assert_eq!(
        reply,
        GatewayReply::FleetRequested {
            fleet_id: "sfr-77".to_string()
        }
    );
}

#[tokio::test]
async fn test_describe_fleet_decodes_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/fleets/sfr-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "active",
            "target_capacity": 2,
            "fulfilled_capacity": 2,
            "instance_ids": ["i-1", "i-2"]
        })))
        .mount(&server)
        .await;

    let reply = api(&server)
        .execute(GatewayCall::DescribeFleet {
            fleet_id: "sfr-1".to_string(),
        })
        .await
        .unwrap();

    match reply {
        GatewayReply::Fleet(status) => {
            assert_eq!(status.state, FleetState::Active);
            assert_eq!(status.instance_ids, vec!["i-1", "i-2"]);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[tokio::test]
async fn test_error_responses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/fleets/sfr-missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "FleetNotFound",
            "message": "no fleet sfr-missing"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/fleets"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/rules/r-1"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let api = api(&server);

    let not_found = api
        .execute(GatewayCall::DescribeFleet {
            fleet_id: "sfr-missing".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(not_found.class, ErrorClass::NotFound);
    assert_eq!(not_found.code, "FleetNotFound");
    assert_eq!(not_found.message, "no fleet sfr-missing");

    let token = IdempotencyToken::derive(&WorkflowId::new(), None);
    let unknown = api.execute(fleet_call(&token)).await.unwrap_err();
    assert_eq!(unknown.class, ErrorClass::MustVerify);
    assert_eq!(unknown.message, "boom");

    let throttled = api
        .execute(GatewayCall::DeleteRule {
            rule_name: "r-1".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(throttled.class, ErrorClass::Retryable);
}

#[tokio::test]
async fn test_unreachable_service_is_retryable() {
    // Nothing listens on port 1.
    let api = HttpCloudApi::new("http://127.0.0.1:1", None, Duration::from_secs(2)).unwrap();
    let token = IdempotencyToken::derive(&WorkflowId::new(), None);

    let err = api.execute(fleet_call(&token)).await.unwrap_err();
    assert_eq!(err.class, ErrorClass::Retryable);
}

#[tokio::test]
async fn test_async_gateway_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/fleets/sfr-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, mut ready) = AsyncGateway::new(api(&server), 2);
    let workflow = WorkflowId::new();
    let cancel = GatewayCall::CancelFleet {
        fleet_id: "sfr-9".to_string(),
    };

    assert_eq!(gateway.call(&workflow, &cancel), CallStatus::Pending);
    let notified = tokio::time::timeout(Duration::from_secs(5), ready.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notified, workflow);
    assert_eq!(
        gateway.call(&workflow, &cancel),
        CallStatus::Ready(Ok(GatewayReply::Deleted))
    );
}
