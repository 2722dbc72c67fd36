//! HTTP cloud API client.
//!
//! Every mutating call carries the workflow's idempotency token in the
//! `Idempotency-Key` header so a resubmission after an unknown outcome is
//! answered with the original result instead of a duplicate resource.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CloudApi, ErrorClass, FleetStatus, GatewayCall, GatewayError, GatewayReply};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Cloud API reached over HTTP.
pub struct HttpCloudApi {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FunctionBody {
    arn: String,
    #[serde(default)]
    code_sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuleBody {
    rule_arn: String,
}

#[derive(Debug, Deserialize)]
struct FleetRequestBody {
    fleet_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpCloudApi {
    /// Create a client for the API at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn build(&self, call: &GatewayCall) -> reqwest::RequestBuilder {
        match call {
            GatewayCall::DescribeFunction { function_name } => {
                self.request(Method::GET, &format!("/v1/functions/{function_name}"))
            }
            GatewayCall::PutRule {
                rule_name,
                schedule,
                description,
                token,
            } => self
                .request(Method::PUT, &format!("/v1/rules/{rule_name}"))
                .header(IDEMPOTENCY_KEY_HEADER, token)
                .json(&json!({ "schedule": schedule, "description": description })),
            GatewayCall::DeleteRule { rule_name } => {
                self.request(Method::DELETE, &format!("/v1/rules/{rule_name}"))
            }
            GatewayCall::PutTargets {
                rule_name,
                target_id,
                function_arn,
                input,
                token,
            } => self
                .request(
                    Method::PUT,
                    &format!("/v1/rules/{rule_name}/targets/{target_id}"),
                )
                .header(IDEMPOTENCY_KEY_HEADER, token)
                .json(&json!({ "function_arn": function_arn, "input": input })),
            GatewayCall::RemoveTargets {
                rule_name,
                target_id,
            } => self.request(
                Method::DELETE,
                &format!("/v1/rules/{rule_name}/targets/{target_id}"),
            ),
            GatewayCall::RequestFleet { token, spec } => self
                .request(Method::POST, "/v1/fleets")
                .header(IDEMPOTENCY_KEY_HEADER, token)
                .json(spec),
            GatewayCall::CancelFleet { fleet_id } => {
                self.request(Method::DELETE, &format!("/v1/fleets/{fleet_id}"))
            }
            GatewayCall::DescribeFleet { fleet_id } => {
                self.request(Method::GET, &format!("/v1/fleets/{fleet_id}"))
            }
        }
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn classify_status(status: StatusCode, mutating: bool) -> ErrorClass {
    match status.as_u16() {
        404 => ErrorClass::NotFound,
        408 | 429 | 502 | 503 => ErrorClass::Retryable,
        500 | 504 if mutating => ErrorClass::MustVerify,
        500 | 504 => ErrorClass::Retryable,
        _ if status.is_client_error() => ErrorClass::Rejected,
        _ if mutating => ErrorClass::MustVerify,
        _ => ErrorClass::Retryable,
    }
}

/// Classify a transport failure.
fn classify_transport(error: &reqwest::Error, mutating: bool) -> ErrorClass {
    if error.is_connect() || error.is_builder() {
        // Never reached the service.
        ErrorClass::Retryable
    } else if mutating {
        ErrorClass::MustVerify
    } else {
        ErrorClass::Retryable
    }
}

fn decode_error(call: &GatewayCall, error: impl std::fmt::Display) -> GatewayError {
    // The service acted on the call but the answer was unreadable.
    let class = if call.is_mutating() {
        ErrorClass::MustVerify
    } else {
        ErrorClass::Retryable
    };
    GatewayError::new(class, "MalformedResponse", error.to_string())
}

#[async_trait]
impl CloudApi for HttpCloudApi {
    async fn execute(&self, call: GatewayCall) -> Result<GatewayReply, GatewayError> {
        let mutating = call.is_mutating();
        let kind = call.kind();
        debug!(?kind, "Sending cloud API request");

        let response = self.build(&call).send().await.map_err(|e| {
            GatewayError::new(classify_transport(&e, mutating), "Transport", e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(GatewayError::new(
                classify_status(status, mutating),
                parsed.code.unwrap_or_else(|| status.as_u16().to_string()),
                parsed.message.unwrap_or(body),
            ));
        }

        match &call {
            GatewayCall::DescribeFunction { .. } => {
                let body: FunctionBody = response.json().await.map_err(|e| decode_error(&call, e))?;
                Ok(GatewayReply::Function {
                    arn: body.arn,
                    code_sha256: body.code_sha256,
                })
            }
            GatewayCall::PutRule { .. } => {
                let body: RuleBody = response.json().await.map_err(|e| decode_error(&call, e))?;
                Ok(GatewayReply::RuleCreated {
                    rule_arn: body.rule_arn,
                })
            }
            GatewayCall::PutTargets { .. } => Ok(GatewayReply::TargetsPut),
            GatewayCall::RequestFleet { .. } => {
                let body: FleetRequestBody =
                    response.json().await.map_err(|e| decode_error(&call, e))?;
                Ok(GatewayReply::FleetRequested {
                    fleet_id: body.fleet_id,
                })
            }
            GatewayCall::DescribeFleet { .. } => {
                let body: FleetStatus = response.json().await.map_err(|e| decode_error(&call, e))?;
                Ok(GatewayReply::Fleet(body))
            }
            GatewayCall::DeleteRule { .. }
            | GatewayCall::RemoveTargets { .. }
            | GatewayCall::CancelFleet { .. } => Ok(GatewayReply::Deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(404, true, ErrorClass::NotFound)]
    #[case(404, false, ErrorClass::NotFound)]
    #[case(429, true, ErrorClass::Retryable)]
    #[case(503, true, ErrorClass::Retryable)]
    #[case(500, true, ErrorClass::MustVerify)]
    #[case(500, false, ErrorClass::Retryable)]
    #[case(504, true, ErrorClass::MustVerify)]
    #[case(400, true, ErrorClass::Rejected)]
    #[case(403, false, ErrorClass::Rejected)]
    #[case(409, true, ErrorClass::Rejected)]
    fn test_classify_status(
        #[case] status: u16,
        #[case] mutating: bool,
        #[case] expected: ErrorClass,
    ) {
        let status = StatusCode::from_u16(status).unwrap();
        assert_eq!(classify_status(status, mutating), expected);
    }
}
