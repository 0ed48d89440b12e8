use crate::{
    error::RuntimeError,
    event::{CustomResourceEvent, RequestType},
};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{json, Value};

/// Terminal outcome reported to CloudFormation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    /// The lifecycle step completed
    Success,
    /// The lifecycle step failed, CloudFormation rolls the stack back
    Failed,
}

/// Body PUT to the event's `ResponseURL`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    /// Outcome of the invocation
    pub status: ResponseStatus,
    /// Human readable explanation, shown in the stack events
    pub reason: String,
    /// Id CloudFormation stores for the resource
    pub physical_resource_id: String,
    /// Copied from the request
    pub stack_id: String,
    /// Copied from the request
    pub request_id: String,
    /// Copied from the request
    pub logical_resource_id: String,
    /// Whether `Data` must be masked by CloudFormation
    pub no_echo: bool,
    /// Output attributes, readable with `Fn::GetAtt`
    pub data: Value,
}

impl CustomResourceResponse {
    fn new<P>(
        event: &CustomResourceEvent<P>,
        log_stream: &str,
        status: ResponseStatus,
        reason: String,
        data: Value,
    ) -> Self {
        CustomResourceResponse {
            status,
            reason,
            physical_resource_id: event
                .physical_resource_id
                .clone()
                .unwrap_or_else(|| log_stream.to_owned()),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data,
        }
    }

    /// Successful response carrying the output attributes.
    pub fn success<P>(event: &CustomResourceEvent<P>, log_stream: &str, data: Value) -> Self {
        let reason = format!("{} complete", event.request_type);
        Self::new(event, log_stream, ResponseStatus::Success, reason, data)
    }

    /// Failed response. Policy violations are explained to the caller,
    /// anything else only points at the logs.
    pub fn failure<P>(event: &CustomResourceEvent<P>, log_stream: &str, err: &RuntimeError) -> Self {
        let reason = if err.is_policy_violation() {
            format!("{err}. See the details in CloudWatch Log Stream: {log_stream}")
        } else {
            format!("Something failed. See the details in CloudWatch Log Stream: {log_stream}")
        };
        Self::new(event, log_stream, ResponseStatus::Failed, reason, json!({}))
    }
}

/// Map the outcome of a lifecycle step to exactly one response.
pub fn respond<P>(
    event: &CustomResourceEvent<P>,
    log_stream: &str,
    outcome: Result<Value, RuntimeError>,
) -> CustomResourceResponse {
    match outcome {
        Ok(data) => CustomResourceResponse::success(event, log_stream, data),
        Err(err) => {
            if err.is_policy_violation() {
                tracing::error!(error = %err, request_type = %event.request_type, "custom resource rejected");
            } else {
                tracing::error!(error = ?err, request_type = %event.request_type, "custom resource failed");
            }
            CustomResourceResponse::failure(event, log_stream, &err)
        }
    }
}

/// Output attributes returned after a Delete.
pub fn delete_complete() -> Value {
    json!({ "Data": "Delete complete" })
}

/// `true` when the request only tears the resource down.
pub fn is_delete<P>(event: &CustomResourceEvent<P>) -> bool {
    event.request_type == RequestType::Delete
}

/// Deliver the response to CloudFormation.
#[tracing::instrument(skip(client, url, response), fields(status = ?response.status))]
pub async fn send_response(
    client: &reqwest::Client,
    url: &str,
    response: &CustomResourceResponse,
) -> Result<(), RuntimeError> {
    let body = serde_json::to_string(response)?;
    tracing::info!(reason = %response.reason, "sending custom resource response");

    // the pre-signed URL is signed without a content type
    client
        .put(url)
        .header(CONTENT_TYPE, "")
        .body(body)
        .send()
        .await?
        .error_for_status()?;

    Ok(())
}
