//! CloudFormation custom resources served by the Lambda functions.
//!
//! Every invocation ends with exactly one response PUT to the event's
//! `ResponseURL`, whatever happened while running the lifecycle step.

use crate::{
    dispatch::{delete_complete, is_delete, respond, send_response, CustomResourceResponse},
    error::RuntimeError,
    event::{redacted, CustomResourceEvent},
};
use async_trait::async_trait;
use lambda_runtime::LambdaEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod copy;
pub mod postgres;
pub mod prefix;
pub mod redshift;

pub use copy::{CopyHandler, S3Store};
pub use postgres::{AwsPostgres, PostgresHandler};
pub use prefix::PrefixHandler;
pub use redshift::{DataApi, RedshiftHandler};

/// A custom resource type and its lifecycle steps
#[async_trait]
pub trait CustomResource: Send + Sync {
    /// `ResourceProperties` of the resource
    type Properties: DeserializeOwned + Send + 'static;

    /// Run Create and Update. Returns the output attributes.
    async fn apply(&self, properties: Self::Properties) -> Result<Value, RuntimeError>;

    /// Run Delete.
    async fn remove(&self, properties: Self::Properties) -> Result<(), RuntimeError>;
}

/// Decode the event, run the lifecycle step and build the response.
///
/// Fails only when the payload is not a custom resource event, in which case
/// there is no URL to respond to.
pub async fn process<H: CustomResource + ?Sized>(
    handler: &H,
    payload: Value,
    log_stream: &str,
) -> Result<(CustomResourceEvent<()>, CustomResourceResponse), RuntimeError> {
    let event: CustomResourceEvent<Value> = serde_json::from_value(payload)?;
    let (event, properties) = event.typed::<H::Properties>();

    let outcome = match properties {
        Ok(properties) if is_delete(&event) => handler
            .remove(properties)
            .await
            .map(|_| delete_complete()),
        Ok(properties) => handler.apply(properties).await,
        Err(err) if is_delete(&event) => {
            tracing::warn!(error = %err, "undecodable properties, nothing to delete");
            Ok(delete_complete())
        }
        Err(err) => Err(RuntimeError::invalid_property(
            "ResourceProperties",
            err.to_string(),
        )),
    };

    let response = respond(&event, log_stream, outcome);
    Ok((event, response))
}

/// Lambda entry point shared by every custom resource.
#[tracing::instrument(skip_all, fields(request_id = %event.context.request_id))]
pub async fn handle<H: CustomResource + ?Sized>(
    handler: &H,
    http: &reqwest::Client,
    event: LambdaEvent<Value>,
) -> Result<(), RuntimeError> {
    let log_stream = event.context.env_config.log_stream.clone();
    tracing::info!(event = %redacted(&event.payload), "received custom resource event");

    let (event, response) = process(handler, event.payload, &log_stream).await?;
    send_response(http, &event.response_url, &response).await
}
