use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use selectstar_provisioner::handlers::{handle, CopyHandler, S3Store};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Error> {
    selectstar_provisioner::init_tracing();

    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let handler = CopyHandler::new(S3Store::new(&config));
    let http = reqwest::Client::new();

    let (handler, http) = (&handler, &http);
    run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle(handler, http, event).await.map_err(Error::from)
    }))
    .await
}
