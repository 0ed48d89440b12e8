use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use selectstar_provisioner::handlers::{handle, PrefixHandler};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Error> {
    selectstar_provisioner::init_tracing();

    let http = reqwest::Client::new();
    let http = &http;
    run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle(&PrefixHandler, http, event).await.map_err(Error::from)
    }))
    .await
}
