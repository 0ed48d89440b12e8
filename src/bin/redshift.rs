use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use selectstar_provisioner::{
    handlers::{handle, DataApi, RedshiftHandler},
    redshift::RedshiftClient,
    Settings,
};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Error> {
    selectstar_provisioner::init_tracing();

    // Get AWS Configuration
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let settings = Settings::from_env()?;

    let handler = RedshiftHandler::new(
        RedshiftClient::new(&config),
        DataApi::new(&config, settings.statement_poll),
        settings,
    );
    let http = reqwest::Client::new();

    let (handler, http) = (&handler, &http);
    run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle(handler, http, event).await.map_err(Error::from)
    }))
    .await
}
