use aws_config::BehaviorVersion;
use aws_lambda_events::firehose::KinesisFirehoseEvent;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use selectstar_provisioner::{
    das::{DasProcessor, KmsClient},
    DasSettings,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    selectstar_provisioner::init_tracing();

    // Get AWS Configuration
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let settings = DasSettings::from_env()?;

    let processor = DasProcessor::new(KmsClient::new(&config, &settings.kms_key_arn), &settings);

    let processor = &processor;
    run(service_fn(move |event: LambdaEvent<KinesisFirehoseEvent>| async move {
        processor.process(event.payload).await.map_err(Error::from)
    }))
    .await
}
