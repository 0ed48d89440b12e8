//! Kinesis Data Firehose transformation for encrypted RDS Database Activity
//! Streams. Each record set is decrypted, stripped of heartbeats and
//! excluded events, then handed back to Firehose gzipped.
/// Activity event filtering
pub mod filter;
pub mod message;

use crate::{config::DasSettings, error::RuntimeError};
use async_trait::async_trait;
use aws_lambda_events::{
    encodings::Base64Data,
    firehose::{
        KinesisFirehoseEvent, KinesisFirehoseEventRecord, KinesisFirehoseResponse,
        KinesisFirehoseResponseRecord, KinesisFirehoseResponseRecordMetadata,
    },
};
use aws_sdk_kms::{config::Region, primitives::Blob};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, io::Read};

/// KMS encryption context of an activity stream data key
pub type EncryptionContext = HashMap<String, String>;

/// Encryption context RDS uses for the data keys of `resource_id`: instance
/// resource ids start with `db-`, anything else is an Aurora cluster.
pub fn encryption_context(resource_id: &str) -> EncryptionContext {
    let field = if resource_id.starts_with("db-") {
        "aws:rds:db-id"
    } else {
        "aws:rds:dbc-id"
    };
    HashMap::from([(field.to_string(), resource_id.to_string())])
}

/// Decrypts the per-record data keys of an activity stream.
#[async_trait]
pub trait DataKeyApi: Send + Sync {
    /// Return the plaintext of an encrypted data key.
    async fn decrypt_data_key(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, RuntimeError>;
}

/// `KmsClient` decrypts data keys with the activity stream KMS key
pub struct KmsClient {
    client: aws_sdk_kms::Client,
}

impl KmsClient {
    /// Build a client for the region of `key_arn`, which can differ from the function's region.
    pub fn new(config: &aws_types::SdkConfig, key_arn: &str) -> KmsClient {
        let mut builder = aws_sdk_kms::config::Builder::from(config);
        if let Some(region) = key_arn.split(':').nth(3).filter(|r| !r.is_empty()) {
            builder = builder.region(Region::new(region.to_string()));
        }
        KmsClient {
            client: aws_sdk_kms::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl DataKeyApi for KmsClient {
    #[tracing::instrument(skip(self, ciphertext))]
    async fn decrypt_data_key(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut request = self.client.decrypt().ciphertext_blob(Blob::new(ciphertext));
        for (key, value) in context {
            request = request.encryption_context(key, value);
        }
        let out = request.send().await?;

        out.plaintext()
            .map(|key| key.as_ref().to_vec())
            .ok_or_else(|| RuntimeError::Decrypt("KMS returned no plaintext data key".into()))
    }
}

// Firehose record payload as written by the activity stream
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRecord {
    database_activity_events: String,
    key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackedRecord {
    database_activity_events: String,
}

/// Firehose record results
const OK: &str = "Ok";
const DROPPED: &str = "Dropped";
const PROCESSING_FAILED: &str = "ProcessingFailed";

/// `DasProcessor` transforms the Firehose batches of one activity stream
pub struct DasProcessor<K> {
    kms: K,
    context: EncryptionContext,
}

impl<K: DataKeyApi> DasProcessor<K> {
    /// Create a processor for the stream of `settings.rds_resource_id`.
    pub fn new(kms: K, settings: &DasSettings) -> DasProcessor<K> {
        DasProcessor {
            kms,
            context: encryption_context(&settings.rds_resource_id),
        }
    }

    /// Transform a Firehose batch, one result per record id.
    ///
    /// A record that can't be decoded or decrypted is `ProcessingFailed`. A KMS
    /// API error fails the whole batch, so Firehose retries it.
    pub async fn process(
        &self,
        event: KinesisFirehoseEvent,
    ) -> Result<KinesisFirehoseResponse, RuntimeError> {
        let mut records = Vec::with_capacity(event.records.len());
        for record in event.records {
            records.push(self.process_record(record).await?);
        }
        Ok(KinesisFirehoseResponse { records })
    }

    async fn process_record(
        &self,
        record: KinesisFirehoseEventRecord,
    ) -> Result<KinesisFirehoseResponseRecord, RuntimeError> {
        let (result, data) = match self.transform(&record.data.0).await {
            Ok(Some(data)) => (OK, data),
            Ok(None) => (DROPPED, Vec::new()),
            Err(err @ RuntimeError::Aws { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(record_id = ?record.record_id, error = %err, "failed to process activity record");
                (PROCESSING_FAILED, Vec::new())
            }
        };

        Ok(KinesisFirehoseResponseRecord {
            record_id: record.record_id,
            result: Some(result.to_string()),
            data: Base64Data(data),
            metadata: KinesisFirehoseResponseRecordMetadata::default(),
        })
    }

    async fn transform(&self, data: &[u8]) -> Result<Option<Vec<u8>>, RuntimeError> {
        let record: ActivityRecord = serde_json::from_slice(data)?;
        let payload = BASE64.decode(&record.database_activity_events)?;
        let encrypted_key = BASE64.decode(&record.key)?;

        let data_key = self.kms.decrypt_data_key(&encrypted_key, &self.context).await?;
        let compressed = message::decrypt(&data_key, &payload)?;

        let mut json = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut json)?;
        let record_set: Value = serde_json::from_slice(&json)?;

        let Some(pruned) = filter::prune(record_set) else {
            return Ok(None);
        };
        tracing::info!(
            received = pruned.received,
            kept = pruned.kept,
            "filtered activity events"
        );

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, &pruned.record)?;
        let packed = PackedRecord {
            database_activity_events: BASE64.encode(encoder.finish()?),
        };
        Ok(Some(serde_json::to_vec(&packed)?))
    }
}
