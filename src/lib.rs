#![deny(missing_docs)]
//! <fullname>Database audit logging provisioner</fullname>
//!
//! CloudFormation custom resources, each served by its own Lambda
//! function. They enable audit logging on RDS for PostgreSQL instances and
//! Redshift clusters, give a read-only user access to the database catalogs,
//! and copy deployment artifacts between S3 buckets. A Firehose
//! transformation decrypts and filters RDS Database Activity Streams.

mod config;
pub use config::{DasSettings, Settings};

pub mod das;

mod dispatch;
pub use dispatch::{CustomResourceResponse, ResponseStatus};

mod error;
pub use error::RuntimeError;

mod event;
pub use event::{CustomResourceEvent, RequestType};

pub mod grants;

pub mod handlers;

/// `network` opens temporary security group ingress around SQL work
pub mod network;

/// `rds` reads and changes RDS DB instances
pub mod rds;

pub mod reconcile;

/// `redshift` reads and changes Redshift clusters
pub mod redshift;

/// `retry` holds the backoff and polling policies
pub mod retry;

mod secrets;
pub use secrets::Principal;

pub mod sql;

#[cfg(test)]
mod test_util;

/// Send `tracing` events to stdout, where Lambda forwards them to CloudWatch Logs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();
}
