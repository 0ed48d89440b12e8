use super::CustomResource;
use crate::{
    config::Settings,
    error::RuntimeError,
    event::{from_flag, from_list},
    grants::{RedshiftGrants, Selector},
    reconcile::{ClusterPolicy, ClusterReconciler},
    redshift::ClusterApi,
    sql::{RedshiftDataConnector, SqlConnector},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

fn default_read_only_user() -> String {
    "selectstar".into()
}

/// `ResourceProperties` of the Redshift resource
#[derive(Debug, Deserialize)]
pub struct RedshiftProperties {
    /// IAM role attached to the cluster
    #[serde(rename = "RedshiftRole")]
    pub redshift_role: String,
    /// Cluster identifier
    #[serde(rename = "Cluster")]
    pub cluster: String,
    /// Bucket receiving the audit logs
    #[serde(rename = "Bucket", default)]
    pub bucket: Option<String>,
    /// Databases to grant, `*` for every local database
    #[serde(rename = "Db", deserialize_with = "from_list")]
    pub db: Vec<String>,
    /// Database user the Data API authenticates as
    #[serde(rename = "DbUser")]
    pub db_user: String,
    /// Allow enabling audit logging
    #[serde(rename = "ConfigureS3Logging", deserialize_with = "from_flag", default)]
    pub configure_s3_logging: bool,
    /// Allow rebooting the cluster
    #[serde(
        rename = "ConfigureS3LoggingRestart",
        deserialize_with = "from_flag",
        default
    )]
    pub configure_s3_logging_restart: bool,
    /// Read-only user to create
    #[serde(rename = "ReadOnlyUser", default = "default_read_only_user")]
    pub read_only_user: String,
}

impl RedshiftProperties {
    fn databases(&self) -> Result<Vec<Selector>, RuntimeError> {
        self.db
            .iter()
            .map(|db| {
                db.parse()
                    .map_err(|_| RuntimeError::invalid_property("Db", format!("invalid database '{db}'")))
            })
            .collect()
    }
}

/// Opens SQL sessions on a cluster as a database user.
pub trait ClusterSql: Send + Sync {
    /// Connector type
    type Connector: SqlConnector;

    /// Connector running statements on `cluster` as `db_user`.
    fn connector(&self, cluster: &str, db_user: &str) -> Self::Connector;
}

/// SQL through the Redshift Data API.
pub struct DataApi {
    config: aws_types::SdkConfig,
    poll: Duration,
}

impl DataApi {
    /// Keep the configuration used to build the Data API clients.
    pub fn new(config: &aws_types::SdkConfig, poll: Duration) -> DataApi {
        DataApi {
            config: config.clone(),
            poll,
        }
    }
}

impl ClusterSql for DataApi {
    type Connector = RedshiftDataConnector;

    fn connector(&self, cluster: &str, db_user: &str) -> RedshiftDataConnector {
        RedshiftDataConnector::new(&self.config, cluster, db_user, self.poll)
    }
}

/// Audit logging and read-only access on a Redshift cluster.
pub struct RedshiftHandler<A, S> {
    redshift: A,
    sql: S,
    settings: Settings,
}

impl<A: ClusterApi, S: ClusterSql> RedshiftHandler<A, S> {
    /// Build the handler.
    pub fn new(redshift: A, sql: S, settings: Settings) -> Self {
        RedshiftHandler {
            redshift,
            sql,
            settings,
        }
    }

    fn reconciler<'a>(&'a self, properties: &'a RedshiftProperties) -> ClusterReconciler<'a, A> {
        let policy = ClusterPolicy {
            configure_s3_logging: properties.configure_s3_logging,
            allow_restart: properties.configure_s3_logging_restart,
        };
        ClusterReconciler::new(
            &self.redshift,
            &properties.cluster,
            &properties.redshift_role,
            properties.bucket.as_deref(),
            policy,
            &self.settings.wait,
        )
    }
}

#[async_trait]
impl<A: ClusterApi, S: ClusterSql> CustomResource for RedshiftHandler<A, S> {
    type Properties = RedshiftProperties;

    #[tracing::instrument(skip_all, fields(cluster = %properties.cluster))]
    async fn apply(&self, properties: RedshiftProperties) -> Result<Value, RuntimeError> {
        let databases = properties.databases()?;

        let bucket = self.reconciler(&properties).reconcile().await?;
        tracing::info!("cluster configured");

        let connector = self.sql.connector(&properties.cluster, &properties.db_user);
        let granted = RedshiftGrants::new(&connector, &properties.read_only_user)
            .provision(&databases)
            .await?;
        tracing::info!(?granted, "access granted");

        Ok(json!({ "LoggingBucket": bucket }))
    }

    #[tracing::instrument(skip_all, fields(cluster = %properties.cluster))]
    async fn remove(&self, properties: RedshiftProperties) -> Result<(), RuntimeError> {
        let databases = properties.databases().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid databases, revoking on every database");
            vec![Selector::All]
        });

        let connector = self.sql.connector(&properties.cluster, &properties.db_user);
        if let Err(err) = RedshiftGrants::new(&connector, &properties.read_only_user)
            .teardown(&databases)
            .await
        {
            tracing::warn!(error = %err, "failed to revoke access");
        }

        if let Err(err) = self.reconciler(&properties).remove_iam_role().await {
            tracing::warn!(error = %err, "failed to detach IAM role");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{dispatch::ResponseStatus, handlers::process, test_util::*};

    struct FakeSql {
        cluster: FakePostgres,
    }

    impl ClusterSql for FakeSql {
        type Connector = FakePostgres;

        fn connector(&self, _cluster: &str, _db_user: &str) -> FakePostgres {
            self.cluster.clone()
        }
    }

    fn handler(cluster: &FakePostgres) -> RedshiftHandler<FakeRedshift, FakeSql> {
        RedshiftHandler::new(
            FakeRedshift::new(default_cluster()),
            FakeSql {
                cluster: cluster.clone(),
            },
            Settings::default(),
        )
    }

    fn payload(request_type: &str, configure: bool) -> Value {
        json!({
            "RequestType": request_type,
            "ResponseURL": "https://cloudformation-custom-resource-response.s3.amazonaws.com/signed",
            "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/selectstar/1",
            "RequestId": "d2b1f7e0-1c5e-4c8f-9f1a-1a2b3c4d5e6f",
            "LogicalResourceId": "Provision",
            "ResourceType": "Custom::Provision",
            "PhysicalResourceId": "2024/01/01/[$LATEST]abcdef",
            "ResourceProperties": {
                "RedshiftRole": ROLE,
                "Cluster": CLUSTER,
                "Bucket": LOG_BUCKET,
                "Db": "*",
                "DbUser": "awsuser",
                "ConfigureS3Logging": configure,
                "ConfigureS3LoggingRestart": configure,
                "ReadOnlyUser": READER,
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_create() -> Result<(), RuntimeError> {
        // GIVEN a cluster with two local databases
        let cluster = FakePostgres::new(&[("dev", &["public"]), ("sales", &["public"])]);
        let handler = handler(&cluster);

        // WHEN creating the resource
        let (_, response) = process(&handler, payload("Create", true), "log-stream").await?;

        // THEN the logging bucket is reported
        assert_eq!(ResponseStatus::Success, response.status);
        assert_eq!(json!({ "LoggingBucket": LOG_BUCKET }), response.data);
        assert_eq!("2024/01/01/[$LATEST]abcdef", response.physical_resource_id);

        // AND the system views are granted in both databases
        assert_eq!(12, cluster.grants_of(READER).len());
        Ok(())
    }

    #[tokio::test]
    async fn test_logging_not_allowed() -> Result<(), RuntimeError> {
        let cluster = FakePostgres::new(&[("dev", &["public"])]);
        let handler = handler(&cluster);

        let (_, response) = process(&handler, payload("Create", false), "log-stream").await?;

        assert_eq!(ResponseStatus::Failed, response.status);
        assert!(response.reason.starts_with("Configure logging failed."));
        assert!(!cluster.has_user(READER));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_after_create() -> Result<(), RuntimeError> {
        let cluster = FakePostgres::new(&[("dev", &["public"]), ("sales", &["public"])]);
        let handler = handler(&cluster);
        process(&handler, payload("Create", true), "log-stream").await?;

        let (_, response) = process(&handler, payload("Delete", true), "log-stream").await?;

        assert_eq!(ResponseStatus::Success, response.status);
        assert!(cluster.grants_of(READER).is_empty());
        assert!(!cluster.has_user(READER));
        assert!(handler.redshift.state().iam_roles.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_failures_are_warnings() -> Result<(), RuntimeError> {
        let cluster = FakePostgres::new(&[("dev", &["public"])]);
        let handler = handler(&cluster);
        handler.redshift.update(|s| s.identifier = "another-cluster".into());

        let (_, response) = process(&handler, payload("Delete", true), "log-stream").await?;

        assert_eq!(ResponseStatus::Success, response.status);
        Ok(())
    }
}
