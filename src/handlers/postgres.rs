use super::CustomResource;
use crate::{
    config::Settings,
    error::RuntimeError,
    event::{from_flag, from_list},
    grants::{parse_targets, PostgresGrants},
    network::{with_temporary_ingress, IngressApi, IngressRule},
    rds::InstanceApi,
    reconcile::{InstanceEndpoint, InstancePolicy, InstanceReconciler},
    secrets::{fetch_principal, Principal},
    sql::{PgConnector, SqlConnector},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// `ResourceProperties` of the RDS for PostgreSQL resource
#[derive(Deserialize)]
pub struct PostgresProperties {
    /// DB instance identifier
    #[serde(rename = "ServerName")]
    pub server_name: String,
    /// `database.schema` targets, `*` allowed in both parts
    #[serde(rename = "Schema", deserialize_with = "from_list")]
    pub schema: Vec<String>,
    /// Admin user
    #[serde(rename = "DbUser")]
    pub db_user: String,
    /// Admin password
    #[serde(rename = "DbPassword")]
    pub db_password: String,
    /// Secret holding the read-only principal
    #[serde(rename = "secretArn")]
    pub secret_arn: String,
    /// Allow changing the logging configuration
    #[serde(rename = "ConfigureLogging", deserialize_with = "from_flag", default)]
    pub configure_logging: bool,
    /// Allow rebooting the instance
    #[serde(
        rename = "ConfigureLoggingRestart",
        deserialize_with = "from_flag",
        default
    )]
    pub configure_logging_restart: bool,
}

/// Principal credentials and SQL connections of the RDS for PostgreSQL resource
#[async_trait]
pub trait PostgresBackend: Send + Sync {
    /// Connector type
    type Connector: SqlConnector;

    /// Credentials of the read-only principal.
    async fn principal(&self, secret_arn: &str) -> Result<Principal, RuntimeError>;

    /// Connector logging in to `endpoint` as the admin user.
    fn connector(
        &self,
        endpoint: &InstanceEndpoint,
        user: &str,
        password: &str,
    ) -> Result<Self::Connector, RuntimeError>;
}

/// Secrets Manager and direct PostgreSQL connections.
pub struct AwsPostgres {
    secrets: aws_sdk_secretsmanager::Client,
    connect_timeout: Duration,
}

impl AwsPostgres {
    /// Initialize the Secrets Manager client.
    pub fn new(config: &aws_types::SdkConfig, connect_timeout: Duration) -> AwsPostgres {
        AwsPostgres {
            secrets: aws_sdk_secretsmanager::Client::new(config),
            connect_timeout,
        }
    }
}

#[async_trait]
impl PostgresBackend for AwsPostgres {
    type Connector = PgConnector;

    async fn principal(&self, secret_arn: &str) -> Result<Principal, RuntimeError> {
        fetch_principal(&self.secrets, secret_arn).await
    }

    fn connector(
        &self,
        endpoint: &InstanceEndpoint,
        user: &str,
        password: &str,
    ) -> Result<PgConnector, RuntimeError> {
        PgConnector::new(
            &endpoint.address,
            endpoint.port,
            user,
            password,
            self.connect_timeout,
        )
    }
}

/// Audit logging and read-only access on an RDS for PostgreSQL instance.
pub struct PostgresHandler<R, N, B> {
    rds: R,
    ec2: N,
    backend: B,
    settings: Settings,
}

impl<R, N, B> PostgresHandler<R, N, B>
where
    R: InstanceApi,
    N: IngressApi,
    B: PostgresBackend,
{
    /// Build the handler.
    pub fn new(rds: R, ec2: N, backend: B, settings: Settings) -> Self {
        PostgresHandler {
            rds,
            ec2,
            backend,
            settings,
        }
    }

    fn ingress(&self, endpoint: &InstanceEndpoint) -> Option<IngressRule> {
        self.settings.ingress_cidr.as_ref().map(|cidr| IngressRule {
            group_id: endpoint.security_group_id.clone(),
            cidr: cidr.clone(),
            port: endpoint.port,
        })
    }

    fn reconciler<'a>(&'a self, properties: &'a PostgresProperties) -> InstanceReconciler<'a, R> {
        let policy = InstancePolicy {
            configure_logging: properties.configure_logging,
            allow_restart: properties.configure_logging_restart,
        };
        InstanceReconciler::new(&self.rds, &properties.server_name, policy, &self.settings.wait)
    }
}

#[async_trait]
impl<R, N, B> CustomResource for PostgresHandler<R, N, B>
where
    R: InstanceApi,
    N: IngressApi,
    B: PostgresBackend,
{
    type Properties = PostgresProperties;

    #[tracing::instrument(skip_all, fields(instance = %properties.server_name))]
    async fn apply(&self, properties: PostgresProperties) -> Result<Value, RuntimeError> {
        let targets = parse_targets(&properties.schema)?;

        let endpoint = self.reconciler(&properties).reconcile().await?;
        tracing::info!("instance configured");

        let principal = self.backend.principal(&properties.secret_arn).await?;
        let connector =
            self.backend
                .connector(&endpoint, &properties.db_user, &properties.db_password)?;
        let grants = PostgresGrants::new(&connector, &principal);

        let rule = self.ingress(&endpoint);
        let granted = with_temporary_ingress(&self.ec2, rule.as_ref(), grants.provision(&targets)).await?;
        tracing::info!(databases = granted.len(), "access granted");

        Ok(json!({
            "EndpointPort": endpoint.port.to_string(),
            "SecurityGroupId": endpoint.security_group_id,
        }))
    }

    #[tracing::instrument(skip_all, fields(instance = %properties.server_name))]
    async fn remove(&self, properties: PostgresProperties) -> Result<(), RuntimeError> {
        let endpoint = match self.reconciler(&properties).ensure_valid_instance().await {
            Err(err) if err.is_policy_violation() => {
                tracing::warn!(error = %err, "instance can't be reached, nothing to revoke");
                return Ok(());
            }
            res => res?,
        };

        let principal = self.backend.principal(&properties.secret_arn).await?;
        let connector =
            self.backend
                .connector(&endpoint, &properties.db_user, &properties.db_password)?;
        let grants = PostgresGrants::new(&connector, &principal);

        let rule = self.ingress(&endpoint);
        with_temporary_ingress(&self.ec2, rule.as_ref(), grants.teardown()).await?;
        tracing::info!("access revoked");
        Ok(())
    }
}
