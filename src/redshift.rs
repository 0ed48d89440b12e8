use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_redshift::{
    types::{Cluster, LogDestinationType, Parameter},
    Client,
};

/// Parameter group attached to a cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterParameterGroupState {
    /// Parameter group name
    pub name: String,
    /// Parameters with a non-trivial apply status as `(name, apply status)`
    pub parameters: Vec<(String, String)>,
}

/// Snapshot of a Redshift cluster, re-read before every reconciliation step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterState {
    /// Cluster identifier
    pub identifier: String,
    /// Cluster status, e.g. `available` or `modifying`
    pub status: String,
    /// Attached parameter groups
    pub parameter_groups: Vec<ClusterParameterGroupState>,
    /// ARNs of the attached IAM roles
    pub iam_roles: Vec<String>,
}

impl ClusterState {
    /// Name of the first attached parameter group.
    pub fn parameter_group(&self) -> Option<&str> {
        self.parameter_groups.first().map(|g| g.name.as_str())
    }

    /// Whether `parameter` waits for a reboot to be applied.
    pub fn pending_reboot(&self, parameter: &str) -> bool {
        self.parameter_groups
            .iter()
            .flat_map(|g| g.parameters.iter())
            .any(|(name, apply)| name == parameter && apply == "pending-reboot")
    }

    /// Whether the cluster accepts new modifications.
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

impl From<&Cluster> for ClusterState {
    fn from(cluster: &Cluster) -> Self {
        ClusterState {
            identifier: cluster.cluster_identifier().unwrap_or_default().to_owned(),
            status: cluster.cluster_status().unwrap_or_default().to_owned(),
            parameter_groups: cluster
                .cluster_parameter_groups()
                .iter()
                .map(|g| ClusterParameterGroupState {
                    name: g.parameter_group_name().unwrap_or_default().to_owned(),
                    parameters: g
                        .cluster_parameter_status_list()
                        .iter()
                        .map(|p| {
                            (
                                p.parameter_name().unwrap_or_default().to_owned(),
                                p.parameter_apply_status().unwrap_or_default().to_owned(),
                            )
                        })
                        .collect(),
                })
                .collect(),
            iam_roles: cluster
                .iam_roles()
                .iter()
                .filter_map(|r| r.iam_role_arn())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Audit logging status of a cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoggingStatus {
    /// Whether audit logging is on
    pub enabled: bool,
    /// Destination bucket, `None` when logs go to CloudWatch
    pub bucket: Option<String>,
}

/// Read and change the configuration of a Redshift cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Describe the cluster.
    async fn describe_cluster(&self, id: &str) -> Result<ClusterState, RuntimeError>;
    /// Attach an IAM role.
    async fn add_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError>;
    /// Detach an IAM role.
    async fn remove_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError>;
    /// Current audit logging status.
    async fn logging_status(&self, id: &str) -> Result<LoggingStatus, RuntimeError>;
    /// Send audit logs to an S3 bucket.
    async fn enable_logging(&self, id: &str, bucket: &str, prefix: &str)
        -> Result<(), RuntimeError>;
    /// Family of an existing parameter group, e.g. `redshift-1.0`.
    async fn parameter_group_family(&self, group: &str) -> Result<Option<String>, RuntimeError>;
    /// Create a cluster parameter group.
    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        description: &str,
    ) -> Result<(), RuntimeError>;
    /// Attach a parameter group to the cluster.
    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError>;
    /// Current value of a parameter.
    async fn parameter_value(&self, group: &str, name: &str)
        -> Result<Option<String>, RuntimeError>;
    /// Set a parameter value.
    async fn modify_parameter(&self, group: &str, name: &str, value: &str)
        -> Result<(), RuntimeError>;
    /// Reboot the cluster.
    async fn reboot_cluster(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Redshift client implementation.
pub struct RedshiftClient {
    inner: Client,
}

impl RedshiftClient {
    /// Initialize the Redshift client.
    pub fn new(config: &aws_types::SdkConfig) -> RedshiftClient {
        RedshiftClient {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl ClusterApi for RedshiftClient {
    #[tracing::instrument(skip(self))]
    async fn describe_cluster(&self, id: &str) -> Result<ClusterState, RuntimeError> {
        let res = self
            .inner
            .describe_clusters()
            .cluster_identifier(id)
            .send()
            .await?;

        res.clusters()
            .first()
            .map(ClusterState::from)
            .ok_or_else(|| RuntimeError::policy(format!("Redshift cluster '{id}' not found")))
    }

    #[tracing::instrument(skip(self))]
    async fn add_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError> {
        self.inner
            .modify_cluster_iam_roles()
            .cluster_identifier(id)
            .add_iam_roles(role)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn remove_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError> {
        self.inner
            .modify_cluster_iam_roles()
            .cluster_identifier(id)
            .remove_iam_roles(role)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn logging_status(&self, id: &str) -> Result<LoggingStatus, RuntimeError> {
        let res = self
            .inner
            .describe_logging_status()
            .cluster_identifier(id)
            .send()
            .await?;

        let enabled: Option<bool> = res.logging_enabled().into();
        // a bucket left over from earlier S3 logging doesn't count
        let to_s3 = !matches!(
            res.log_destination_type(),
            Some(LogDestinationType::Cloudwatch)
        );
        Ok(LoggingStatus {
            enabled: enabled.unwrap_or(false),
            bucket: res
                .bucket_name()
                .filter(|_| to_s3)
                .map(str::to_owned),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn enable_logging(
        &self,
        id: &str,
        bucket: &str,
        prefix: &str,
    ) -> Result<(), RuntimeError> {
        self.inner
            .enable_logging()
            .cluster_identifier(id)
            .bucket_name(bucket)
            .s3_key_prefix(prefix)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn parameter_group_family(&self, group: &str) -> Result<Option<String>, RuntimeError> {
        let res = self
            .inner
            .describe_cluster_parameter_groups()
            .parameter_group_name(group)
            .send()
            .await?;

        Ok(res
            .parameter_groups()
            .iter()
            .find_map(|g| g.parameter_group_family())
            .map(str::to_owned))
    }

    #[tracing::instrument(skip(self))]
    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        description: &str,
    ) -> Result<(), RuntimeError> {
        self.inner
            .create_cluster_parameter_group()
            .parameter_group_name(name)
            .parameter_group_family(family)
            .description(description)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError> {
        self.inner
            .modify_cluster()
            .cluster_identifier(id)
            .cluster_parameter_group_name(group)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn parameter_value(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let mut pages = self
            .inner
            .describe_cluster_parameters()
            .parameter_group_name(group)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page?;
            if let Some(parameter) = page
                .parameters()
                .iter()
                .find(|p| p.parameter_name() == Some(name))
            {
                return Ok(parameter.parameter_value().map(str::to_owned));
            }
        }
        Ok(None)
    }

    #[tracing::instrument(skip(self))]
    async fn modify_parameter(
        &self,
        group: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RuntimeError> {
        let parameter = Parameter::builder()
            .parameter_name(name)
            .parameter_value(value)
            .build();

        self.inner
            .modify_cluster_parameter_group()
            .parameter_group_name(group)
            .parameters(parameter)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reboot_cluster(&self, id: &str) -> Result<(), RuntimeError> {
        self.inner.reboot_cluster().cluster_identifier(id).send().await?;
        Ok(())
    }
}
