use super::tolerate_existing;
use crate::{
    error::RuntimeError,
    redshift::ClusterApi,
    retry::{RetryPolicy, WaitPolicy},
};

/// Parameter that makes Redshift write the user activity log.
pub const USER_ACTIVITY: &str = "enable_user_activity_logging";

const CLUSTER_STATE_CODES: &[&str] = &["InvalidClusterState"];
const PARAMETER_GROUP_STATE_CODES: &[&str] = &["InvalidClusterParameterGroupState"];

const PARAMETER_GROUP_DESCRIPTION: &str =
    "Created via CloudFormation. Enables user activity logging.";

/// Changes the caller allows the reconciler to make.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterPolicy {
    /// Enable S3 audit logging and user activity logging
    pub configure_s3_logging: bool,
    /// Reboot the cluster to apply pending parameters
    pub allow_restart: bool,
}

/// Converges a Redshift cluster to the audit logging configuration.
pub struct ClusterReconciler<'a, A> {
    api: &'a A,
    cluster: &'a str,
    role: &'a str,
    bucket: Option<&'a str>,
    policy: ClusterPolicy,
    wait: &'a WaitPolicy,
}

impl<'a, A: ClusterApi> ClusterReconciler<'a, A> {
    /// Build a reconciler for one cluster. `role` is the IAM role granting
    /// access to the cluster, `bucket` the S3 bucket receiving audit logs.
    pub fn new(
        api: &'a A,
        cluster: &'a str,
        role: &'a str,
        bucket: Option<&'a str>,
        policy: ClusterPolicy,
        wait: &'a WaitPolicy,
    ) -> Self {
        ClusterReconciler {
            api,
            cluster,
            role,
            bucket,
            policy,
            wait,
        }
    }

    /// Run every step in order and return the bucket receiving audit logs.
    #[tracing::instrument(skip(self), fields(cluster = self.cluster))]
    pub async fn reconcile(&self) -> Result<String, RuntimeError> {
        self.ensure_iam_role().await?;
        tracing::info!("IAM role of cluster configured");

        let bucket = self.ensure_logging_enabled().await?;
        tracing::info!(%bucket, "logging of cluster configured");

        self.ensure_custom_parameter_group().await?;
        tracing::info!("custom parameter group of cluster configured");

        self.ensure_user_activity_enabled().await?;
        tracing::info!("user activity logging configured");

        self.ensure_cluster_restarted().await?;
        tracing::info!("cluster restarted if allowed");

        Ok(bucket)
    }

    /// The IAM role must be attached to the cluster.
    pub async fn ensure_iam_role(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_cluster(self.cluster).await?;
        if state.iam_roles.iter().any(|r| r == self.role) {
            tracing::info!(role = self.role, "IAM role attached already, nothing to do");
            return Ok(());
        }

        let (api, cluster, role) = (self.api, self.cluster, self.role);
        RetryPolicy::on_codes(CLUSTER_STATE_CODES)
            .run(move || async move { api.add_iam_role(cluster, role).await })
            .await?;
        tracing::info!(role, "IAM role attached");

        self.wait_until_available().await
    }

    /// Audit logs must be delivered to S3. Returns the bucket in use.
    pub async fn ensure_logging_enabled(&self) -> Result<String, RuntimeError> {
        let status = self.api.logging_status(self.cluster).await?;

        if status.enabled {
            return match status.bucket {
                Some(bucket) => {
                    tracing::info!(%bucket, "logging to S3 enabled already, nothing to do");
                    Ok(bucket)
                }
                None => Err(RuntimeError::policy(
                    "Configure logging failed. Cluster audit logging is enabled to a destination other than S3. Update the logging configuration manually",
                )),
            };
        }
        if !self.policy.configure_s3_logging {
            return Err(RuntimeError::policy(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or audit logging to S3 enabled manually",
            ));
        }

        let bucket = self
            .bucket
            .filter(|b| !b.is_empty())
            .ok_or_else(|| RuntimeError::invalid_property("Bucket", "required to enable logging"))?;
        let prefix = format!("redshift-logs/{}", self.cluster);

        let (api, cluster, prefix_ref) = (self.api, self.cluster, prefix.as_str());
        RetryPolicy::on_codes(CLUSTER_STATE_CODES)
            .run(move || async move { api.enable_logging(cluster, bucket, prefix_ref).await })
            .await?;
        tracing::info!(bucket, %prefix, "logging to S3 enabled");

        self.wait_until_available().await?;
        Ok(bucket.to_owned())
    }

    /// Default parameter groups cannot be modified, so a custom one must be attached.
    pub async fn ensure_custom_parameter_group(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_cluster(self.cluster).await?;
        let current = state
            .parameter_group()
            .ok_or_else(|| RuntimeError::policy("Cluster has no parameter group"))?;

        if !current.starts_with("default.") {
            tracing::info!(group = current, "custom parameter group set already, nothing to do");
            return Ok(());
        }
        if !self.policy.configure_s3_logging {
            return Err(RuntimeError::policy(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or custom parameter group set manually",
            ));
        }

        let family = self
            .api
            .parameter_group_family(current)
            .await?
            .ok_or_else(|| {
                RuntimeError::policy(
                    "Configure logging failed. Unable to determine parameter group family for cluster",
                )
            })?;

        let group = format!("redshift-custom-{}", self.cluster);
        let (api, cluster, group_ref, family_ref) =
            (self.api, self.cluster, group.as_str(), family.as_str());
        let retry = RetryPolicy::on_codes(PARAMETER_GROUP_STATE_CODES);

        tolerate_existing(
            retry
                .run(move || async move {
                    api.create_parameter_group(group_ref, family_ref, PARAMETER_GROUP_DESCRIPTION)
                        .await
                })
                .await,
            "ClusterParameterGroupAlreadyExists",
        )?;
        tracing::info!(%group, %family, "parameter group created");

        retry
            .run(move || async move { api.attach_parameter_group(cluster, group_ref).await })
            .await?;
        tracing::info!(%group, "parameter group set on cluster");

        self.wait_until_available().await
    }

    /// User activity logging must be switched on in the custom parameter group.
    pub async fn ensure_user_activity_enabled(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_cluster(self.cluster).await?;
        let group = state
            .parameter_group()
            .filter(|g| !g.starts_with("default."))
            .ok_or_else(|| {
                RuntimeError::policy("Configure logging failed. Cluster has no custom parameter group")
            })?;

        let current = self.api.parameter_value(group, USER_ACTIVITY).await?;
        if current.as_deref() == Some("true") {
            tracing::info!(group, "user activity logging enabled already, nothing to do");
            return Ok(());
        }
        if !self.policy.configure_s3_logging {
            return Err(RuntimeError::policy(format!(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or manually update parameter '{USER_ACTIVITY}' of parameter group '{group}' to 'true'"
            )));
        }

        let api = self.api;
        RetryPolicy::on_codes(PARAMETER_GROUP_STATE_CODES)
            .run(move || async move { api.modify_parameter(group, USER_ACTIVITY, "true").await })
            .await?;
        tracing::info!(group, "user activity logging enabled");

        self.wait_until_available().await
    }

    /// Reboot when user activity logging waits for it. Without permission the
    /// change is left for the next maintenance window and only a warning is logged.
    pub async fn ensure_cluster_restarted(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_cluster(self.cluster).await?;

        if !state.pending_reboot(USER_ACTIVITY) {
            tracing::info!("no parameter pending reboot, nothing to do");
            return Ok(());
        }
        if !self.policy.allow_restart {
            tracing::warn!(
                "user activity logging pending reboot, it will probably be applied during the next maintenance window"
            );
            return Ok(());
        }

        tracing::info!("cluster requires reboot");
        self.api.reboot_cluster(self.cluster).await?;
        self.wait_until_available().await?;
        tracing::info!("cluster started after reboot");
        Ok(())
    }

    /// Detach the IAM role if it is attached.
    pub async fn remove_iam_role(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_cluster(self.cluster).await?;
        if !state.iam_roles.iter().any(|r| r == self.role) {
            tracing::info!(role = self.role, "IAM role not attached, nothing to do");
            return Ok(());
        }

        let (api, cluster, role) = (self.api, self.cluster, self.role);
        RetryPolicy::on_codes(CLUSTER_STATE_CODES)
            .run(move || async move { api.remove_iam_role(cluster, role).await })
            .await?;
        tracing::info!(role, "IAM role detached");
        Ok(())
    }

    /// Block until the cluster reports `available`.
    pub async fn wait_until_available(&self) -> Result<(), RuntimeError> {
        let api = self.api;
        let cluster = self.cluster;
        self.wait
            .until(cluster, move || async move {
                Ok(api.describe_cluster(cluster).await?.is_available())
            })
            .await
    }
}
