use super::tolerate_existing;
use crate::{error::RuntimeError, rds::InstanceApi, retry::WaitPolicy};

/// Parameters that make PostgreSQL log every statement with its duration.
pub const LOGGING_PARAMETERS: [(&str, &str); 2] = [
    ("log_statement", "all"),
    ("log_min_duration_statement", "0"),
];

/// Log type exported to CloudWatch Logs.
pub const POSTGRES_LOG_EXPORT: &str = "postgresql";

const PARAMETER_GROUP_DESCRIPTION: &str =
    "Created via CloudFormation. Enables logging queries to CloudWatch.";

/// Changes the caller allows the reconciler to make.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstancePolicy {
    /// Create/attach a parameter group, set parameters and enable log exports
    pub configure_logging: bool,
    /// Reboot the instance to apply pending changes
    pub allow_restart: bool,
}

/// Where and how to reach a validated instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceEndpoint {
    /// Endpoint host name
    pub address: String,
    /// Endpoint port
    pub port: u16,
    /// Active VPC security group
    pub security_group_id: String,
}

/// Converges an RDS for PostgreSQL instance to the audit logging configuration.
pub struct InstanceReconciler<'a, A> {
    api: &'a A,
    instance: &'a str,
    policy: InstancePolicy,
    wait: &'a WaitPolicy,
}

impl<'a, A: InstanceApi> InstanceReconciler<'a, A> {
    /// Build a reconciler for one instance.
    pub fn new(api: &'a A, instance: &'a str, policy: InstancePolicy, wait: &'a WaitPolicy) -> Self {
        InstanceReconciler {
            api,
            instance,
            policy,
            wait,
        }
    }

    /// Run every step in order and return the instance endpoint.
    #[tracing::instrument(skip(self), fields(instance = self.instance))]
    pub async fn reconcile(&self) -> Result<InstanceEndpoint, RuntimeError> {
        let endpoint = self.ensure_valid_instance().await?;

        self.ensure_custom_parameter_group().await?;
        tracing::info!("custom parameter group of instance configured");

        for (name, value) in LOGGING_PARAMETERS {
            self.ensure_parameter_set(name, value).await?;
        }
        tracing::info!("custom parameter group configured");

        self.ensure_log_export_enabled().await?;
        tracing::info!("log exporting configured");

        self.ensure_instance_restarted().await?;
        tracing::info!("instance restarted if allowed");

        Ok(endpoint)
    }

    /// The instance must exist, run PostgreSQL and be publicly accessible.
    pub async fn ensure_valid_instance(&self) -> Result<InstanceEndpoint, RuntimeError> {
        let state = match self.api.describe_instance(self.instance).await {
            Err(err) if err.aws_code() == Some("DBInstanceNotFound") => {
                return Err(RuntimeError::policy(format!(
                    "Provisioning failed. DB instance '{}' not found. Verify DB instance name",
                    self.instance
                )))
            }
            res => res?,
        };

        if state.engine != "postgres" {
            return Err(RuntimeError::policy(format!(
                "Unsupported DB engine '{}' - required 'postgres'. Verify engine of DB instance",
                state.engine
            )));
        }
        if !state.publicly_accessible {
            return Err(RuntimeError::policy(
                "Instance must be publicly available. Update the instance configuration and try again",
            ));
        }

        let security_group_id = state
            .active_security_group()
            .ok_or_else(|| RuntimeError::policy("Instance has no active VPC security group"))?
            .to_owned();
        tracing::info!(%security_group_id, "determined security group");

        let (address, port) = match (state.address, state.port) {
            (Some(address), Some(port)) => (address, port),
            _ => {
                return Err(RuntimeError::policy(
                    "Instance endpoint is not available yet. Try again once the instance is created",
                ))
            }
        };
        let port = u16::try_from(port)
            .map_err(|_| RuntimeError::policy(format!("Invalid endpoint port {port}")))?;
        tracing::info!(port, "determined endpoint port");

        Ok(InstanceEndpoint {
            address,
            port,
            security_group_id,
        })
    }

    /// Default parameter groups cannot be modified, so a custom one must be attached.
    pub async fn ensure_custom_parameter_group(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_instance(self.instance).await?;

        if let Some(group) = state.custom_parameter_group() {
            tracing::info!(group, "custom parameter group set already, nothing to do");
            return Ok(());
        }
        if !self.policy.configure_logging {
            return Err(RuntimeError::policy(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or custom parameter group set manually",
            ));
        }

        let family = self
            .api
            .parameter_group_family(&state.engine, &state.engine_version)
            .await?
            .ok_or_else(|| {
                RuntimeError::policy(
                    "Configure logging failed. Unable to determine DB parameter group family for instance",
                )
            })?;

        let group = format!("custom-{}", self.instance);
        tolerate_existing(
            self.api
                .create_parameter_group(&group, &family, PARAMETER_GROUP_DESCRIPTION)
                .await,
            "DBParameterGroupAlreadyExists",
        )?;
        tracing::info!(%group, %family, "parameter group created");

        self.api.attach_parameter_group(self.instance, &group).await?;
        tracing::info!(%group, "parameter group set on instance");

        self.wait_until_available().await
    }

    /// Set `name` to `value` in the instance's custom parameter group.
    pub async fn ensure_parameter_set(&self, name: &str, value: &str) -> Result<(), RuntimeError> {
        let state = self.api.describe_instance(self.instance).await?;
        let group = state.custom_parameter_group().ok_or_else(|| {
            RuntimeError::policy("Configure logging failed. Instance has no custom parameter group")
        })?;

        let current = self.api.parameter_value(group, name).await?;
        if current.as_deref() == Some(value) {
            tracing::info!(name, group, value, "parameter already set, nothing to do");
            return Ok(());
        }
        if !self.policy.configure_logging {
            return Err(RuntimeError::policy(format!(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or manually update parameter '{name}' of parameter group '{group}' to '{value}'"
            )));
        }

        self.api.modify_parameter(group, name, value).await?;
        tracing::info!(name, group, value, "parameter updated, waiting to apply");
        self.wait_until_available().await
    }

    /// PostgreSQL logs must be exported to CloudWatch Logs.
    pub async fn ensure_log_export_enabled(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_instance(self.instance).await?;

        if state.log_exports.iter().any(|t| t == POSTGRES_LOG_EXPORT) {
            tracing::info!("log export configured, nothing to do");
            return Ok(());
        }
        if !self.policy.configure_logging {
            return Err(RuntimeError::policy(
                "Configure logging failed. Setup logging must be accepted in CloudFormation or exporting to CloudWatch enabled manually",
            ));
        }

        self.api
            .enable_log_export(self.instance, POSTGRES_LOG_EXPORT)
            .await?;
        tracing::info!("exporting to CloudWatch enabled, waiting to apply");
        self.wait_until_available().await
    }

    /// Reboot when changes are pending. Without permission the changes are left
    /// for the next maintenance window and only a warning is logged.
    pub async fn ensure_instance_restarted(&self) -> Result<(), RuntimeError> {
        let state = self.api.describe_instance(self.instance).await?;

        if !state.pending_modifications && !state.pending_reboot() {
            tracing::info!("no pending modifications, nothing to do");
            return Ok(());
        }
        if !self.policy.allow_restart {
            tracing::warn!(
                "pending modifications, they will probably be applied during the next maintenance window"
            );
            return Ok(());
        }

        tracing::info!("instance requires reboot");
        self.api.reboot_instance(self.instance).await?;
        self.wait_until_available().await?;
        tracing::info!("instance started after reboot");
        Ok(())
    }

    /// Block until the instance reports `available`.
    pub async fn wait_until_available(&self) -> Result<(), RuntimeError> {
        let api = self.api;
        let instance = self.instance;
        self.wait
            .until(instance, move || async move {
                Ok(api.describe_instance(instance).await?.is_available())
            })
            .await
    }
}
