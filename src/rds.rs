use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_rds::{
    types::{
        ApplyMethod, CloudwatchLogsExportConfiguration, DbInstance, Parameter,
        PendingModifiedValues,
    },
    Client,
};

/// Snapshot of an RDS DB instance, re-read before every reconciliation step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceState {
    /// DB instance identifier
    pub identifier: String,
    /// Engine name, e.g. `postgres`
    pub engine: String,
    /// Engine version, e.g. `15.4`
    pub engine_version: String,
    /// Instance status, e.g. `available` or `modifying`
    pub status: String,
    /// Whether the endpoint resolves to a public address
    pub publicly_accessible: bool,
    /// Endpoint host name
    pub address: Option<String>,
    /// Endpoint port
    pub port: Option<i32>,
    /// VPC security groups as `(id, status)`
    pub security_groups: Vec<(String, String)>,
    /// Attached parameter groups as `(name, apply status)`
    pub parameter_groups: Vec<(String, String)>,
    /// Log types exported to CloudWatch Logs
    pub log_exports: Vec<String>,
    /// Whether modifications are waiting for a reboot or a maintenance window
    pub pending_modifications: bool,
}

impl InstanceState {
    /// First security group in `active` status.
    pub fn active_security_group(&self) -> Option<&str> {
        self.security_groups
            .iter()
            .find(|(_, status)| status == "active")
            .map(|(id, _)| id.as_str())
    }

    /// First attached parameter group that is not an AWS default group.
    pub fn custom_parameter_group(&self) -> Option<&str> {
        self.parameter_groups
            .iter()
            .map(|(name, _)| name.as_str())
            .find(|name| !name.starts_with("default."))
    }

    /// Whether a parameter group change waits for a reboot.
    pub fn pending_reboot(&self) -> bool {
        self.parameter_groups
            .iter()
            .any(|(_, apply)| apply == "pending-reboot")
    }

    /// Whether the instance accepts new modifications.
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

impl From<&DbInstance> for InstanceState {
    fn from(instance: &DbInstance) -> Self {
        let endpoint = instance.endpoint();
        InstanceState {
            identifier: instance.db_instance_identifier().unwrap_or_default().to_owned(),
            engine: instance.engine().unwrap_or_default().to_owned(),
            engine_version: instance.engine_version().unwrap_or_default().to_owned(),
            status: instance.db_instance_status().unwrap_or_default().to_owned(),
            publicly_accessible: instance.publicly_accessible().unwrap_or(false),
            address: endpoint.and_then(|e| e.address()).map(str::to_owned),
            port: endpoint.and_then(|e| e.port()),
            security_groups: instance
                .vpc_security_groups()
                .iter()
                .map(|g| {
                    (
                        g.vpc_security_group_id().unwrap_or_default().to_owned(),
                        g.status().unwrap_or_default().to_owned(),
                    )
                })
                .collect(),
            parameter_groups: instance
                .db_parameter_groups()
                .iter()
                .map(|g| {
                    (
                        g.db_parameter_group_name().unwrap_or_default().to_owned(),
                        g.parameter_apply_status().unwrap_or_default().to_owned(),
                    )
                })
                .collect(),
            log_exports: instance.enabled_cloudwatch_logs_exports().to_vec(),
            pending_modifications: instance
                .pending_modified_values()
                .map(|p| *p != PendingModifiedValues::builder().build())
                .unwrap_or(false),
        }
    }
}

/// Read and change the configuration of an RDS DB instance.
#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Describe the instance. Fails with the `DBInstanceNotFound` code if it doesn't exist.
    async fn describe_instance(&self, id: &str) -> Result<InstanceState, RuntimeError>;
    /// Parameter group family of an engine version, e.g. `postgres15`.
    async fn parameter_group_family(
        &self,
        engine: &str,
        version: &str,
    ) -> Result<Option<String>, RuntimeError>;
    /// Create a DB parameter group.
    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        description: &str,
    ) -> Result<(), RuntimeError>;
    /// Attach a parameter group, applied during the next reboot.
    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError>;
    /// Current value of a parameter, `None` if it has no value.
    async fn parameter_value(&self, group: &str, name: &str)
        -> Result<Option<String>, RuntimeError>;
    /// Set a parameter value.
    async fn modify_parameter(&self, group: &str, name: &str, value: &str)
        -> Result<(), RuntimeError>;
    /// Start exporting a log type to CloudWatch Logs.
    async fn enable_log_export(&self, id: &str, log_type: &str) -> Result<(), RuntimeError>;
    /// Reboot the instance.
    async fn reboot_instance(&self, id: &str) -> Result<(), RuntimeError>;
}

/// RDS client implementation.
pub struct RdsClient {
    inner: Client,
}

impl RdsClient {
    /// Initialize the RDS client.
    pub fn new(config: &aws_types::SdkConfig) -> RdsClient {
        RdsClient {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl InstanceApi for RdsClient {
    #[tracing::instrument(skip(self))]
    async fn describe_instance(&self, id: &str) -> Result<InstanceState, RuntimeError> {
        let res = self
            .inner
            .describe_db_instances()
            .db_instance_identifier(id)
            .send()
            .await?;

        res.db_instances()
            .first()
            .map(InstanceState::from)
            .ok_or_else(|| RuntimeError::policy(format!("DB instance '{id}' not found")))
    }

    #[tracing::instrument(skip(self))]
    async fn parameter_group_family(
        &self,
        engine: &str,
        version: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let res = self
            .inner
            .describe_db_engine_versions()
            .engine(engine)
            .engine_version(version)
            .send()
            .await?;

        Ok(res
            .db_engine_versions()
            .iter()
            .find_map(|v| v.db_parameter_group_family())
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
            .create_db_parameter_group()
            .db_parameter_group_name(name)
            .db_parameter_group_family(family)
            .description(description)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError> {
        self.inner
            .modify_db_instance()
            .db_instance_identifier(id)
            .apply_immediately(false)
            .db_parameter_group_name(group)
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
            .describe_db_parameters()
            .db_parameter_group_name(group)
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
            .apply_method(ApplyMethod::Immediate)
            .build();

        self.inner
            .modify_db_parameter_group()
            .db_parameter_group_name(group)
            .parameters(parameter)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn enable_log_export(&self, id: &str, log_type: &str) -> Result<(), RuntimeError> {
        let export = CloudwatchLogsExportConfiguration::builder()
            .enable_log_types(log_type)
            .build();

        self.inner
            .modify_db_instance()
            .db_instance_identifier(id)
            .apply_immediately(false)
            .cloudwatch_logs_export_configuration(export)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reboot_instance(&self, id: &str) -> Result<(), RuntimeError> {
        self.inner
            .reboot_db_instance()
            .db_instance_identifier(id)
            .send()
            .await?;
        Ok(())
    }
}
