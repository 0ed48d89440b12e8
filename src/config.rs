use crate::{error::RuntimeError, retry::WaitPolicy};
use std::{str::FromStr, time::Duration};

/// Runtime settings read from the Lambda environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Bound on every database connection attempt
    pub connect_timeout: Duration,
    /// Polling used while an instance or cluster applies a change
    pub wait: WaitPolicy,
    /// Delay between two Redshift Data API statement status reads
    pub statement_poll: Duration,
    /// CIDR allowed in temporarily while the SQL work runs
    pub ingress_cidr: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            connect_timeout: Duration::from_secs(10),
            wait: WaitPolicy::default(),
            statement_poll: Duration::from_secs(2),
            ingress_cidr: None,
        }
    }
}

impl Settings {
    /// Read the settings from the process environment.
    pub fn from_env() -> Result<Settings, RuntimeError> {
        Settings::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the settings through `lookup`, falling back to defaults for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Settings, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let secs = |name: &str, default: Duration| -> Result<Duration, RuntimeError> {
            Ok(parse(&lookup, name)?.map(Duration::from_secs).unwrap_or(default))
        };

        Ok(Settings {
            connect_timeout: secs("PROVISIONER_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            wait: WaitPolicy {
                interval: secs("PROVISIONER_WAIT_INTERVAL_SECS", defaults.wait.interval)?,
                max_attempts: parse(&lookup, "PROVISIONER_WAIT_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.wait.max_attempts),
            },
            statement_poll: secs("PROVISIONER_STATEMENT_POLL_SECS", defaults.statement_poll)?,
            ingress_cidr: lookup("PROVISIONER_INGRESS_CIDR").filter(|c| !c.trim().is_empty()),
        })
    }
}

/// Settings of the activity stream processor, read from the Lambda environment.
#[derive(Clone, Debug, PartialEq)]
pub struct DasSettings {
    /// KMS key encrypting the activity stream
    pub kms_key_arn: String,
    /// Resource id of the streaming instance (`db-…`) or cluster (`cluster-…`)
    pub rds_resource_id: String,
}

impl DasSettings {
    /// Read the settings from the process environment.
    pub fn from_env() -> Result<DasSettings, RuntimeError> {
        DasSettings::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the settings through `lookup`. Both variables are required.
    pub fn from_lookup<F>(lookup: F) -> Result<DasSettings, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RuntimeError::Config {
                    name: name.into(),
                    reason: "not set".into(),
                })
        };

        Ok(DasSettings {
            kms_key_arn: required("kms_key_arn")?,
            rds_resource_id: required("rds_resource_id")?,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &str) -> Result<Option<T>, RuntimeError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| RuntimeError::Config {
                name: name.into(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
