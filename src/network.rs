use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_ec2::{
    types::{IpPermission, IpRange},
    Client,
};
use std::future::Future;

const DUPLICATE_RULE: &str = "InvalidPermission.Duplicate";
const MISSING_RULE: &str = "InvalidPermission.NotFound";
const RULE_DESCRIPTION: &str = "Temporary access for database provisioning";

/// TCP ingress from a CIDR block to one port of a security group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    /// Security group id
    pub group_id: String,
    /// Source CIDR block
    pub cidr: String,
    /// Destination port
    pub port: u16,
}

/// Add and remove security group ingress rules.
#[async_trait]
pub trait IngressApi: Send + Sync {
    /// Add the rule. Returns `false` when it existed already.
    async fn authorize(&self, rule: &IngressRule) -> Result<bool, RuntimeError>;
    /// Remove the rule. Removing a missing rule succeeds.
    async fn revoke(&self, rule: &IngressRule) -> Result<(), RuntimeError>;
}

/// EC2 client implementation.
pub struct Ec2Client {
    inner: Client,
}

impl Ec2Client {
    /// Initialize the EC2 client.
    pub fn new(config: &aws_types::SdkConfig) -> Ec2Client {
        Ec2Client {
            inner: Client::new(config),
        }
    }
}

fn permission(rule: &IngressRule, description: Option<&str>) -> IpPermission {
    let range = IpRange::builder()
        .cidr_ip(&rule.cidr)
        .set_description(description.map(str::to_owned))
        .build();

    IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(i32::from(rule.port))
        .to_port(i32::from(rule.port))
        .ip_ranges(range)
        .build()
}

#[async_trait]
impl IngressApi for Ec2Client {
    #[tracing::instrument(skip(self))]
    async fn authorize(&self, rule: &IngressRule) -> Result<bool, RuntimeError> {
        let res = self
            .inner
            .authorize_security_group_ingress()
            .group_id(&rule.group_id)
            .ip_permissions(permission(rule, Some(RULE_DESCRIPTION)))
            .send()
            .await;

        match res.map_err(RuntimeError::from) {
            Ok(_) => Ok(true),
            Err(err) if err.aws_code() == Some(DUPLICATE_RULE) => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn revoke(&self, rule: &IngressRule) -> Result<(), RuntimeError> {
        let res = self
            .inner
            .revoke_security_group_ingress()
            .group_id(&rule.group_id)
            .ip_permissions(permission(rule, None))
            .send()
            .await;

        match res.map_err(RuntimeError::from) {
            Err(err) if err.aws_code() == Some(MISSING_RULE) => Ok(()),
            res => res.map(|_| ()),
        }
    }
}

/// Run `work` with `rule` opened on the security group.
///
/// A rule added here is revoked once `work` completes, whether it failed or
/// not. A rule that existed before is left in place. Without a rule, `work`
/// simply runs.
pub async fn with_temporary_ingress<A, F, T>(
    api: &A,
    rule: Option<&IngressRule>,
    work: F,
) -> Result<T, RuntimeError>
where
    A: IngressApi + ?Sized,
    F: Future<Output = Result<T, RuntimeError>>,
{
    let rule = match rule {
        Some(rule) => rule,
        None => return work.await,
    };

    let opened = api.authorize(rule).await?;
    if opened {
        tracing::info!(group_id = %rule.group_id, cidr = %rule.cidr, port = rule.port, "ingress opened");
    } else {
        tracing::info!(group_id = %rule.group_id, "ingress rule exists already, leaving it in place");
    }

    let res = work.await;

    if !opened {
        return res;
    }
    match (api.revoke(rule).await, res) {
        (Ok(()), res) => {
            tracing::info!(group_id = %rule.group_id, "ingress closed");
            res
        }
        (Err(revoke_err), Ok(_)) => Err(revoke_err),
        (Err(revoke_err), Err(err)) => {
            tracing::error!(error = %revoke_err, "failed to close ingress after a failure");
            Err(err)
        }
    }
}
