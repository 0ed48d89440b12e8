use crate::error::RuntimeError;
use aws_sdk_secretsmanager::Client;
use serde_json::Value;

/// Credentials of the read-only database principal
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    /// Role name
    pub username: String,
    /// Role password
    pub password: String,
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Principal {
    /// Decode a secret string of the form `{"username": .., "password": ..}`.
    pub fn from_secret_string(secret: &str) -> Result<Principal, RuntimeError> {
        let value: Value = serde_json::from_str(secret)?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| RuntimeError::MissingSecretField(name.into()))
        };

        Ok(Principal {
            username: field("username")?,
            password: field("password")?,
        })
    }
}

/// Fetch the principal credentials stored in Secrets Manager.
#[tracing::instrument(skip(client))]
pub async fn fetch_principal(client: &Client, secret_arn: &str) -> Result<Principal, RuntimeError> {
    let res = client.get_secret_value().secret_id(secret_arn).send().await?;

    let secret = res
        .secret_string()
        .ok_or_else(|| RuntimeError::MissingSecretField("SecretString".into()))?;
    let principal = Principal::from_secret_string(secret)?;

    tracing::info!(username = %principal.username, "retrieved and decoded secret");
    Ok(principal)
}
