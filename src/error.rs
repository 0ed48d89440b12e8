use aws_sdk_rds::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error as ThisError;

/// Different errors that the application can raise
#[derive(Debug, ThisError)]
pub enum RuntimeError {
    /// The live resource diverges from the desired state and the caller did not
    /// authorize the change. The message names the manual remediation.
    #[error("{0}")]
    Policy(String),
    /// Error returned when a resource property is missing or malformed
    #[error("invalid resource property {name}: {reason}")]
    InvalidProperty {
        /// Property name as sent by CloudFormation
        name: String,
        /// What is wrong with it
        reason: String,
    },
    /// Error returned if the principal secret is missing an expected field
    #[error("missing secret field {0}")]
    MissingSecretField(String),
    /// Error returned by any AWS API
    #[error("unexpected AWS API error: {message}")]
    Aws {
        /// Service error code, e.g. `InvalidClusterState`
        code: Option<String>,
        /// Full error context rendered by the SDK
        message: String,
        /// Original SDK error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Error returned by a SQL statement or connection
    #[error("unexpected database error: {message}")]
    Sql {
        /// SQLSTATE code, when the server reported one
        state: Option<String>,
        /// Server or driver message
        message: String,
    },
    /// Error returned when a Redshift Data API statement ends in a state other than FINISHED
    #[error("failed SQL: {0}")]
    Statement(String),
    /// Error returned when a resource doesn't become available in time
    #[error("timed out waiting for {0} to become available")]
    WaitTimeout(String),
    /// Error returned when the TLS connector cannot be built
    #[error("failed to set up TLS")]
    Tls(#[from] native_tls::Error),
    /// Error returned when a JSON document cannot be decoded
    #[error("invalid JSON document")]
    Json(#[from] serde_json::Error),
    /// Error returned if the response cannot be delivered to CloudFormation
    #[error("failed to send the custom resource response")]
    Response(#[from] reqwest::Error),
    /// Error returned when an activity stream payload cannot be decrypted
    #[error("cannot decrypt activity record: {0}")]
    Decrypt(String),
    /// Error returned when a base64 field cannot be decoded
    #[error("invalid base64 data")]
    Base64(#[from] base64::DecodeError),
    /// Error returned when compressed data cannot be read or written
    #[error("invalid compressed data")]
    Io(#[from] std::io::Error),
    /// Error returned if an environment setting is invalid
    #[error("invalid configuration {name}: {reason}")]
    Config {
        /// Environment variable name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

impl RuntimeError {
    /// Build a policy violation error.
    pub fn policy(message: impl Into<String>) -> Self {
        RuntimeError::Policy(message.into())
    }

    /// Build an invalid property error.
    pub fn invalid_property(name: &str, reason: impl Into<String>) -> Self {
        RuntimeError::InvalidProperty {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Expected errors that the caller can fix, either by approving a
    /// configuration flag or by changing the resource manually.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            RuntimeError::Policy(_)
                | RuntimeError::InvalidProperty { .. }
                | RuntimeError::MissingSecretField(_)
        )
    }

    /// AWS error code of the failed call, if any.
    pub fn aws_code(&self) -> Option<&str> {
        match self {
            RuntimeError::Aws { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// SQLSTATE of the failed statement, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            RuntimeError::Sql { state, .. } => state.as_deref(),
            _ => None,
        }
    }
}

impl<E, R> From<SdkError<E, R>> for RuntimeError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    fn from(err: SdkError<E, R>) -> Self {
        RuntimeError::Aws {
            code: err.code().map(str::to_owned),
            message: DisplayErrorContext(&err).to_string(),
            source: Box::new(err),
        }
    }
}

impl From<tokio_postgres::Error> for RuntimeError {
    fn from(err: tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db) => db.message().to_owned(),
            None => err.to_string(),
        };
        RuntimeError::Sql {
            state: err.code().map(|c| c.code().to_owned()),
            message,
        }
    }
}
