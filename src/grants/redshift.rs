use super::{resolve_database_list, Selector};
use crate::{
    error::RuntimeError,
    sql::{self, quote_ident, SqlConnector, SqlSession, Statement},
};
use std::collections::BTreeSet;

/// Database created with every cluster, used for user management.
pub const DEFAULT_DATABASE: &str = "dev";

/// System views the principal reads query history and table metadata from.
pub const SYSTEM_VIEWS: [&str; 6] = [
    "SVV_TABLE_INFO",
    "SVV_TABLES",
    "SVV_COLUMNS",
    "STL_QUERYTEXT",
    "STL_DDLTEXT",
    "STL_QUERY",
];

const LOCAL_DATABASES: &str = "SELECT database_name FROM svv_redshift_databases \
     WHERE database_type = 'local' ORDER BY database_name";

/// Grants the principal read access on the Redshift system views.
pub struct RedshiftGrants<'a, C> {
    connector: &'a C,
    user: &'a str,
}

impl<'a, C: SqlConnector> RedshiftGrants<'a, C> {
    /// Build a grant manager for the passwordless `user`.
    pub fn new(connector: &'a C, user: &'a str) -> Self {
        RedshiftGrants { connector, user }
    }

    /// Create the user and grant it the system views in every database.
    /// Returns the databases granted.
    #[tracing::instrument(skip_all, fields(user = self.user))]
    pub async fn provision(&self, databases: &[Selector]) -> Result<BTreeSet<String>, RuntimeError> {
        let user = quote_ident(self.user);
        let databases = {
            let session = self.connector.connect(DEFAULT_DATABASE).await?;
            let create = Statement::new(format!(
                "CREATE USER {user} PASSWORD DISABLE SYSLOG ACCESS UNRESTRICTED"
            ));
            if let Err(err) = sql::execute(&session, create).await {
                tracing::warn!(error = %err, "failed to create user, it probably exists already");
            }
            self.resolve(&session, databases).await?
        };

        for database in &databases {
            let session = self.connector.connect(database).await?;
            for view in SYSTEM_VIEWS {
                sql::execute(
                    &session,
                    Statement::new(format!("GRANT SELECT ON {view} TO {user}")),
                )
                .await?;
            }
            tracing::info!(%database, "system views granted");
        }
        Ok(databases)
    }

    /// Revoke the system views and drop the user. Every failure is only logged.
    #[tracing::instrument(skip_all, fields(user = self.user))]
    pub async fn teardown(&self, databases: &[Selector]) -> Result<(), RuntimeError> {
        let user = quote_ident(self.user);
        let session = self.connector.connect(DEFAULT_DATABASE).await?;

        let databases = match self.resolve(&session, databases).await {
            Ok(databases) => databases,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list databases, revoking on {DEFAULT_DATABASE} only");
                BTreeSet::from([DEFAULT_DATABASE.to_owned()])
            }
        };

        for database in &databases {
            let target = match self.connector.connect(database).await {
                Ok(target) => target,
                Err(err) => {
                    tracing::warn!(%database, error = %err, "failed to connect, skipping");
                    continue;
                }
            };
            for view in SYSTEM_VIEWS {
                let revoke = Statement::new(format!("REVOKE SELECT ON {view} FROM {user}"));
                if let Err(err) = sql::execute(&target, revoke).await {
                    tracing::warn!(%database, view, error = %err, "failed to revoke, continuing");
                }
            }
        }

        let drop = Statement::new(format!("DROP USER IF EXISTS {user}"));
        if let Err(err) = sql::execute(&session, drop).await {
            tracing::warn!(error = %err, "failed to drop user");
        }
        Ok(())
    }

    async fn resolve(
        &self,
        session: &C::Session,
        databases: &[Selector],
    ) -> Result<BTreeSet<String>, RuntimeError> {
        let local = if databases.iter().any(Selector::is_all) {
            session.query_column(LOCAL_DATABASES).await?
        } else {
            Vec::new()
        };
        Ok(resolve_database_list(databases, &local))
    }
}
