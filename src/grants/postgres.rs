use super::{needs_database_catalog, resolve_databases, resolve_schemas, SchemaTarget};
use crate::{
    error::RuntimeError,
    secrets::Principal,
    sql::{
        self, quote_ident, quote_literal, SqlConnector, SqlSession, Statement, DUPLICATE_OBJECT,
        UNDEFINED_OBJECT,
    },
};
use std::collections::{BTreeMap, BTreeSet};

/// Database every PostgreSQL server has, used for role management.
pub const MAINTENANCE_DATABASE: &str = "postgres";

const ADMIN_DATABASES: &str = "SELECT datname::text FROM pg_catalog.pg_database \
     WHERE datallowconn AND has_database_privilege(datname, 'CONNECT') ORDER BY datname";

const USER_SCHEMAS: &str = "SELECT nspname::text FROM pg_catalog.pg_namespace \
     WHERE nspname NOT LIKE 'pg\\_%' ORDER BY nspname";

// schemas the admin can grant on, a wildcard never expands beyond them
const USABLE_SCHEMAS: &str = "SELECT nspname::text FROM pg_catalog.pg_namespace \
     WHERE nspname NOT LIKE 'pg\\_%' AND has_schema_privilege(nspname, 'USAGE') ORDER BY nspname";

fn principal_databases(user: &str) -> String {
    format!(
        "SELECT datname::text FROM pg_catalog.pg_database \
         WHERE datallowconn AND has_database_privilege({}, datname, 'CONNECT') ORDER BY datname",
        quote_literal(user)
    )
}

/// Grants read access on PostgreSQL schemas to the principal.
pub struct PostgresGrants<'a, C> {
    connector: &'a C,
    principal: &'a Principal,
}

impl<'a, C: SqlConnector> PostgresGrants<'a, C> {
    /// Build a grant manager connecting through `connector` as the admin user.
    pub fn new(connector: &'a C, principal: &'a Principal) -> Self {
        PostgresGrants {
            connector,
            principal,
        }
    }

    /// Create the principal and grant it read access on every target.
    /// Returns the schemas granted, per database.
    #[tracing::instrument(skip_all, fields(user = %self.principal.username))]
    pub async fn provision(
        &self,
        targets: &[SchemaTarget],
    ) -> Result<BTreeMap<String, BTreeSet<String>>, RuntimeError> {
        let accessible = {
            let session = self.connector.connect(MAINTENANCE_DATABASE).await?;
            self.ensure_user(&session).await?;

            if needs_database_catalog(targets) {
                session.query_column(ADMIN_DATABASES).await?
            } else {
                Vec::new()
            }
        };

        let mut granted = BTreeMap::new();
        for (database, selectors) in resolve_databases(targets, &accessible) {
            let session = self.connector.connect(&database).await?;
            let available = session.query_column(USABLE_SCHEMAS).await?;
            let schemas = resolve_schemas(&selectors, &available);

            self.grant_database(&session, &schemas).await?;
            tracing::info!(%database, schemas = schemas.len(), "access granted");
            granted.insert(database, schemas);
        }
        Ok(granted)
    }

    /// Revoke everything the principal was granted and drop it.
    #[tracing::instrument(skip_all, fields(user = %self.principal.username))]
    pub async fn teardown(&self) -> Result<(), RuntimeError> {
        let user = quote_ident(&self.principal.username);
        let session = self.connector.connect(MAINTENANCE_DATABASE).await?;

        let databases = match session
            .query_column(&principal_databases(&self.principal.username))
            .await
        {
            Err(err) if err.sql_state() == Some(UNDEFINED_OBJECT) => {
                tracing::info!("user doesn't exist, nothing to revoke");
                return Ok(());
            }
            res => res?,
        };

        for database in &databases {
            sql::execute(
                &session,
                Statement::new(format!(
                    "REVOKE ALL PRIVILEGES ON DATABASE {} FROM {user}",
                    quote_ident(database)
                )),
            )
            .await?;
        }

        for database in &databases {
            if let Err(err) = self.revoke_schemas(database, &user).await {
                tracing::warn!(%database, error = %err, "failed to revoke schema privileges, skipping");
            }
        }

        match sql::execute(&session, Statement::new(format!("DROP USER IF EXISTS {user}"))).await {
            Err(err) if err.sql_state() == Some(UNDEFINED_OBJECT) => {
                tracing::warn!(error = %err, "user already dropped");
                Ok(())
            }
            res => res,
        }
    }

    async fn ensure_user(&self, session: &C::Session) -> Result<(), RuntimeError> {
        let statement = Statement::secret(format!(
            "CREATE USER {} WITH ENCRYPTED PASSWORD {}",
            quote_ident(&self.principal.username),
            quote_literal(&self.principal.password)
        ));

        match sql::execute(session, statement).await {
            Err(err) if err.sql_state() == Some(DUPLICATE_OBJECT) => {
                tracing::info!("user exists already");
                Ok(())
            }
            res => res,
        }
    }

    async fn grant_database(
        &self,
        session: &C::Session,
        schemas: &BTreeSet<String>,
    ) -> Result<(), RuntimeError> {
        let user = quote_ident(&self.principal.username);

        sql::execute(
            session,
            Statement::new(format!(
                "GRANT CONNECT ON DATABASE {} TO {user}",
                quote_ident(session.database())
            )),
        )
        .await?;

        for schema in schemas {
            let schema = quote_ident(schema);
            for grant in [
                format!("GRANT USAGE ON SCHEMA {schema} TO {user}"),
                format!("GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {user}"),
                format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT ON TABLES TO {user}"),
            ] {
                sql::execute(session, Statement::new(grant)).await?;
            }
        }
        Ok(())
    }

    async fn revoke_schemas(&self, database: &str, user: &str) -> Result<(), RuntimeError> {
        let session = self.connector.connect(database).await?;

        for schema in session.query_column(USER_SCHEMAS).await? {
            let schema = quote_ident(&schema);
            for revoke in [
                format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} REVOKE ALL ON TABLES FROM {user}"),
                format!("REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA {schema} FROM {user}"),
                format!("REVOKE ALL PRIVILEGES ON SCHEMA {schema} FROM {user}"),
            ] {
                if let Err(err) = sql::execute(&session, Statement::new(revoke)).await {
                    tracing::warn!(%schema, error = %err, "failed to revoke, continuing");
                }
            }
        }
        Ok(())
    }
}
