//! SQL sessions used by the grant managers.
//!
//! A session is bound to one database and lives for one unit of work.
//! Statements are plain text because grants and role DDL cannot take bind
//! parameters; every identifier goes through [`quote_ident`] and every
//! value through [`quote_literal`].

use crate::error::RuntimeError;
use async_trait::async_trait;

pub mod postgres;
pub mod redshift_data;

pub use postgres::PgConnector;
pub use redshift_data::RedshiftDataConnector;

/// SQLSTATE raised when creating an object that already exists.
pub const DUPLICATE_OBJECT: &str = "42710";
/// SQLSTATE raised when referencing an object, e.g. a role, that doesn't exist.
pub const UNDEFINED_OBJECT: &str = "42704";

/// A statement to execute, with its logging policy.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    no_echo: bool,
}

impl Statement {
    /// A statement that is safe to log.
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            no_echo: false,
        }
    }

    /// A statement embedding a secret, masked in logs.
    pub fn secret(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            no_echo: true,
        }
    }

    /// SQL text to send.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// SQL text to log.
    pub fn echo(&self) -> String {
        if self.no_echo {
            "*".repeat(self.sql.len())
        } else {
            self.sql.clone()
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.echo())
    }
}

/// A connection to one database.
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Database the session is connected to.
    fn database(&self) -> &str;

    /// Run a statement that returns no rows.
    async fn execute(&self, statement: &Statement) -> Result<(), RuntimeError>;

    /// Run a query and return its first column as text.
    async fn query_column(&self, query: &str) -> Result<Vec<String>, RuntimeError>;
}

/// Opens sessions, one per database.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Session type produced by this connector
    type Session: SqlSession;

    /// Open a session on `database`.
    async fn connect(&self, database: &str) -> Result<Self::Session, RuntimeError>;
}

/// Log and run a statement.
pub async fn execute<S: SqlSession + ?Sized>(
    session: &S,
    statement: Statement,
) -> Result<(), RuntimeError> {
    tracing::info!(
        database = session.database(),
        sql = %statement.echo(),
        "executing SQL"
    );
    session.execute(&statement).await
}

/// Quote an identifier, e.g. a database, schema or role name.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!("\"public\"", quote_ident("public"));
        assert_eq!("\"we\"\"ird\"", quote_ident("we\"ird"));
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!("'s3cr''et'", quote_literal("s3cr'et"));
    }

    #[test]
    fn test_secret_statement_is_masked() {
        let statement = Statement::secret("CREATE USER \"reader\" WITH ENCRYPTED PASSWORD 'pw'");
        assert!(!statement.echo().contains("pw"));
        assert_eq!(statement.sql().len(), statement.echo().len());
        assert!(!format!("{statement:?}").contains("pw"));
    }
}
