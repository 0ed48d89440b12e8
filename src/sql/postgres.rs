use super::{SqlConnector, SqlSession, Statement};
use crate::error::RuntimeError;
use async_trait::async_trait;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::{config::SslMode, Client, Config};

/// Opens PostgreSQL sessions on an RDS endpoint with the admin credentials.
pub struct PgConnector {
    host: String,
    port: u16,
    user: String,
    password: String,
    connect_timeout: Duration,
    tls: MakeTlsConnector,
}

impl PgConnector {
    /// Build a connector for one endpoint.
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<PgConnector, RuntimeError> {
        // same as libpq's sslmode=prefer: encrypt when offered, don't verify the chain
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(PgConnector {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            connect_timeout,
            tls: MakeTlsConnector::new(tls),
        })
    }
}

#[async_trait]
impl SqlConnector for PgConnector {
    type Session = PgSession;

    #[tracing::instrument(skip(self), fields(host = %self.host, port = self.port))]
    async fn connect(&self, database: &str) -> Result<PgSession, RuntimeError> {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(database)
            .ssl_mode(SslMode::Prefer)
            .connect_timeout(self.connect_timeout);

        let (client, connection) = config.connect(self.tls.clone()).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(error = %err, "PostgreSQL connection closed with an error");
            }
        });
        tracing::info!("connected to PostgreSQL");

        Ok(PgSession {
            client,
            database: database.into(),
        })
    }
}

/// A PostgreSQL connection, closed when dropped.
pub struct PgSession {
    client: Client,
    database: String,
}

#[async_trait]
impl SqlSession for PgSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&self, statement: &Statement) -> Result<(), RuntimeError> {
        self.client.batch_execute(statement.sql()).await?;
        Ok(())
    }

    async fn query_column(&self, query: &str) -> Result<Vec<String>, RuntimeError> {
        let rows = self.client.query(query, &[]).await?;
        let values = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}
