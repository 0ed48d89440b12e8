use super::{SqlConnector, SqlSession, Statement};
use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_redshiftdata::{
    types::{Field, StatusString},
    Client,
};
use std::time::Duration;

/// Runs SQL on a Redshift cluster through the Redshift Data API, authenticated
/// as a database user with temporary IAM credentials.
#[derive(Clone)]
pub struct RedshiftDataConnector {
    client: Client,
    cluster: String,
    db_user: String,
    poll: Duration,
}

impl RedshiftDataConnector {
    /// Initialize the Data API connector for one cluster.
    pub fn new(
        config: &aws_types::SdkConfig,
        cluster: &str,
        db_user: &str,
        poll: Duration,
    ) -> RedshiftDataConnector {
        RedshiftDataConnector {
            client: Client::new(config),
            cluster: cluster.into(),
            db_user: db_user.into(),
            poll,
        }
    }
}

#[async_trait]
impl SqlConnector for RedshiftDataConnector {
    type Session = RedshiftDataSession;

    async fn connect(&self, database: &str) -> Result<RedshiftDataSession, RuntimeError> {
        Ok(RedshiftDataSession {
            connector: self.clone(),
            database: database.into(),
        })
    }
}

/// Statements submitted to one database. The Data API is stateless, so there
/// is nothing to open or close.
pub struct RedshiftDataSession {
    connector: RedshiftDataConnector,
    database: String,
}

impl RedshiftDataSession {
    /// Submit a statement and wait until it finishes.
    /// Returns the statement id when it produced a result set.
    #[tracing::instrument(skip(self, sql), fields(database = %self.database))]
    async fn run(&self, sql: &str) -> Result<Option<String>, RuntimeError> {
        let c = &self.connector;
        let submitted = c
            .client
            .execute_statement()
            .cluster_identifier(&c.cluster)
            .database(&self.database)
            .db_user(&c.db_user)
            .sql(sql)
            .client_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await?;

        let id: Option<&str> = submitted.id().into();
        let id = id
            .ok_or_else(|| RuntimeError::Statement("statement id missing from response".into()))?
            .to_owned();

        loop {
            let described = c.client.describe_statement().id(&id).send().await?;
            let status: Option<&StatusString> = described.status().into();
            match status {
                Some(StatusString::Finished) => {
                    let has_result_set: Option<bool> = described.has_result_set().into();
                    return Ok(has_result_set.unwrap_or(false).then_some(id));
                }
                Some(StatusString::Submitted | StatusString::Picked | StatusString::Started)
                | None => tokio::time::sleep(c.poll).await,
                Some(other) => {
                    let error: Option<&str> = described.error().into();
                    return Err(RuntimeError::Statement(format!(
                        "{}: {}",
                        other.as_str(),
                        error.unwrap_or("no error reported")
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl SqlSession for RedshiftDataSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&self, statement: &Statement) -> Result<(), RuntimeError> {
        self.run(statement.sql()).await?;
        Ok(())
    }

    async fn query_column(&self, query: &str) -> Result<Vec<String>, RuntimeError> {
        let id = match self.run(query).await? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let mut values = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .connector
                .client
                .get_statement_result()
                .id(&id)
                .set_next_token(next_token.take())
                .send()
                .await?;

            values.extend(page.records().iter().filter_map(|record| {
                match record.first() {
                    Some(Field::StringValue(value)) => Some(value.clone()),
                    _ => None,
                }
            }));

            match page.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => return Ok(values),
            }
        }
    }
}
