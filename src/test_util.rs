//! In-memory stand-ins for the AWS APIs and SQL servers. Every mutating call
//! is recorded so tests can assert which corrective actions were taken.

use crate::{
    das::{DataKeyApi, EncryptionContext},
    error::RuntimeError,
    network::{IngressApi, IngressRule},
    rds::{InstanceApi, InstanceState},
    redshift::{ClusterApi, ClusterParameterGroupState, ClusterState, LoggingStatus},
    sql::{SqlConnector, SqlSession, Statement},
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};
use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
use aws_smithy_types::{body::SdkBody, retry::RetryConfig};
use aws_types::{region::Region, SdkConfig};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

/// Identifier of the instance returned by [`default_instance`]
pub const INSTANCE: &str = "postgres-test-data";
/// Identifier of the cluster returned by [`default_cluster`]
pub const CLUSTER: &str = "redshift-cluster-1";
/// IAM role attached by the cluster reconciler
pub const ROLE: &str = "arn:aws:iam::123456789012:role/selectstar-redshift";
/// Bucket receiving Redshift audit logs
pub const LOG_BUCKET: &str = "selectstar-audit-logs";
/// Read-only principal
pub const READER: &str = "reader";

/// Error as returned by an AWS API
pub fn aws_error(code: &str) -> RuntimeError {
    RuntimeError::Aws {
        code: Some(code.into()),
        message: format!("{code}: service error"),
        source: code.into(),
    }
}

/// Shared config whose clients answer every call with the next recorded response.
pub fn replay_config(events: Vec<ReplayEvent>) -> (SdkConfig, StaticReplayClient) {
    let http_client = StaticReplayClient::new(events);
    let config = SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
            "ATESTCLIENT",
            "atestsecretkey",
            None,
            None,
            "test",
        )))
        .retry_config(RetryConfig::disabled())
        .http_client(http_client.clone())
        .build();
    (config, http_client)
}

fn recorded(status: u16, content_type: &str, body: &str) -> ReplayEvent {
    ReplayEvent::new(
        http::Request::builder()
            .uri("https://aws.amazon.test/")
            .body(SdkBody::empty())
            .unwrap(),
        http::Response::builder()
            .status(status)
            .header("content-type", content_type)
            .body(SdkBody::from(body.to_owned()))
            .unwrap(),
    )
}

/// Response of an XML (query protocol) API
pub fn xml_response(status: u16, body: &str) -> ReplayEvent {
    recorded(status, "text/xml", body)
}

/// Response of a JSON API
pub fn json_response(status: u16, body: &str) -> ReplayEvent {
    recorded(status, "application/x-amz-json-1.1", body)
}

/// Bodies of the requests sent so far, in order.
pub fn request_bodies(http_client: &StaticReplayClient) -> Vec<String> {
    http_client
        .actual_requests()
        .map(|req| String::from_utf8_lossy(req.body().bytes().unwrap_or_default()).into_owned())
        .collect()
}

fn sql_error(state: &str, message: impl Into<String>) -> RuntimeError {
    RuntimeError::Sql {
        state: Some(state.into()),
        message: message.into(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// A publicly accessible PostgreSQL 15 instance with the default parameter group
pub fn default_instance() -> InstanceState {
    InstanceState {
        identifier: INSTANCE.into(),
        engine: "postgres".into(),
        engine_version: "15.4".into(),
        status: "available".into(),
        publicly_accessible: true,
        address: Some(format!("{INSTANCE}.abcdefghijkl.us-east-1.rds.amazonaws.com")),
        port: Some(5432),
        security_groups: vec![("sg-0123".into(), "active".into())],
        parameter_groups: vec![("default.postgres15".into(), "in-sync".into())],
        log_exports: vec![],
        pending_modifications: false,
    }
}

#[derive(Default)]
struct RdsState {
    instance: InstanceState,
    groups: BTreeMap<String, BTreeMap<String, String>>,
    mutations: Vec<String>,
    available_after: Option<u32>,
}

/// RDS with a single instance
pub struct FakeRds {
    inner: Mutex<RdsState>,
}

impl FakeRds {
    pub fn new(instance: InstanceState) -> FakeRds {
        let mut groups = BTreeMap::new();
        for (name, _) in &instance.parameter_groups {
            groups.insert(name.clone(), BTreeMap::new());
        }
        FakeRds {
            inner: Mutex::new(RdsState {
                instance,
                groups,
                ..Default::default()
            }),
        }
    }

    pub fn mutations(&self) -> Vec<String> {
        lock(&self.inner).mutations.clone()
    }

    pub fn state(&self) -> InstanceState {
        lock(&self.inner).instance.clone()
    }

    pub fn update<F: FnOnce(&mut InstanceState)>(&self, f: F) {
        f(&mut lock(&self.inner).instance)
    }

    /// Create a parameter group without recording a mutation.
    pub fn add_parameter_group(&self, name: &str) {
        lock(&self.inner).groups.insert(name.into(), BTreeMap::new());
    }

    /// Report `available` after `describes` more describe calls.
    pub fn become_available_after(&self, describes: u32) {
        lock(&self.inner).available_after = Some(describes);
    }
}

#[async_trait]
impl InstanceApi for FakeRds {
    async fn describe_instance(&self, id: &str) -> Result<InstanceState, RuntimeError> {
        let mut inner = lock(&self.inner);
        if id != inner.instance.identifier {
            return Err(aws_error("DBInstanceNotFound"));
        }
        match inner.available_after {
            Some(0) => {
                inner.instance.status = "available".into();
                inner.available_after = None;
            }
            Some(n) => inner.available_after = Some(n - 1),
            None => {}
        }
        Ok(inner.instance.clone())
    }

    async fn parameter_group_family(
        &self,
        engine: &str,
        version: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let major = version.split('.').next().unwrap_or_default();
        Ok(Some(format!("{engine}{major}")))
    }

    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        _description: &str,
    ) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner
            .mutations
            .push(format!("create_parameter_group {name} {family}"));
        if inner.groups.contains_key(name) {
            return Err(aws_error("DBParameterGroupAlreadyExists"));
        }
        inner.groups.insert(name.into(), BTreeMap::new());
        Ok(())
    }

    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner
            .mutations
            .push(format!("attach_parameter_group {id} {group}"));
        inner.instance.parameter_groups = vec![(group.into(), "pending-reboot".into())];
        Ok(())
    }

    async fn parameter_value(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let inner = lock(&self.inner);
        let parameters = inner
            .groups
            .get(group)
            .ok_or_else(|| aws_error("DBParameterGroupNotFound"))?;
        Ok(parameters.get(name).cloned())
    }

    async fn modify_parameter(
        &self,
        group: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner
            .mutations
            .push(format!("modify_parameter {group} {name}={value}"));
        inner
            .groups
            .get_mut(group)
            .ok_or_else(|| aws_error("DBParameterGroupNotFound"))?
            .insert(name.into(), value.into());
        inner.instance.status = "modifying".into();
        inner.available_after = Some(1);
        Ok(())
    }

    async fn enable_log_export(&self, id: &str, log_type: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner
            .mutations
            .push(format!("enable_log_export {id} {log_type}"));
        inner.instance.log_exports.push(log_type.into());
        Ok(())
    }

    async fn reboot_instance(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.mutations.push(format!("reboot_instance {id}"));
        for (_, apply) in inner.instance.parameter_groups.iter_mut() {
            *apply = "in-sync".into();
        }
        inner.instance.pending_modifications = false;
        Ok(())
    }
}

/// An available cluster with the default parameter group and no IAM role
pub fn default_cluster() -> ClusterState {
    ClusterState {
        identifier: CLUSTER.into(),
        status: "available".into(),
        parameter_groups: vec![ClusterParameterGroupState {
            name: "default.redshift-1.0".into(),
            parameters: vec![],
        }],
        iam_roles: vec![],
    }
}

#[derive(Default)]
struct RedshiftState {
    cluster: ClusterState,
    logging: LoggingStatus,
    groups: BTreeMap<String, (String, BTreeMap<String, String>)>,
    mutations: Vec<String>,
    failures: Vec<(String, String)>,
}

impl RedshiftState {
    fn take_failure(&mut self, operation: &str) -> Result<(), RuntimeError> {
        match self.failures.iter().position(|(op, _)| op == operation) {
            Some(index) => Err(aws_error(&self.failures.remove(index).1)),
            None => Ok(()),
        }
    }
}

/// Redshift with a single cluster
pub struct FakeRedshift {
    inner: Mutex<RedshiftState>,
}

impl FakeRedshift {
    pub fn new(cluster: ClusterState) -> FakeRedshift {
        let mut groups = BTreeMap::new();
        for group in &cluster.parameter_groups {
            let parameters = BTreeMap::from([(
                "enable_user_activity_logging".to_owned(),
                "false".to_owned(),
            )]);
            groups.insert(group.name.clone(), ("redshift-1.0".to_owned(), parameters));
        }
        FakeRedshift {
            inner: Mutex::new(RedshiftState {
                cluster,
                groups,
                ..Default::default()
            }),
        }
    }

    pub fn mutations(&self) -> Vec<String> {
        lock(&self.inner).mutations.clone()
    }

    pub fn state(&self) -> ClusterState {
        lock(&self.inner).cluster.clone()
    }

    pub fn update<F: FnOnce(&mut ClusterState)>(&self, f: F) {
        f(&mut lock(&self.inner).cluster)
    }

    pub fn set_logging(&self, enabled: bool, bucket: Option<&str>) {
        lock(&self.inner).logging = LoggingStatus {
            enabled,
            bucket: bucket.map(str::to_owned),
        };
    }

    /// Attach a custom parameter group without recording a mutation.
    pub fn attach_custom_group(&self, name: &str, user_activity: &str) {
        let mut inner = lock(&self.inner);
        let parameters = BTreeMap::from([(
            "enable_user_activity_logging".to_owned(),
            user_activity.to_owned(),
        )]);
        inner
            .groups
            .insert(name.into(), ("redshift-1.0".into(), parameters));
        inner.cluster.parameter_groups = vec![ClusterParameterGroupState {
            name: name.into(),
            parameters: vec![],
        }];
    }

    /// Fail the next call of `operation` with the AWS error `code`.
    pub fn fail_next(&self, operation: &str, code: &str) {
        lock(&self.inner)
            .failures
            .push((operation.into(), code.into()));
    }
}

#[async_trait]
impl ClusterApi for FakeRedshift {
    async fn describe_cluster(&self, id: &str) -> Result<ClusterState, RuntimeError> {
        let inner = lock(&self.inner);
        if id != inner.cluster.identifier {
            return Err(aws_error("ClusterNotFound"));
        }
        Ok(inner.cluster.clone())
    }

    async fn add_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("add_iam_role")?;
        inner.mutations.push(format!("add_iam_role {id} {role}"));
        inner.cluster.iam_roles.push(role.into());
        Ok(())
    }

    async fn remove_iam_role(&self, id: &str, role: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("remove_iam_role")?;
        inner.mutations.push(format!("remove_iam_role {id} {role}"));
        inner.cluster.iam_roles.retain(|r| r != role);
        Ok(())
    }

    async fn logging_status(&self, _id: &str) -> Result<LoggingStatus, RuntimeError> {
        Ok(lock(&self.inner).logging.clone())
    }

    async fn enable_logging(
        &self,
        id: &str,
        bucket: &str,
        prefix: &str,
    ) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("enable_logging")?;
        inner
            .mutations
            .push(format!("enable_logging {id} {bucket} {prefix}"));
        inner.logging = LoggingStatus {
            enabled: true,
            bucket: Some(bucket.into()),
        };
        Ok(())
    }

    async fn parameter_group_family(&self, group: &str) -> Result<Option<String>, RuntimeError> {
        Ok(lock(&self.inner)
            .groups
            .get(group)
            .map(|(family, _)| family.clone()))
    }

    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        _description: &str,
    ) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("create_parameter_group")?;
        inner
            .mutations
            .push(format!("create_parameter_group {name} {family}"));
        if inner.groups.contains_key(name) {
            return Err(aws_error("ClusterParameterGroupAlreadyExists"));
        }
        inner
            .groups
            .insert(name.into(), (family.into(), BTreeMap::new()));
        Ok(())
    }

    async fn attach_parameter_group(&self, id: &str, group: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("attach_parameter_group")?;
        inner
            .mutations
            .push(format!("attach_parameter_group {id} {group}"));
        inner.cluster.parameter_groups = vec![ClusterParameterGroupState {
            name: group.into(),
            parameters: vec![],
        }];
        Ok(())
    }

    async fn parameter_value(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let inner = lock(&self.inner);
        let (_, parameters) = inner
            .groups
            .get(group)
            .ok_or_else(|| aws_error("ClusterParameterGroupNotFound"))?;
        Ok(parameters.get(name).cloned())
    }

    async fn modify_parameter(
        &self,
        group: &str,
        name: &str,
        value: &str,
    ) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.take_failure("modify_parameter")?;
        inner
            .mutations
            .push(format!("modify_parameter {group} {name}={value}"));
        inner
            .groups
            .get_mut(group)
            .ok_or_else(|| aws_error("ClusterParameterGroupNotFound"))?
            .1
            .insert(name.into(), value.into());

        for attached in inner.cluster.parameter_groups.iter_mut() {
            if attached.name == group {
                attached.parameters.retain(|(n, _)| n != name);
                attached
                    .parameters
                    .push((name.into(), "pending-reboot".into()));
            }
        }
        Ok(())
    }

    async fn reboot_cluster(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.mutations.push(format!("reboot_cluster {id}"));
        for group in inner.cluster.parameter_groups.iter_mut() {
            for (_, apply) in group.parameters.iter_mut() {
                *apply = "in-sync".into();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct IngressState {
    open: BTreeSet<(String, String, u16)>,
    calls: u32,
    fail_revoke: bool,
}

/// Security groups
#[derive(Default)]
pub struct FakeIngress {
    inner: Mutex<IngressState>,
}

fn rule_key(rule: &IngressRule) -> (String, String, u16) {
    (rule.group_id.clone(), rule.cidr.clone(), rule.port)
}

impl FakeIngress {
    pub fn is_open(&self, rule: &IngressRule) -> bool {
        lock(&self.inner).open.contains(&rule_key(rule))
    }

    pub fn calls(&self) -> u32 {
        lock(&self.inner).calls
    }

    pub fn fail_revoke(&self) {
        lock(&self.inner).fail_revoke = true;
    }
}

#[async_trait]
impl IngressApi for FakeIngress {
    async fn authorize(&self, rule: &IngressRule) -> Result<bool, RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.calls += 1;
        Ok(inner.open.insert(rule_key(rule)))
    }

    async fn revoke(&self, rule: &IngressRule) -> Result<(), RuntimeError> {
        let mut inner = lock(&self.inner);
        inner.calls += 1;
        if inner.fail_revoke {
            return Err(aws_error("UnauthorizedOperation"));
        }
        inner.open.remove(&rule_key(rule));
        Ok(())
    }
}

struct FakeDatabase {
    schemas: Vec<String>,
    /// schemas the admin has no USAGE on
    restricted: BTreeSet<String>,
    allow_connections: bool,
    refuse: bool,
}

#[derive(Default)]
struct ServerState {
    databases: BTreeMap<String, FakeDatabase>,
    users: BTreeSet<String>,
    /// `(database, privilege, object, user)`
    grants: BTreeSet<(String, String, String, String)>,
    executed: Vec<String>,
}

/// A SQL server that understands the role and grant statements it is sent.
/// Serves both the PostgreSQL and the Redshift grant managers.
#[derive(Clone, Default)]
pub struct FakePostgres {
    inner: Arc<Mutex<ServerState>>,
}

impl FakePostgres {
    /// A server with the given databases and their schemas. Every database
    /// also holds `pg_catalog`.
    pub fn new(databases: &[(&str, &[&str])]) -> FakePostgres {
        let server = FakePostgres::default();
        {
            let mut inner = lock(&server.inner);
            for (name, schemas) in databases {
                let mut schemas: Vec<String> = schemas.iter().map(|s| s.to_string()).collect();
                schemas.push("pg_catalog".into());
                inner.databases.insert(
                    name.to_string(),
                    FakeDatabase {
                        schemas,
                        restricted: BTreeSet::new(),
                        allow_connections: true,
                        refuse: false,
                    },
                );
            }
        }
        server
    }

    /// Mark a database as not accepting connections, like `template0`.
    pub fn disallow_connections(&self, database: &str) {
        if let Some(db) = lock(&self.inner).databases.get_mut(database) {
            db.allow_connections = false;
        }
    }

    /// Revoke the admin's USAGE on a schema. Grants on it are denied.
    pub fn restrict_schema(&self, database: &str, schema: &str) {
        if let Some(db) = lock(&self.inner).databases.get_mut(database) {
            db.restricted.insert(schema.into());
        }
    }

    /// Make connection attempts to a database fail.
    pub fn refuse_connections(&self, database: &str) {
        if let Some(db) = lock(&self.inner).databases.get_mut(database) {
            db.refuse = true;
        }
    }

    pub fn accessible_databases(&self) -> Vec<String> {
        accessible(&lock(&self.inner))
    }

    pub fn has_user(&self, user: &str) -> bool {
        lock(&self.inner).users.contains(user)
    }

    /// Grants held by `user` as `database privilege object`.
    pub fn grants_of(&self, user: &str) -> Vec<String> {
        lock(&self.inner)
            .grants
            .iter()
            .filter(|(_, _, _, u)| u == user)
            .map(|(db, privilege, object, _)| format!("{db} {privilege} {object}"))
            .collect()
    }

    /// Statements executed, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.inner).executed.clone()
    }
}

fn accessible(state: &ServerState) -> Vec<String> {
    state
        .databases
        .iter()
        .filter(|(_, db)| db.allow_connections)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Quoted identifiers of a statement, in order.
fn idents(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

/// Unquoted object following `ON `, e.g. a system view.
fn object_after_on(sql: &str) -> String {
    sql.split(" ON ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_owned()
}

#[async_trait]
impl SqlConnector for FakePostgres {
    type Session = FakeSession;

    async fn connect(&self, database: &str) -> Result<FakeSession, RuntimeError> {
        let inner = lock(&self.inner);
        match inner.databases.get(database) {
            None => Err(sql_error(
                "3D000",
                format!("database \"{database}\" does not exist"),
            )),
            Some(db) if db.refuse || !db.allow_connections => Err(RuntimeError::Sql {
                state: None,
                message: "connection refused".into(),
            }),
            Some(_) => Ok(FakeSession {
                server: self.clone(),
                database: database.into(),
            }),
        }
    }
}

/// Session on one database of a [`FakePostgres`]
pub struct FakeSession {
    server: FakePostgres,
    database: String,
}

impl FakeSession {
    fn apply(&self, state: &mut ServerState, sql: &str) -> Result<(), RuntimeError> {
        let ids = idents(sql);
        let user = ids.last().cloned().unwrap_or_default();
        let db = self.database.clone();
        let first = ids.first().cloned().unwrap_or_default();

        if sql.starts_with("CREATE USER") {
            if !state.users.insert(user.clone()) {
                return Err(sql_error("42710", format!("role \"{user}\" already exists")));
            }
            return Ok(());
        }
        if sql.starts_with("DROP USER IF EXISTS") {
            if state.grants.iter().any(|(_, _, _, u)| *u == user) {
                return Err(sql_error(
                    "2BP01",
                    format!("role \"{user}\" cannot be dropped because some objects depend on it"),
                ));
            }
            state.users.remove(&user);
            return Ok(());
        }
        if !state.users.contains(&user) {
            return Err(sql_error("42704", format!("role \"{user}\" does not exist")));
        }

        let (grant, key) = if sql.starts_with("GRANT CONNECT ON DATABASE") {
            (true, (first.clone(), "CONNECT", first))
        } else if sql.starts_with("GRANT USAGE ON SCHEMA") {
            (true, (db, "USAGE", first))
        } else if sql.starts_with("GRANT SELECT ON ALL TABLES IN SCHEMA") {
            (true, (db, "SELECT", first))
        } else if sql.starts_with("ALTER DEFAULT PRIVILEGES IN SCHEMA") && sql.contains(" GRANT ") {
            (true, (db, "DEFAULT", first))
        } else if sql.starts_with("ALTER DEFAULT PRIVILEGES IN SCHEMA") && sql.contains(" REVOKE ") {
            (false, (db, "DEFAULT", first))
        } else if sql.starts_with("GRANT SELECT ON ") {
            (true, (db, "SELECT", object_after_on(sql)))
        } else if sql.starts_with("REVOKE ALL PRIVILEGES ON DATABASE") {
            (false, (first.clone(), "CONNECT", first))
        } else if sql.starts_with("REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA") {
            (false, (db, "SELECT", first))
        } else if sql.starts_with("REVOKE ALL PRIVILEGES ON SCHEMA") {
            (false, (db, "USAGE", first))
        } else if sql.starts_with("REVOKE SELECT ON ") {
            (false, (db, "SELECT", object_after_on(sql)))
        } else {
            return Err(sql_error("42601", format!("syntax error in {sql}")));
        };

        let (database, privilege, object) = key;
        let restricted = state
            .databases
            .get(&database)
            .map_or(false, |db| db.restricted.contains(&object));
        if grant && privilege != "CONNECT" && restricted {
            return Err(sql_error(
                "42501",
                format!("permission denied for schema {object}"),
            ));
        }
        let entry = (database, privilege.to_owned(), object, user);
        if grant {
            state.grants.insert(entry);
        } else {
            state.grants.remove(&entry);
        }
        Ok(())
    }
}

#[async_trait]
impl SqlSession for FakeSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&self, statement: &Statement) -> Result<(), RuntimeError> {
        let mut state = lock(&self.server.inner);
        state.executed.push(statement.sql().to_owned());
        self.apply(&mut state, statement.sql())
    }

    async fn query_column(&self, query: &str) -> Result<Vec<String>, RuntimeError> {
        let state = lock(&self.server.inner);

        if let Some(rest) = query.split("has_database_privilege('").nth(1) {
            let user = rest.split("',").next().unwrap_or_default().replace("''", "'");
            if !state.users.contains(&user) {
                return Err(sql_error("42704", format!("role \"{user}\" does not exist")));
            }
            return Ok(accessible(&state));
        }
        if query.contains("pg_database") || query.contains("svv_redshift_databases") {
            return Ok(accessible(&state));
        }
        if query.contains("pg_namespace") {
            let schemas = state
                .databases
                .get(&self.database)
                .map(|db| db.schemas.clone())
                .unwrap_or_default();
            let usable_only = query.contains("has_schema_privilege");
            let restricted = state
                .databases
                .get(&self.database)
                .map(|db| db.restricted.clone())
                .unwrap_or_default();
            return Ok(schemas
                .into_iter()
                .filter(|s| !s.starts_with("pg_"))
                .filter(|s| !usable_only || !restricted.contains(s))
                .collect());
        }
        Err(sql_error("42601", format!("unsupported query {query}")))
    }
}

#[derive(Default)]
struct KmsState {
    contexts: Vec<EncryptionContext>,
    failures: Vec<String>,
}

/// KMS holding a single data key
pub struct FakeKms {
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    inner: Mutex<KmsState>,
}

impl FakeKms {
    pub fn new(ciphertext: &[u8], plaintext: &[u8]) -> FakeKms {
        FakeKms {
            ciphertext: ciphertext.to_vec(),
            plaintext: plaintext.to_vec(),
            inner: Mutex::default(),
        }
    }

    /// Encryption contexts of every decrypt call.
    pub fn contexts(&self) -> Vec<EncryptionContext> {
        lock(&self.inner).contexts.clone()
    }

    /// Fail the next decrypt call with the AWS error `code`.
    pub fn fail_next(&self, code: &str) {
        lock(&self.inner).failures.push(code.into());
    }
}

#[async_trait]
impl DataKeyApi for FakeKms {
    async fn decrypt_data_key(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut inner = lock(&self.inner);
        if let Some(code) = inner.failures.pop() {
            return Err(aws_error(&code));
        }
        inner.contexts.push(context.clone());
        if ciphertext != self.ciphertext.as_slice() {
            return Err(aws_error("InvalidCiphertextException"));
        }
        Ok(self.plaintext.clone())
    }
}
