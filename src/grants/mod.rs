//! Grant and revoke the fixed read-only permission set of the principal.
//!
//! Targets may name every database or every schema with `*`. Wildcards are
//! resolved against the catalog right before the grant loop, so the result is
//! exactly what the connecting user can reach at that moment.

use crate::error::RuntimeError;
use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

pub mod postgres;
pub mod redshift;

pub use postgres::PostgresGrants;
pub use redshift::RedshiftGrants;

const WILDCARD: &str = "*";

/// A database or schema name, or the wildcard matching all of them
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Selector {
    /// `*`
    All,
    /// A single object
    Named(String),
}

impl Selector {
    /// Whether this is the wildcard.
    pub fn is_all(&self) -> bool {
        matches!(self, Selector::All)
    }
}

impl FromStr for Selector {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(RuntimeError::invalid_property("Schema", "empty name")),
            WILDCARD => Ok(Selector::All),
            name => Ok(Selector::Named(name.to_owned())),
        }
    }
}

/// A `database.schema` grant target
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaTarget {
    /// Database part
    pub database: Selector,
    /// Schema part
    pub schema: Selector,
}

impl FromStr for SchemaTarget {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (database, schema) = s.trim().split_once('.').ok_or_else(|| {
            RuntimeError::invalid_property("Schema", format!("'{s}' is not of the form database.schema"))
        })?;

        Ok(SchemaTarget {
            database: database.parse()?,
            schema: schema.parse()?,
        })
    }
}

/// Parse a list of `database.schema` targets.
pub fn parse_targets<S: AsRef<str>>(items: &[S]) -> Result<Vec<SchemaTarget>, RuntimeError> {
    items.iter().map(|s| s.as_ref().parse()).collect()
}

/// Whether resolving `targets` requires the list of accessible databases.
pub fn needs_database_catalog(targets: &[SchemaTarget]) -> bool {
    targets.iter().any(|t| t.database.is_all())
}

/// Group targets by concrete database. A wildcard database expands to every
/// database in `accessible`. Databases come out sorted and without duplicates.
pub fn resolve_databases(
    targets: &[SchemaTarget],
    accessible: &[String],
) -> BTreeMap<String, BTreeSet<Selector>> {
    let mut resolved: BTreeMap<String, BTreeSet<Selector>> = BTreeMap::new();

    for target in targets {
        let databases: Vec<&str> = match &target.database {
            Selector::All => accessible.iter().map(String::as_str).collect(),
            Selector::Named(name) => vec![name.as_str()],
        };
        for database in databases {
            resolved
                .entry(database.to_owned())
                .or_default()
                .insert(target.schema.clone());
        }
    }
    resolved
}

/// Concrete schemas matched by `selectors`; a wildcard matches every schema
/// in `available`.
pub fn resolve_schemas(selectors: &BTreeSet<Selector>, available: &[String]) -> BTreeSet<String> {
    if selectors.contains(&Selector::All) {
        return available.iter().cloned().collect();
    }
    selectors
        .iter()
        .filter_map(|s| match s {
            Selector::Named(name) => Some(name.clone()),
            Selector::All => None,
        })
        .collect()
}

/// Resolve a list of database selectors, e.g. the Redshift `Db` property.
pub fn resolve_database_list(selectors: &[Selector], accessible: &[String]) -> BTreeSet<String> {
    let selectors: BTreeSet<Selector> = selectors.iter().cloned().collect();
    resolve_schemas(&selectors, accessible)
}
