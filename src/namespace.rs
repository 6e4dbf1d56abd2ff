/*!
 * @file namespace.rs
 * @brief Database/Collection handles and the namespace they address
 */

use std::sync::Arc;

use crate::connection::Connection;

/// `"database.collection"` pair. The special collection `$cmd` carries
/// legacy `runCommand` queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: strip_dots(database.into()),
            collection: collection.into(),
        }
    }

    pub fn command(database: impl Into<String>) -> Self {
        Self::new(database, "$cmd")
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

fn strip_dots(name: String) -> String {
    if name.contains('.') {
        name.chars().filter(|&c| c != '.').collect()
    } else {
        name
    }
}

/// Pure handle onto a database; holds a reference to the owning
/// connection, no resources of its own.
#[derive(Clone)]
pub struct Database {
    pub(crate) connection: Arc<Connection>,
    pub(crate) name: String,
}

impl Database {
    pub(crate) fn new(connection: Arc<Connection>, name: impl Into<String>) -> Self {
        Self {
            connection,
            name: strip_dots(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.clone(), name)
    }

    pub(crate) fn command_namespace(&self) -> Namespace {
        Namespace::command(self.name.clone())
    }
}

/// Pure handle onto a collection; `full_name` is `"<db>.<coll>"`.
#[derive(Clone)]
pub struct Collection {
    pub(crate) database: Database,
    pub(crate) name: String,
}

impl Collection {
    pub(crate) fn new(database: Database, name: impl Into<String>) -> Self {
        Self {
            database,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database.name, self.name)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.database.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_strips_dots_from_database_name() {
        let ns = Namespace::new("my.db", "coll");
        assert_eq!(ns.database, "mydb");
        assert_eq!(ns.full_name(), "mydb.coll");
    }

    #[test]
    fn command_namespace_targets_dollar_cmd() {
        let ns = Namespace::command("admin");
        assert_eq!(ns.full_name(), "admin.$cmd");
    }
}
