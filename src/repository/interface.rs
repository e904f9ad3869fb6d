use std::fmt::Debug;

use async_trait::async_trait;

use crate::schema::{DatabaseSpec, Statement};

/// Failures a provisioning run can hit. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Server unreachable, TLS/IO failure or rejected credentials
    #[error("Failed connecting to database {database:?}: {source}")]
    Connection {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Permission denied in database {database:?} running {statement:?}: {source}")]
    Permission {
        database: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Statement {statement:?} failed in database {database:?}: {source}")]
    Statement {
        database: String,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "Database {name:?} doesn't exist, recreate the databases before provisioning tables"
    )]
    MissingDatabase { name: String },

    #[error("Refusing to recreate {name:?}, the database the recreation runs from")]
    MaintenanceDatabase { name: String },

    #[error("Invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A server that can open connections to one of its databases by name.
#[async_trait]
pub trait Repository: Send + Sync + Debug {
    type Session: Session;

    /// Open a connection to `database`. Fails with [`Error::MissingDatabase`]
    /// if the server has no database under that name.
    async fn connect(&self, database: &str) -> Result<Self::Session>;
}

/// One open connection. Dropping a session releases the underlying connection,
/// [`Session::close`] additionally waits for the server to acknowledge it.
#[async_trait]
pub trait Session: Send + Sized {
    fn database(&self) -> &str;

    /// Run a statement in autocommit mode
    async fn execute(&mut self, statement: &Statement<'_>) -> Result<()>;

    /// Run all statements in one transaction and commit it
    async fn transaction(&mut self, statements: &[Statement<'_>]) -> Result<()>;

    async fn database_exists(&mut self, database: &DatabaseSpec) -> Result<bool>;

    /// Whether `table` exists in the schema this session resolves names against
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    async fn close(self) -> Result<()>;
}
