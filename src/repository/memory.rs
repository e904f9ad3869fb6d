//! An in-process model of a database server.
//!
//! Interprets the provisioner's [`Statement`]s the way PostgreSQL would, and keeps a
//! log of every statement it ran. Used by `--dry-run` and as the test double for the
//! provisioner. Faults (an unreachable server, a role without CREATEDB, a schema
//! the role can't create tables in) can be injected to exercise the failure paths.
//! Statement failures carry the SQLSTATE PostgreSQL would have returned.
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::error::{DatabaseError, ErrorKind};
use tracing::debug;

use crate::schema::{DatabaseSpec, Statement, TableSpec};

use super::interface::{Error, Repository, Result, Session};

/// One executed statement, as it would have been sent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    pub database: String,
    pub sql: String,
}

#[derive(Debug, Default, Clone)]
struct ServerState {
    // database name -> table name -> declared shape
    databases: BTreeMap<String, HashMap<String, TableSpec>>,
    log: Vec<LoggedStatement>,
    open_sessions: usize,
    unreachable: bool,
    can_create_databases: bool,
    can_create_tables: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryRepository {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                can_create_databases: true,
                can_create_tables: true,
                ..Default::default()
            })),
        }
    }

    /// A server that already hosts the given (empty) databases
    pub fn with_databases<'a, I>(databases: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let repository = Self::new();
        {
            let mut state = repository.state.lock();
            for database in databases {
                state.databases.entry(database.to_string()).or_default();
            }
        }
        repository
    }

    /// Put a table in place directly, bypassing the statement log
    pub fn insert_table(&self, database: &str, table: TableSpec) {
        self.state
            .lock()
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(table.name().to_string(), table);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Toggle the CREATEDB privilege of the connecting role
    pub fn set_can_create_databases(&self, allowed: bool) {
        self.state.lock().can_create_databases = allowed;
    }

    /// Toggle the CREATE privilege on the schema tables are created in
    pub fn set_can_create_tables(&self, allowed: bool) {
        self.state.lock().can_create_tables = allowed;
    }

    pub fn databases(&self) -> BTreeSet<String> {
        self.state.lock().databases.keys().cloned().collect()
    }

    pub fn tables(&self, database: &str) -> Option<BTreeSet<String>> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
    }

    pub fn table(&self, database: &str, table: &str) -> Option<TableSpec> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|tables| tables.get(table).cloned())
    }

    pub fn statements(&self) -> Vec<LoggedStatement> {
        self.state.lock().log.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }
}

fn connection_refused(database: &str) -> Error {
    Error::Connection {
        database: database.to_string(),
        source: sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        )),
    }
}

/// An error as the server would report it
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ServerError {
    code: &'static str,
    message: String,
}

impl DatabaseError for ServerError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

fn server_error(code: &'static str, message: String) -> sqlx::Error {
    sqlx::Error::Database(Box::new(ServerError { code, message }))
}

fn permission_denied(database: &str, statement: &Statement<'_>, message: String) -> Error {
    Error::Permission {
        database: database.to_string(),
        statement: statement.to_string(),
        source: server_error("42501", message),
    }
}

fn statement_failed(
    database: &str,
    statement: &Statement<'_>,
    code: &'static str,
    message: String,
) -> Error {
    Error::Statement {
        database: database.to_string(),
        statement: statement.to_string(),
        source: server_error(code, message),
    }
}

impl ServerState {
    fn apply(&mut self, database: &str, statement: &Statement<'_>) -> Result<()> {
        if self.unreachable {
            return Err(connection_refused(database));
        }

        if statement.is_database_level() && !self.can_create_databases {
            return Err(permission_denied(
                database,
                statement,
                "permission denied to create database".to_string(),
            ));
        }
        if !statement.is_database_level() && !self.can_create_tables {
            return Err(permission_denied(
                database,
                statement,
                "permission denied for schema public".to_string(),
            ));
        }

        match statement {
            Statement::DropDatabase(target) => {
                if target.name() == database {
                    return Err(statement_failed(
                        database,
                        statement,
                        "55006",
                        "cannot drop the currently open database".to_string(),
                    ));
                }
                self.databases.remove(target.name());
            }
            Statement::CreateDatabase(target) => {
                if self.databases.contains_key(target.name()) {
                    return Err(statement_failed(
                        database,
                        statement,
                        "42P04",
                        format!("database \"{target}\" already exists"),
                    ));
                }
                self.databases.insert(target.name().to_string(), HashMap::new());
            }
            Statement::CreateTable(table) => {
                let Some(tables) = self.databases.get_mut(database) else {
                    return Err(statement_failed(
                        database,
                        statement,
                        "3D000",
                        format!("database \"{database}\" does not exist"),
                    ));
                };
                tables
                    .entry(table.name().to_string())
                    .or_insert_with(|| (*table).clone());
            }
        }

        self.log.push(LoggedStatement {
            database: database.to_string(),
            sql: statement.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    type Session = MemorySession;

    async fn connect(&self, database: &str) -> Result<MemorySession> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(connection_refused(database));
        }
        if !state.databases.contains_key(database) {
            return Err(Error::MissingDatabase {
                name: database.to_string(),
            });
        }

        state.open_sessions += 1;
        debug!("Opened in-memory session on {database}");

        Ok(MemorySession {
            database: database.to_string(),
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemorySession {
    database: String,
    state: Arc<Mutex<ServerState>>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state.lock().open_sessions -= 1;
    }
}

#[async_trait]
impl Session for MemorySession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, statement: &Statement<'_>) -> Result<()> {
        self.state.lock().apply(&self.database, statement)
    }

    async fn transaction(&mut self, statements: &[Statement<'_>]) -> Result<()> {
        let mut state = self.state.lock();

        // Apply to a copy so that a failure leaves nothing behind
        let mut staged = state.clone();
        for statement in statements {
            staged.apply(&self.database, statement)?;
        }

        *state = staged;
        Ok(())
    }

    async fn database_exists(&mut self, database: &DatabaseSpec) -> Result<bool> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(connection_refused(&self.database));
        }
        Ok(state.databases.contains_key(database.name()))
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(connection_refused(&self.database));
        }
        Ok(state
            .databases
            .get(&self.database)
            .map(|tables| tables.contains_key(table))
            .unwrap_or(false))
    }

    async fn close(self) -> Result<()> {
        debug!("Closed in-memory session on {}", self.database);
        Ok(())
    }
}
