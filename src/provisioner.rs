//! Recreates databases and makes sure the declared tables exist in them.
//!
//! Databases are reset destructively: `DROP DATABASE IF EXISTS` followed by
//! `CREATE DATABASE`, issued in autocommit mode from the maintenance database.
//! Tables are created with `CREATE TABLE IF NOT EXISTS` inside a committed
//! transaction, so provisioning them repeatedly is a no-op. Existing tables are
//! never altered, whatever their columns.
//!
//! Every operation opens its own connection and releases it before returning,
//! including when a statement fails. Nothing is retried or rolled back.
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::repository::interface::{Error, Repository, Result, Session};
use crate::schema::{DatabaseSpec, Statement, TableSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TableOutcome {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStatus {
    pub name: String,
    pub present: bool,
    // Empty when the database itself is missing
    pub tables: Vec<TableStatus>,
}

/// Close the session, then surface the first error. Closing happens regardless of
/// how `result` turned out.
async fn release<S: Session, T>(session: S, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            session.close().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(close_error) = session.close().await {
                warn!("Failed to close the connection after an error: {close_error}");
            }
            Err(error)
        }
    }
}

#[derive(Debug)]
pub struct Provisioner<R: Repository> {
    repository: R,
    maintenance_database: String,
}

impl<R: Repository> Provisioner<R> {
    /// `maintenance_database` is where database-level statements are run from. It
    /// must never be one of the databases being recreated.
    pub fn new(repository: R, maintenance_database: impl Into<String>) -> Self {
        Self {
            repository,
            maintenance_database: maintenance_database.into(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    async fn drop_and_create(session: &mut R::Session, database: &DatabaseSpec) -> Result<()> {
        if database.name() == session.database() {
            return Err(Error::MaintenanceDatabase {
                name: database.name().to_string(),
            });
        }

        session.execute(&Statement::DropDatabase(database)).await?;
        session.execute(&Statement::CreateDatabase(database)).await?;
        info!("Recreated database {database}");
        Ok(())
    }

    /// Drop `database` if it exists and create it again, empty. Any data it held is
    /// gone afterwards.
    pub async fn recreate_database(&self, database: &DatabaseSpec) -> Result<()> {
        self.recreate_databases(std::slice::from_ref(database)).await
    }

    /// Recreate each database in order, over a single maintenance connection
    pub async fn recreate_databases(&self, databases: &[DatabaseSpec]) -> Result<()> {
        let mut session = self.repository.connect(&self.maintenance_database).await?;

        let mut result = Ok(());
        for database in databases {
            result = Self::drop_and_create(&mut session, database).await;
            if result.is_err() {
                break;
            }
        }

        release(session, result).await
    }

    async fn create_if_absent(session: &mut R::Session, table: &TableSpec) -> Result<TableOutcome> {
        if session.table_exists(table.name()).await? {
            debug!(
                "Table {} already exists in {}, leaving it untouched",
                table.name(),
                session.database()
            );
            return Ok(TableOutcome::AlreadyPresent);
        }

        // Still conditional: another run may have created it since the probe
        session
            .transaction(&[Statement::CreateTable(table)])
            .await?;
        Ok(TableOutcome::Created)
    }

    /// Create `table` in `database` unless a table with that name is already there.
    pub async fn ensure_table(
        &self,
        database: &DatabaseSpec,
        table: &TableSpec,
    ) -> Result<TableOutcome> {
        let mut session = self.repository.connect(database.name()).await?;
        let result = Self::create_if_absent(&mut session, table).await;
        let outcome = release(session, result).await?;

        match outcome {
            TableOutcome::Created => {
                info!("Created table {} in {database}", table.name())
            }
            TableOutcome::AlreadyPresent => {
                info!("Table {} already present in {database}", table.name())
            }
        }
        Ok(outcome)
    }

    /// Fail with [`Error::MissingDatabase`] unless every database exists
    pub async fn check_databases_exist(&self, databases: &[DatabaseSpec]) -> Result<()> {
        let mut session = self.repository.connect(&self.maintenance_database).await?;

        let mut result = Ok(());
        for database in databases {
            match session.database_exists(database).await {
                Ok(true) => {}
                Ok(false) => {
                    result = Err(Error::MissingDatabase {
                        name: database.name().to_string(),
                    });
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        release(session, result).await
    }

    /// Ensure every table in every database. Nothing is created unless all the
    /// databases are already there.
    pub async fn ensure_tables(
        &self,
        databases: &[DatabaseSpec],
        tables: &[TableSpec],
    ) -> Result<Vec<(String, String, TableOutcome)>> {
        self.check_databases_exist(databases).await?;

        let mut outcomes = Vec::with_capacity(databases.len() * tables.len());
        for database in databases {
            for table in tables {
                let outcome = self.ensure_table(database, table).await?;
                outcomes.push((
                    database.name().to_string(),
                    table.name().to_string(),
                    outcome,
                ));
            }
        }
        Ok(outcomes)
    }

    /// Recreate the databases, then create the tables in them
    pub async fn provision(
        &self,
        databases: &[DatabaseSpec],
        tables: &[TableSpec],
    ) -> Result<Vec<(String, String, TableOutcome)>> {
        self.recreate_databases(databases).await?;
        self.ensure_tables(databases, tables).await
    }

    /// Report which databases and tables exist. Read-only.
    pub async fn inspect(
        &self,
        databases: &[DatabaseSpec],
        tables: &[TableSpec],
    ) -> Result<Vec<DatabaseStatus>> {
        let mut present = Vec::with_capacity(databases.len());
        {
            let mut session = self.repository.connect(&self.maintenance_database).await?;
            let mut result = Ok(());
            for database in databases {
                match session.database_exists(database).await {
                    Ok(exists) => present.push(exists),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            release(session, result).await?;
        }

        let mut statuses = Vec::with_capacity(databases.len());
        for (database, exists) in databases.iter().zip(present) {
            let mut table_statuses = vec![];
            if exists {
                let mut session = self.repository.connect(database.name()).await?;
                let mut result = Ok(());
                for table in tables {
                    match session.table_exists(table.name()).await {
                        Ok(present) => table_statuses.push(TableStatus {
                            name: table.name().to_string(),
                            present,
                        }),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                release(session, result).await?;
            }

            statuses.push(DatabaseStatus {
                name: database.name().to_string(),
                present: exists,
                tables: table_statuses,
            });
        }

        Ok(statuses)
    }
}
