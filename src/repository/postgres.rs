use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    Connection, Executor,
};
use tracing::debug;

use crate::config::schema::Server;
use crate::schema::{DatabaseSpec, Statement};

use super::interface::{Error, Repository, Result, Session};

const DATABASE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";
// pg_class lists every relation regardless of the role's privileges on it, unlike
// information_schema.tables
const TABLE_EXISTS: &str = "SELECT EXISTS (
    SELECT 1 FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = current_schema() AND c.relname = $1
)";

#[derive(Debug, Clone)]
pub struct PostgresRepository {
    options: PgConnectOptions,
}

impl PostgresRepository {
    pub fn new(server: &Server) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&server.host)
            .port(server.port)
            .username(&server.user)
            .application_name(env!("CARGO_PKG_NAME"));
        if let Some(password) = &server.password {
            options = options.password(password);
        }

        Self { options }
    }

    // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
    fn sqlstate(error: &sqlx::Error) -> Option<String> {
        if let sqlx::Error::Database(ref d) = error {
            d.code().map(|code| code.into_owned())
        } else {
            None
        }
    }

    fn is_connection_failure(error: &sqlx::Error) -> bool {
        match Self::sqlstate(error) {
            Some(code) => {
                code.starts_with("08") || code.starts_with("28") || code.starts_with("57P")
            }
            None => matches!(
                error,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::Configuration(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
        }
    }

    pub fn interpret_connect_error(database: &str, error: sqlx::Error) -> Error {
        match Self::sqlstate(&error).as_deref() {
            Some("3D000") => Error::MissingDatabase {
                name: database.to_string(),
            },
            // No CONNECT privilege on the database
            Some("42501") => Error::Permission {
                database: database.to_string(),
                statement: "CONNECT".to_string(),
                source: error,
            },
            _ => Error::Connection {
                database: database.to_string(),
                source: error,
            },
        }
    }

    pub fn interpret_error(database: &str, statement: &str, error: sqlx::Error) -> Error {
        if Self::is_connection_failure(&error) {
            return Error::Connection {
                database: database.to_string(),
                source: error,
            };
        }

        if Self::sqlstate(&error).as_deref() == Some("42501") {
            Error::Permission {
                database: database.to_string(),
                statement: statement.to_string(),
                source: error,
            }
        } else {
            Error::Statement {
                database: database.to_string(),
                statement: statement.to_string(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    type Session = PostgresSession;

    async fn connect(&self, database: &str) -> Result<PostgresSession> {
        let options = self.options.clone().database(database);
        debug!("Connecting to database {database}");

        let connection = PgConnection::connect_with(&options)
            .await
            .map_err(|e| PostgresRepository::interpret_connect_error(database, e))?;

        Ok(PostgresSession {
            database: database.to_string(),
            connection,
        })
    }
}

#[derive(Debug)]
pub struct PostgresSession {
    database: String,
    connection: PgConnection,
}

impl PostgresSession {
    async fn fetch_flag(&mut self, query: &str, argument: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(query)
            .bind(argument)
            .fetch_one(&mut self.connection)
            .await
            .map_err(|e| PostgresRepository::interpret_error(&self.database, query, e))
    }
}

#[async_trait]
impl Session for PostgresSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, statement: &Statement<'_>) -> Result<()> {
        let sql = statement.to_string();
        debug!(database = self.database.as_str(), "{sql}");

        (&mut self.connection)
            .execute(sql.as_str())
            .await
            .map_err(|e| PostgresRepository::interpret_error(&self.database, &sql, e))?;
        Ok(())
    }

    async fn transaction(&mut self, statements: &[Statement<'_>]) -> Result<()> {
        let mut tx = self
            .connection
            .begin()
            .await
            .map_err(|e| PostgresRepository::interpret_error(&self.database, "BEGIN", e))?;

        for statement in statements {
            let sql = statement.to_string();
            debug!(database = self.database.as_str(), "{sql}");

            // An early return drops `tx`, which rolls it back
            (&mut *tx)
                .execute(sql.as_str())
                .await
                .map_err(|e| PostgresRepository::interpret_error(&self.database, &sql, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| PostgresRepository::interpret_error(&self.database, "COMMIT", e))
    }

    async fn database_exists(&mut self, database: &DatabaseSpec) -> Result<bool> {
        self.fetch_flag(DATABASE_EXISTS, database.name()).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.fetch_flag(TABLE_EXISTS, table).await
    }

    async fn close(self) -> Result<()> {
        let database = self.database;
        self.connection
            .close()
            .await
            .map_err(|source| Error::Connection { database, source })
    }
}
