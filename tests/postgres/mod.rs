// Runs against a live server configured through SCHEMASEED__SERVER__* variables, e.g.
//
//   SCHEMASEED__SERVER__PASSWORD=... cargo test -- --ignored
//
// The tests drop and recreate "source" and "target" on that server.

use std::collections::HashMap;

use schemaseed::config::schema::{load_config_from_string, Server};
use schemaseed::provisioner::{Provisioner, TableOutcome};
use schemaseed::repository::interface::{Error, Repository, Session};
use schemaseed::repository::postgres::PostgresRepository;
use schemaseed::schema::{
    seed_databases, seed_tables, ColumnType, DatabaseSpec, Statement, TableSpec,
};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};

const READER: &str = "schemaseed_reader";

fn provisioner() -> Provisioner<PostgresRepository> {
    let config = load_config_from_string("", false, None).expect("config");
    Provisioner::new(PostgresRepository::new(&config.server), config.server.dbname)
}

async fn table_exists(provisioner: &Provisioner<PostgresRepository>, db: &str, table: &str) -> bool {
    let mut session = provisioner.repository().connect(db).await.unwrap();
    let exists = session.table_exists(table).await.unwrap();
    session.close().await.unwrap();
    exists
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_postgres_provisioning() {
    let provisioner = provisioner();
    let databases = seed_databases();
    let tables = seed_tables();

    provisioner.recreate_databases(&databases).await.unwrap();

    // Put an unrelated table in place, then check the reset discards it
    let source = DatabaseSpec::new("source").unwrap();
    let foo = TableSpec::new("foo", [("id", ColumnType::Integer)]).unwrap();
    provisioner.ensure_table(&source, &foo).await.unwrap();
    assert!(table_exists(&provisioner, "source", "foo").await);

    provisioner.recreate_database(&source).await.unwrap();
    assert!(!table_exists(&provisioner, "source", "foo").await);

    let first = provisioner.ensure_tables(&databases, &tables).await.unwrap();
    assert!(first.iter().all(|(_, _, o)| *o == TableOutcome::Created));

    let second = provisioner.ensure_tables(&databases, &tables).await.unwrap();
    assert!(second.iter().all(|(_, _, o)| *o == TableOutcome::AlreadyPresent));

    let statuses = provisioner.inspect(&databases, &tables).await.unwrap();
    assert!(statuses
        .iter()
        .all(|d| d.present && d.tables.iter().all(|t| t.present)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_postgres_statement_errors() {
    let provisioner = provisioner();
    let missing = DatabaseSpec::new("schemaseed_missing_database").unwrap();

    let err = provisioner
        .ensure_table(&missing, &seed_tables()[0])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingDatabase { .. }), "{err}");

    // CREATE DATABASE can't run inside a transaction block
    let mut session = provisioner.repository().connect("source").await.unwrap();
    let err = session
        .transaction(&[Statement::CreateDatabase(&missing)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Statement { .. }), "{err}");
    session.close().await.unwrap();
}

async fn admin_connection(server: &Server, database: &str) -> PgConnection {
    let mut options = PgConnectOptions::new()
        .host(&server.host)
        .port(server.port)
        .username(&server.user)
        .database(database);
    if let Some(password) = &server.password {
        options = options.password(password);
    }
    PgConnection::connect_with(&options).await.unwrap()
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_postgres_table_probe_ignores_privileges() {
    let config = load_config_from_string("", false, None).unwrap();
    let provisioner = provisioner();
    let source = DatabaseSpec::new("source").unwrap();

    provisioner.recreate_database(&source).await.unwrap();
    provisioner
        .ensure_table(&source, &seed_tables()[2])
        .await
        .unwrap();

    // A role with no privileges on "users" at all
    let mut admin = admin_connection(&config.server, "source").await;
    admin
        .execute(
            format!(
                "DROP ROLE IF EXISTS {READER}; \
                CREATE ROLE {READER} LOGIN PASSWORD '{READER}'; \
                REVOKE ALL ON users FROM PUBLIC"
            )
            .as_str(),
        )
        .await
        .unwrap();

    let reader = Server {
        user: READER.to_string(),
        password: Some(READER.to_string()),
        ..config.server.clone()
    };
    let mut session = PostgresRepository::new(&reader)
        .connect("source")
        .await
        .unwrap();
    let users = session.table_exists("users").await.unwrap();
    let scans = session.table_exists("scans").await.unwrap();
    session.close().await.unwrap();

    admin
        .execute(format!("DROP ROLE {READER}").as_str())
        .await
        .unwrap();
    admin.close().await.unwrap();

    assert!(users);
    assert!(!scans);
}

#[tokio::test]
async fn test_postgres_unreachable() {
    let env = HashMap::from([
        ("SCHEMASEED__SERVER__HOST".to_string(), "127.0.0.1".to_string()),
        ("SCHEMASEED__SERVER__PORT".to_string(), "1".to_string()),
    ]);
    let config = load_config_from_string("", false, Some(env)).unwrap();
    let provisioner = Provisioner::new(PostgresRepository::new(&config.server), "postgres");

    let err = provisioner
        .recreate_databases(&seed_databases())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{err}");
}
