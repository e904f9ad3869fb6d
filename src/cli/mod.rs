mod commands;

use std::io::{self, Write};
use std::iter;
use std::path::PathBuf;

use clap::Parser;
use config::ConfigError;
use itertools::Itertools;
use tracing::info;

pub use commands::Command;

use crate::config::schema::{load_config, SchemaseedConfig, DEFAULT_CONFIG_FILE};
use crate::provisioner::{DatabaseStatus, Provisioner};
use crate::repository::interface::{self, Repository};
use crate::repository::memory::MemoryRepository;
use crate::repository::postgres::PostgresRepository;
use crate::schema::TableSpec;

#[derive(Debug, Parser)]
#[clap(name = "schemaseed", version, about)]
pub struct Args {
    #[clap(short = 'c', long, default_value = DEFAULT_CONFIG_FILE)]
    pub config_path: PathBuf,

    /// Run against an in-memory server and print the statements instead
    #[clap(long)]
    pub dry_run: bool,

    /// Emit logs as JSON
    #[clap(long)]
    pub json_logs: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provisioning(#[from] interface::Error),

    #[error("Unknown table {name:?}, configured tables are: {known}")]
    UnknownTable { name: String, known: String },

    #[error("Failed writing output: {0}")]
    Output(#[from] io::Error),
}

fn select_tables(
    config: &SchemaseedConfig,
    names: &[String],
) -> Result<Vec<TableSpec>, CliError> {
    if names.is_empty() {
        return Ok(config.tables.clone());
    }

    names
        .iter()
        .map(|name| {
            config
                .tables
                .iter()
                .find(|t| t.name() == name)
                .cloned()
                .ok_or_else(|| CliError::UnknownTable {
                    name: name.clone(),
                    known: config.tables.iter().map(|t| t.name()).join(", "),
                })
        })
        .collect()
}

fn print_statuses(out: &mut impl Write, statuses: &[DatabaseStatus]) -> io::Result<()> {
    fn presence(present: bool) -> &'static str {
        if present {
            "present"
        } else {
            "missing"
        }
    }

    for database in statuses {
        writeln!(out, "{}: {}", database.name, presence(database.present))?;
        for table in &database.tables {
            writeln!(out, "  {}.{}: {}", database.name, table.name, presence(table.present))?;
        }
    }
    Ok(())
}

async fn execute<R: Repository>(
    provisioner: &Provisioner<R>,
    command: &Command,
    config: &SchemaseedConfig,
) -> Result<(), CliError> {
    match command {
        Command::Databases => {
            provisioner.recreate_databases(&config.databases).await?;
        }
        Command::Tables { tables } => {
            let tables = select_tables(config, tables)?;
            provisioner.ensure_tables(&config.databases, &tables).await?;
        }
        Command::All => {
            provisioner
                .provision(&config.databases, &config.tables)
                .await?;
        }
        Command::Check => {
            let statuses = provisioner
                .inspect(&config.databases, &config.tables)
                .await?;
            print_statuses(&mut io::stdout().lock(), &statuses)?;
        }
    }
    Ok(())
}

// In-memory server holding the maintenance and configured databases
fn dry_run_repository(config: &SchemaseedConfig) -> MemoryRepository {
    MemoryRepository::with_databases(
        iter::once(config.server.dbname.as_str())
            .chain(config.databases.iter().map(|d| d.name())),
    )
}

/// Run the command against the configured server, or print the statements it
/// would send if `--dry-run` is set
pub async fn run_command(args: &Args, config: &SchemaseedConfig) -> Result<(), CliError> {
    let maintenance = config.server.dbname.as_str();

    if args.dry_run {
        let repository = dry_run_repository(config);
        let provisioner = Provisioner::new(repository.clone(), maintenance);
        execute(&provisioner, &args.command, config).await?;

        let mut out = io::stdout().lock();
        for statement in repository.statements() {
            writeln!(out, "{}: {};", statement.database, statement.sql)?;
        }
        Ok(())
    } else {
        info!(
            "Provisioning on {}:{} as {}",
            config.server.host, config.server.port, config.server.user
        );
        let provisioner = Provisioner::new(PostgresRepository::new(&config.server), maintenance);
        execute(&provisioner, &args.command, config).await
    }
}

pub async fn run(args: &Args) -> Result<(), CliError> {
    let config = load_config(&args.config_path)?;
    run_command(args, &config).await
}
