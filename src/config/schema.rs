use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::schema::{seed_databases, seed_tables, DatabaseSpec, TableSpec};

pub const DEFAULT_CONFIG_FILE: &str = "schemaseed.toml";
pub const ENV_PREFIX: &str = "SCHEMASEED";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct SchemaseedConfig {
    #[serde(default)]
    pub server: Server,
    #[serde(default = "seed_databases")]
    pub databases: Vec<DatabaseSpec>,
    #[serde(default = "seed_tables")]
    pub tables: Vec<TableSpec>,
}

impl Default for SchemaseedConfig {
    fn default() -> Self {
        Self {
            server: Server::default(),
            databases: seed_databases(),
            tables: seed_tables(),
        }
    }
}

/// Where to connect. `dbname` is the maintenance database that the provisioned
/// databases get dropped and created from.
#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

pub fn validate_config(config: SchemaseedConfig) -> Result<SchemaseedConfig, ConfigError> {
    if config.databases.is_empty() {
        return Err(ConfigError::Message(
            "At least one database needs to be configured".to_string(),
        ));
    }

    let mut databases = HashSet::new();
    for database in &config.databases {
        if !databases.insert(database.name()) {
            return Err(ConfigError::Message(format!(
                "Database {:?} is configured more than once",
                database.name()
            )));
        }
    }

    if databases.contains(config.server.dbname.as_str()) {
        return Err(ConfigError::Message(format!(
            "The maintenance database {:?} can't be one of the provisioned databases, \
            since a database can't be dropped while connected to it",
            config.server.dbname
        )));
    }

    let mut tables = HashSet::new();
    for table in &config.tables {
        if !tables.insert(table.name()) {
            return Err(ConfigError::Message(format!(
                "Table {:?} is configured more than once",
                table.name()
            )));
        }
    }

    Ok(config)
}

fn environment(env_override: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .source(env_override)
}

/// Load the config from an (optional) TOML file, with `SCHEMASEED__` environment
/// variables taking precedence over it.
pub fn load_config(path: &Path) -> Result<SchemaseedConfig, ConfigError> {
    let path = path.to_str().ok_or_else(|| {
        ConfigError::Message(format!("Config path {path:?} isn't valid UTF-8"))
    })?;

    let config = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(environment(None));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
    env_override: Option<HashMap<String, String>>,
) -> Result<SchemaseedConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(config_str, FileFormat::Toml))
        .add_source(environment(env_override));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
