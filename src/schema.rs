use std::collections::HashSet;
use std::fmt::{self, Display};
use std::str::FromStr;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::repository::interface::{Error, Result};

/// Databases recreated by a default run
pub const SEED_DATABASES: [&str; 2] = ["source", "target"];

// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes
const MAX_IDENTIFIER_LEN: usize = 63;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
    static ref VARCHAR_RE: Regex = Regex::new(r"^varchar\s*\(\s*(\d+)\s*\)$").unwrap();
}

/// Check that `name` can be interpolated unquoted into a DDL statement.
pub fn validate_identifier(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "identifier is empty"
    } else if name.len() > MAX_IDENTIFIER_LEN {
        "identifier is longer than 63 bytes"
    } else if !IDENTIFIER_RE.is_match(name) {
        "only lowercase letters, digits and underscores are allowed, \
        and the first character can't be a digit"
    } else {
        return Ok(());
    };

    Err(Error::InvalidIdentifier {
        name: name.to_string(),
        reason,
    })
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub struct DatabaseSpec {
    name: String,
}

impl DatabaseSpec {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TryFrom<String> for DatabaseSpec {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl Display for DatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Column types the provisioner knows how to declare
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum ColumnType {
    Varchar(u32),
    Text,
    Integer,
    BigInt,
    Boolean,
    Timestamp,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Varchar(length) => write!(f, "varchar({length})"),
            Self::Text => f.write_str("text"),
            Self::Integer => f.write_str("integer"),
            Self::BigInt => f.write_str("bigint"),
            Self::Boolean => f.write_str("boolean"),
            Self::Timestamp => f.write_str("timestamp"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();

        if let Some(captures) = VARCHAR_RE.captures(&lowered) {
            return match captures[1].parse::<u32>() {
                Ok(length) if length > 0 => Ok(Self::Varchar(length)),
                _ => Err(format!("Invalid varchar length in {s:?}")),
            };
        }

        Ok(match lowered.as_str() {
            "text" => Self::Text,
            "integer" | "int" | "int4" => Self::Integer,
            "bigint" | "int8" => Self::BigInt,
            "boolean" | "bool" => Self::Boolean,
            "timestamp" => Self::Timestamp,
            _ => return Err(format!("Unsupported column type {s:?}")),
        })
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "ColumnDefinition")]
pub struct ColumnSpec {
    name: String,
    data_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self { name, data_type })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ColumnType {
        self.data_type
    }
}

// Unchecked shapes as they appear in the config file
#[derive(Deserialize)]
struct ColumnDefinition {
    name: String,
    #[serde(rename = "type")]
    data_type: ColumnType,
}

impl TryFrom<ColumnDefinition> for ColumnSpec {
    type Error = Error;

    fn try_from(column: ColumnDefinition) -> Result<Self> {
        Self::new(column.name, column.data_type)
    }
}

#[derive(Deserialize)]
struct TableDefinition {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl TryFrom<TableDefinition> for TableSpec {
    type Error = Error;

    fn try_from(table: TableDefinition) -> Result<Self> {
        let table = Self {
            name: table.name,
            columns: table.columns,
        };
        table.validate()?;
        Ok(table)
    }
}

/// Declared shape of a table. Created if absent, never altered afterwards.
///
/// Every way of building one checks the table and column names, so both can be
/// interpolated into DDL as they are.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "TableDefinition")]
pub struct TableSpec {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new<'a, I>(name: &str, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, ColumnType)>,
    {
        let table = Self {
            name: name.to_string(),
            columns: columns
                .into_iter()
                .map(|(name, data_type)| ColumnSpec::new(name, data_type))
                .collect::<Result<_>>()?,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;

        if self.columns.is_empty() {
            return Err(Error::InvalidIdentifier {
                name: self.name.clone(),
                reason: "table has no columns",
            });
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::InvalidIdentifier {
                    name: format!("{}.{}", self.name, column.name),
                    reason: "column is declared more than once",
                });
            }
        }

        Ok(())
    }
}

const NOTIFICATIONS: &[(&str, ColumnType)] = &[
    ("study_uid", ColumnType::Varchar(100)),
    ("notification_time", ColumnType::Varchar(100)),
    ("patient", ColumnType::Varchar(100)),
    ("users", ColumnType::Varchar(1000)),
    ("cre_datetime", ColumnType::Timestamp),
];

const SCANS: &[(&str, ColumnType)] = &[
    ("study_uid", ColumnType::Varchar(100)),
    ("viz_lvo", ColumnType::Varchar(100)),
    ("first_acquired", ColumnType::Varchar(100)),
    ("patient_first_acquired", ColumnType::Varchar(100)),
    ("patient_institution", ColumnType::Varchar(100)),
    ("patient", ColumnType::Varchar(100)),
    ("cre_datetime", ColumnType::Timestamp),
];

const USERS: &[(&str, ColumnType)] = &[
    ("name", ColumnType::Varchar(100)),
    ("address", ColumnType::Varchar(100)),
    ("user_uid", ColumnType::Varchar(100)),
    ("cre_datetime", ColumnType::Timestamp),
];

fn seed_table(name: &str, columns: &[(&str, ColumnType)]) -> TableSpec {
    TableSpec {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|(name, data_type)| ColumnSpec {
                name: name.to_string(),
                data_type: *data_type,
            })
            .collect(),
    }
}

pub fn seed_databases() -> Vec<DatabaseSpec> {
    SEED_DATABASES
        .iter()
        .map(|name| DatabaseSpec {
            name: name.to_string(),
        })
        .collect()
}

/// The notifications, scans and users tables provisioned in every seed database
pub fn seed_tables() -> Vec<TableSpec> {
    vec![
        seed_table("notifications", NOTIFICATIONS),
        seed_table("scans", SCANS),
        seed_table("users", USERS),
    ]
}

/// A DDL statement issued by the provisioner. Renders to the exact SQL text sent
/// to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement<'a> {
    DropDatabase(&'a DatabaseSpec),
    CreateDatabase(&'a DatabaseSpec),
    CreateTable(&'a TableSpec),
}

impl Statement<'_> {
    /// Whether the statement needs CREATE/DROP DATABASE privileges
    pub fn is_database_level(&self) -> bool {
        matches!(self, Self::DropDatabase(_) | Self::CreateDatabase(_))
    }
}

impl Display for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropDatabase(database) => write!(f, "DROP DATABASE IF EXISTS {database}"),
            Self::CreateDatabase(database) => write!(f, "CREATE DATABASE {database}"),
            Self::CreateTable(table) => write!(
                f,
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table.name,
                table
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .join(", ")
            ),
        }
    }
}
