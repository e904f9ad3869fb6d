use clap::Subcommand;

/// Provisioning steps, in the order a fresh server needs them
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Drop and recreate every configured database. Destroys their contents.
    Databases,
    /// Create the configured tables in every database, skipping existing ones
    Tables {
        /// Only provision the named table(s)
        #[clap(short, long = "table", value_name = "NAME")]
        tables: Vec<String>,
    },
    /// Recreate the databases, then create the tables
    All,
    /// Print which databases and tables are present
    Check,
}
