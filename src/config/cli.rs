use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the rowcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "rowcache",
    version,
    about = "Cached data access over a relational store"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ROWCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load configuration and validate the model registry.
    Check,
    /// Fetch one row by primary key.
    #[command(name = "find-one")]
    FindOne(FindOneArgs),
    /// Fetch one page of rows.
    List(ListArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT", global = true)]
    pub database_max_connections: Option<u32>,

    /// Turn the cache on or off.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the per-tier entry bound.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct FindOneArgs {
    /// Registered model name.
    #[arg(long, value_name = "MODEL")]
    pub model: String,

    /// Primary key value; digits are read as an integer key.
    #[arg(long, value_name = "ID")]
    pub id: String,

    /// Columns to return, comma separated. Defaults to every column.
    #[arg(long, value_name = "COLUMNS", value_delimiter = ',')]
    pub select: Vec<String>,

    /// Relations to attach, comma separated.
    #[arg(long, value_name = "RELATIONS", value_delimiter = ',')]
    pub include: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    /// Registered model name.
    #[arg(long, value_name = "MODEL")]
    pub model: String,

    /// Filter as JSON, e.g. `{"op":"eq","column":"status","value":"active"}`.
    #[arg(long = "where", value_name = "JSON")]
    pub where_json: Option<String>,

    /// Ordering columns, comma separated; prefix with `-` for descending.
    #[arg(
        long = "order-by",
        value_name = "COLUMNS",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub order_by: Vec<String>,

    /// Columns to return, comma separated. Defaults to every column.
    #[arg(long, value_name = "COLUMNS", value_delimiter = ',')]
    pub select: Vec<String>,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long = "per-page", default_value_t = 20)]
    pub per_page: u32,
}
