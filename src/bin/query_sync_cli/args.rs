//! Command-line surface for `query-sync-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use query_sync::config::SettingsOverrides;
use query_sync::record::DEFAULT_ID_FIELD;

#[derive(Parser, Debug)]
#[command(
    name = "query-sync-cli",
    version,
    about = "Read and write a REST resource through the query-sync cache",
    long_about = None
)]
pub struct Cli {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUERY_SYNC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    /// Endpoint path relative to the base URL; defaults to the resource name
    #[arg(long, value_name = "PATH")]
    pub endpoint: Option<String>,

    /// Record field holding the identifier
    #[arg(long = "id-field", default_value = DEFAULT_ID_FIELD)]
    pub id_field: String,

    /// Resource name, e.g. `briefs`
    pub resource: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one list page
    List {
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Walk an infinite list page by page
    Pages {
        #[command(flatten)]
        params: ParamArgs,
        /// Stop after this many pages
        #[arg(long, default_value_t = 5)]
        max_pages: usize,
    },
    /// Fetch one record
    Get { id: String },
    /// Create a record
    Create {
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Replace a record
    Update {
        id: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Update some fields of a record
    Patch {
        id: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Delete a record
    Delete { id: String },
}

#[derive(Args, Debug, Default)]
pub struct ParamArgs {
    /// Query parameter; values that parse as JSON are sent as JSON
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct BodyArgs {
    /// JSON object to send
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the JSON object from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
