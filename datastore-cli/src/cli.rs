use clap::Parser;
use std::path::PathBuf;

use datastore_engine::PartitionFilters;

use crate::error::AppError;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Download and cache archived source datasets",
    long_about = "Retrieve the raw input datasets from the archive and store them in the\n\
                  local datastore, or in an object storage bucket used as a shared cache.\n\
                  \n\
                  Resources already present in a cache layer are never downloaded again.\n\
                  With --validate the cached copies are checked against their descriptors\n\
                  without touching the network."
)]
pub struct CliArgs {
    /// Dataset to retrieve
    #[arg(
        short,
        long,
        help = "Retrieve only this dataset (default: every known dataset)"
    )]
    pub dataset: Option<String>,

    /// Root directory of the datastore
    #[arg(
        long,
        help = "Datastore root; resources are cached under <DATA_DIR>/data (default: settings file or current directory)"
    )]
    pub data_dir: Option<PathBuf>,

    /// Settings file
    #[arg(
        short,
        long,
        help = "Path to a TOML settings file (default: the platform configuration directory)"
    )]
    pub config: Option<PathBuf>,

    /// Validate the cached copies instead of downloading
    #[arg(long, help = "Check cached resources against their descriptors and exit")]
    pub validate: bool,

    /// Use the sandbox archive
    #[arg(long, help = "Use the sandbox archive instead of production")]
    pub sandbox: bool,

    /// Log level
    #[arg(
        long,
        default_value = "INFO",
        help = "Logging level: DEBUG, INFO, WARNING, ERROR or CRITICAL"
    )]
    pub loglevel: String,

    /// Disable logging
    #[arg(short, long, help = "Do not emit any log output")]
    pub quiet: bool,

    /// Bucket to populate instead of the local datastore
    #[arg(
        long,
        value_name = "URL",
        help = "Populate the gs://bucket[/prefix] cache instead of the local datastore"
    )]
    pub populate_gcs_cache: Option<String>,

    /// Partition filters
    #[arg(
        short,
        long,
        value_name = "KEY=VALUE,...",
        help = "Only retrieve resources whose partitions match, e.g. year=2019,state=ca"
    )]
    pub partition: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long, help = "Timeout for each archive request in seconds (default: 15)")]
    pub timeout: Option<u64>,

    /// Archive access token
    #[arg(
        long,
        env = "DATASTORE_ACCESS_TOKEN",
        hide_env_values = true,
        help = "Access token for the archive API (overrides the settings file)"
    )]
    pub token: Option<String>,

    /// List known datasets
    #[arg(long, help = "Print the datasets known to the selected archive and exit")]
    pub list: bool,
}

/// Parse `key1=value1,key2=value2` into partition filters.
pub fn parse_partitions(spec: Option<&str>) -> Result<PartitionFilters, AppError> {
    let mut filters = PartitionFilters::new();
    let Some(spec) = spec else {
        return Ok(filters);
    };

    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid partition filter: {pair}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Invalid partition filter: {pair}"
            )));
        }
        filters.insert(key.to_string(), value.trim().to_string());
    }
    Ok(filters)
}

/// Map a logging level name onto a tracing filter directive.
pub fn parse_log_level(level: &str) -> Result<&'static str, AppError> {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARNING" | "WARN" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        _ => Err(AppError::InvalidInput(format!("Unknown log level: {level}"))),
    }
}
