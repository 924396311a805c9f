use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use datastore_engine::{ArchiveEnvironment, Datastore, DatastoreConfig, PartitionFilters};
use futures::TryStreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod error;

use cli::{CliArgs, parse_log_level, parse_partitions};
use config::Settings;
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    if !args.quiet {
        let level = parse_log_level(&args.loglevel)?;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(level))
            .with_target(false)
            .try_init()
            .map_err(|e| AppError::Initialization(e.to_string()))?;
    }

    let environment = if args.sandbox {
        ArchiveEnvironment::Sandbox
    } else {
        ArchiveEnvironment::Production
    };

    if args.list {
        for dataset in environment.datasets().keys() {
            println!("{dataset}");
        }
        return Ok(());
    }

    let settings = Settings::load(args.config.as_deref())?;
    let filters = parse_partitions(args.partition.as_deref())?;
    let config = build_config(&args, &settings)?;
    let datastore = Datastore::new(config)?;

    let datasets = match &args.dataset {
        Some(dataset) => vec![dataset.clone()],
        None => datastore.get_known_datasets(),
    };

    if args.validate {
        validate(&datastore, &datasets).await
    } else {
        for dataset in &datasets {
            retrieve(&datastore, dataset, &filters).await?;
        }
        Ok(())
    }
}

fn build_config(args: &CliArgs, settings: &Settings) -> Result<DatastoreConfig, AppError> {
    let token = args
        .token
        .as_deref()
        .or_else(|| settings.token_for(args.sandbox));

    // Validation reads only the cache, so it runs offline and needs no token
    let mut builder = DatastoreConfig::builder()
        .with_sandbox(args.sandbox)
        .with_offline(args.validate);

    match token {
        Some(token) => builder = builder.with_access_token(token),
        None if args.validate => {}
        None => {
            return Err(AppError::InvalidInput(
                "No archive access token; pass --token or set DATASTORE_ACCESS_TOKEN".to_string(),
            ));
        }
    }

    if let Some(timeout) = args.timeout.or(settings.timeout) {
        builder = builder.with_timeout(Duration::from_secs(timeout));
    }

    builder = match &args.populate_gcs_cache {
        Some(url) => builder.with_remote_cache_url(url.clone()),
        None => {
            let data_dir = args
                .data_dir
                .clone()
                .or_else(|| settings.data_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            builder.with_local_cache_path(data_dir.join("data"))
        }
    };

    Ok(builder.build())
}

async fn retrieve(
    datastore: &Datastore,
    dataset: &str,
    filters: &PartitionFilters,
) -> Result<(), AppError> {
    info!(dataset, "Retrieving dataset");
    let resources = datastore.get_resources(dataset, filters);
    futures::pin_mut!(resources);

    let mut count = 0;
    while let Some((key, data)) = resources.try_next().await? {
        info!(size = data.len(), "Retrieved {key}");
        count += 1;
    }

    if count == 0 {
        warn!(dataset, ?filters, "No resources matched");
    }
    Ok(())
}

async fn validate(datastore: &Datastore, datasets: &[String]) -> Result<(), AppError> {
    let mut invalid = 0;
    for dataset in datasets {
        let report = datastore.validate(dataset).await?;
        println!("{report}");
        if !report.is_valid() {
            invalid += 1;
        }
    }

    if invalid > 0 {
        return Err(AppError::ValidationFailed(invalid));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["datastore"];
        argv.extend_from_slice(extra);
        let mut parsed = CliArgs::try_parse_from(argv).unwrap();
        // Ignore any token present in the test environment
        if !extra.contains(&"--token") {
            parsed.token = None;
        }
        parsed
    }

    #[test]
    fn test_build_config_local_cache() {
        let settings = Settings {
            data_dir: Some(PathBuf::from("/srv/pudl")),
            access_token: Some("prod".to_string()),
            timeout: Some(30),
            ..Settings::default()
        };
        let config = build_config(&args(&[]), &settings).unwrap();

        assert_eq!(config.archive.environment, ArchiveEnvironment::Production);
        assert_eq!(config.archive.access_token, "prod");
        assert_eq!(config.archive.timeout, Duration::from_secs(30));
        assert_eq!(
            config.cache.local_cache_path,
            Some(PathBuf::from("/srv/pudl/data"))
        );
        assert!(config.cache.remote_cache_url.is_none());
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            data_dir: Some(PathBuf::from("/srv/pudl")),
            sandbox_access_token: Some("sand".to_string()),
            timeout: Some(30),
            ..Settings::default()
        };
        let config = build_config(
            &args(&["--sandbox", "--timeout", "5", "--data-dir", "/tmp/ds"]),
            &settings,
        )
        .unwrap();

        assert_eq!(config.archive.environment, ArchiveEnvironment::Sandbox);
        assert_eq!(config.archive.access_token, "sand");
        assert_eq!(config.archive.timeout, Duration::from_secs(5));
        assert_eq!(config.cache.local_cache_path, Some(PathBuf::from("/tmp/ds/data")));
    }

    #[test]
    fn test_gcs_cache_replaces_local() {
        let config = build_config(
            &args(&["--token", "t", "--populate-gcs-cache", "gs://bucket/cache"]),
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(
            config.cache.remote_cache_url.as_deref(),
            Some("gs://bucket/cache")
        );
        assert!(config.cache.local_cache_path.is_none());
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(
            build_config(&args(&[]), &Settings::default()),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_runs_offline_without_token() {
        let config = build_config(&args(&["--validate"]), &Settings::default()).unwrap();
        assert!(config.archive.offline);
        assert!(config.archive.access_token.is_empty());

        let datastore = Datastore::new(config).unwrap();
        assert!(!datastore.get_known_datasets().is_empty());
    }

    #[test]
    fn test_retrieval_is_online() {
        let config = build_config(&args(&["--token", "t"]), &Settings::default()).unwrap();
        assert!(!config.archive.offline);
    }
}
