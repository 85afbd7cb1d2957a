use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod headers;
mod remote;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use remote::ClusterClient;
use semantic::ClusteringService;
use web::ClusterResponse;

/// Talk to a running daemon instead of loading the model in-process.
const REMOTE_ADDR_ENV: &str = "KEYCLUSTER_ADDR";
const REMOTE_TIMEOUT: Duration = Duration::from_secs(120);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn remote_client() -> anyhow::Result<Option<ClusterClient>> {
    match std::env::var(REMOTE_ADDR_ENV) {
        Ok(addr) => {
            log::info!("using remote daemon: {addr}");
            Ok(Some(ClusterClient::new(&addr, Some(REMOTE_TIMEOUT))?))
        }
        Err(_) => Ok(None),
    }
}

fn read_keys(
    keys: Vec<String>,
    csv: Option<std::path::PathBuf>,
    delimiter: char,
) -> anyhow::Result<Vec<String>> {
    if let Some(path) = csv {
        if !delimiter.is_ascii() {
            bail!("delimiter must be a single ascii character, got {delimiter:?}");
        }
        return headers::read_header_row(&path, delimiter as u8);
    }

    if !keys.is_empty() {
        return Ok(keys);
    }

    let mut keys = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read keys from stdin")?;
        let line = line.trim();
        if !line.is_empty() {
            keys.push(line.to_string());
        }
    }
    Ok(keys)
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    match args.command {
        #[cfg(feature = "markdown-docs")]
        cli::Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<cli::Args>();
            Ok(())
        }

        cli::Command::Daemon { listen, preload } => {
            let config = Config::load_with(config::default_base_path()?)?;

            let mut daemon = config.daemon.clone();
            if let Some(listen) = listen {
                daemon.listen = listen;
            }
            daemon.preload |= preload;

            let service = Arc::new(ClusteringService::new(
                config.clustering.clone(),
                config.encoder.clone(),
                config.base_path().to_path_buf(),
            ));
            web::start_daemon(service, daemon)
        }

        cli::Command::Cluster {
            keys,
            csv,
            delimiter,
            threshold,
            fallback,
        } => {
            let keys = read_keys(keys, csv, delimiter)?;

            let clusters = match remote_client()? {
                Some(client) if fallback => client.cluster_or_singletons(&keys, threshold),
                Some(client) => client.cluster(&keys, threshold)?,
                None => {
                    let config = Config::load_with(config::default_base_path()?)?;
                    let service = ClusteringService::new(
                        config.clustering.clone(),
                        config.encoder.clone(),
                        config.base_path().to_path_buf(),
                    );
                    let threshold = threshold.unwrap_or_else(|| service.default_threshold());
                    service.cluster(&keys, threshold)?
                }
            };

            println!(
                "{}",
                serde_json::to_string_pretty(&ClusterResponse { clusters })?
            );
            Ok(())
        }

        cli::Command::Health {} => {
            let Some(client) = remote_client()? else {
                bail!("{REMOTE_ADDR_ENV} is not set; health is reported by a running daemon");
            };
            println!("{}", serde_json::to_string_pretty(&client.health()?)?);
            Ok(())
        }
    }
}
