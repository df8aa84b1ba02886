use clap::Parser;
use color_eyre::eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use listing_media::domain::Priority;
use listing_media::infrastructure::config::ConfigOrigin;
use listing_media::infrastructure::{AppConfig, CliArgs, ResourceCache, StorageManager};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<(AppConfig, ConfigOrigin)> {
    let storage = StorageManager::new()?;
    let (mut config, origin) = storage.load_with_origin(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok((config, origin))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let (config, origin) = load_config(&args)?;
    init_logging(&config)?;
    if origin == ConfigOrigin::Fallback {
        warn!("Configuration file could not be parsed; running with defaults");
    }

    info!(version = listing_media::VERSION, "Starting {}", listing_media::NAME);

    let cache = ResourceCache::from_config(&config.cache).await?;
    let prefetch = cache.prefetch(args.prefetch.iter().cloned());

    let mut failures = 0usize;
    for url in &args.urls {
        match cache.fetch(url, Priority::Normal).await {
            Ok(image) => println!("{url}: {}x{}", image.width(), image.height()),
            Err(e) => {
                failures += 1;
                warn!(url = %url, error = %e, "Fetch failed");
                eprintln!("{url}: {e}");
            }
        }
    }

    for (url, outcome) in prefetch.join().await {
        if let Err(e) = outcome {
            info!(url = %url, error = %e, "Prefetch did not complete");
        }
    }

    println!("{}", cache.stats());

    if failures > 0 {
        color_eyre::eyre::bail!("{failures} of {} images failed", args.urls.len());
    }
    Ok(())
}
