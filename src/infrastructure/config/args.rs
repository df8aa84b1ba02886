//! Command line arguments.

use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

/// Command line arguments; each override wins over the config file.
#[derive(Debug, Parser)]
#[command(
    name = "listing-media",
    version,
    about = "Fetch listing images through the shared media cache",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs to fetch at normal priority.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Image URLs to warm in the background at low priority.
    #[arg(long, value_name = "URL", num_args = 1..)]
    pub prefetch: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Memory tier budget in megabytes.
    #[arg(long, env = "LISTING_MEDIA_MEMORY_MB")]
    pub memory_budget_mb: Option<usize>,

    /// Maximum concurrent network fetches.
    #[arg(long)]
    pub max_concurrent_fetches: Option<usize>,

    /// Persistent tier directory.
    #[arg(long, value_name = "PATH")]
    pub disk_dir: Option<PathBuf>,

    /// Base URL for relative image paths.
    #[arg(long, env = "LISTING_MEDIA_BASE_URL")]
    pub base_url: Option<String>,
}
