use clap::Parser;
use std::path::PathBuf;

use portguard::config::Protocol;

#[derive(Parser)]
#[command(name = "portguard")]
#[command(author, version, about = "Host-based port scan sensor with blocking reactions")]
pub struct Cli {
    /// Transport protocol to monitor (one per process)
    #[arg(short, long, value_enum, default_value = "tcp")]
    pub mode: Protocol,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Override the port cache duration in seconds (<= 0 disables caching)
    #[arg(long, value_name = "SECS")]
    pub cache_duration: Option<i64>,
}
