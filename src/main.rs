use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

use cli::Cli;
use portguard::config::Config;
use portguard::guard::{GuardLoop, RawSource};
use portguard::react::KillReactions;
use portguard::sink::LogSink;
use portguard::verify::{BindProber, PortVerifier};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    if let Some(duration) = cli.cache_duration {
        config.cache_duration_secs = duration;
    }

    config.validate()?;
    config.add_local_ignores()?;
    config.echo(cli.mode);

    let sink = LogSink::from_config(&config)?;
    let dispatcher = Arc::new(KillReactions::from_config(
        &config,
        tokio::runtime::Handle::current(),
    ));
    let prober = BindProber::new(cli.mode, config.listen_addr);
    let verifier = PortVerifier::new(Box::new(prober), config.cache_duration_secs);

    let mut source = RawSource::open(cli.mode)?;
    let mut guard = GuardLoop::new(cli.mode, config, verifier, Box::new(sink), dispatcher);

    // The capture loop blocks on the raw socket read; keep it off the async
    // runtime. It owns all mutable detection state for the process lifetime.
    tokio::task::spawn_blocking(move || guard.run(&mut source))
        .await
        .context("capture loop terminated")?;

    Ok(())
}
