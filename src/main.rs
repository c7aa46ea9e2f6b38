use anyhow::{Context, Result};
use clap::Parser;
use h2serve::cli::{Cli, Command};
use h2serve::config::Config;
use h2serve::streaming::{drain, IoSink, StreamPlan, DEFAULT_LEVEL};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("h2serve={}", cli.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command() {
        Command::Serve => serve(&cli.config).await,
        Command::CheckConfig => check_config(&cli.config),
        Command::Cat { path, compress } => cat(&cli.config, path, *compress).await,
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
        }
        on_signal.cancel();
    });

    h2serve::server::run(config, shutdown).await
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    h2serve::tls::server_config(&config).context("TLS configuration is not usable")?;

    let c = &config.compression;
    println!("config:      {}", config_path.display());
    println!("listen:      {}", config.listen_addr());
    println!("host name:   {}", config.server.host_name);
    println!("doc root:    {}", config.file.doc_root.display());
    println!(
        "read:        {} byte blocks, queue depth {}",
        config.file.block_size, config.file.queue_depth
    );
    if c.enabled {
        println!(
            "compression: {} level {}, >= {} bytes, {} byte chunks, skipping {:?}",
            c.encoding,
            c.level.unwrap_or(DEFAULT_LEVEL),
            c.threshold,
            c.buffer_size,
            c.omit_extensions
        );
    } else {
        println!("compression: disabled");
    }
    Ok(())
}

async fn cat(config_path: &Path, path: &Path, force_compress: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let policy = config.compression.policy();

    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let compress = force_compress || policy.should_compress(size, &file_name);

    let plan = StreamPlan::start(
        path,
        size,
        compress,
        config.read_settings(),
        &policy,
        CancellationToken::new(),
    );
    tracing::debug!(framing = ?plan.framing, "streaming to stdout");

    let mut sink = IoSink::new(tokio::io::stdout());
    let report = drain(plan.stream, &mut sink).await;
    tracing::debug!(chunks = report.chunks, bytes = report.bytes, "done");

    if !report.outcome.is_completed() {
        anyhow::bail!("{}: {}", path.display(), report.outcome);
    }
    Ok(())
}
