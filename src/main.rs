use std::path::{Path, PathBuf};
use std::sync::Arc;

use gatesync::config::Config;
use gatesync::docker::DockerRuntime;
use gatesync::events::EventWatcher;
use gatesync::inventory::Collector;
use gatesync::publish::{CommandReloadHook, Publisher};
use gatesync::render::Renderer;
use gatesync::sync::Synchronizer;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatesync=info".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("gatesync.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    // Fail fast on a missing template rather than on the first cycle
    if !Path::new(&config.template_file).exists() {
        anyhow::bail!(
            "Template file '{}' not found. \
             Point 'template_file' in {} at your proxy template.",
            config.template_file,
            config_path.display()
        );
    }

    // Connect to Docker and verify it responds
    let runtime = Arc::new(
        DockerRuntime::connect(config.docker_host.as_deref(), config.runtime_timeout()).await?,
    );

    let reload_hook = CommandReloadHook::new(&config.reload_command, config.reload_timeout())?;
    let synchronizer = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&config.template_file),
        Publisher::new(&config.output_file, reload_hook),
    );

    // Create shutdown channel, flipped by SIGINT/SIGTERM
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for shutdown signals");
                // Keep the channel open; dropping the sender would read as a
                // shutdown request to the synchronizer.
                std::future::pending::<()>().await;
            }
        }
    });

    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    info!(
        template = %config.template_file,
        output = %config.output_file,
        "Watching container lifecycle events"
    );

    // Stream termination surfaces here as an error and exits non-zero; a
    // clean shutdown returns Ok.
    synchronizer.run(watcher, shutdown_rx).await?;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
