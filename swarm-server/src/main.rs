// Swarm server: coordination transport, file service, status page and tick loop.

mod config;
mod file_service;
mod status;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use swarm_core::SwarmCore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("swarm-server {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load(config_path.as_deref()).context("loading config")?;
    tracing::info!(?cfg, "starting swarm-server {}", VERSION);

    let files = Arc::new(file_service::DiskFileService::new(
        cfg.file_root.clone(),
        cfg.chunk_size,
    ));
    let shared = transport::Shared::new(SwarmCore::new(files, cfg.core_config()));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port))
            .await
            .with_context(|| format!("binding {}:{}", cfg.host, cfg.port))?;
        tracing::info!(host = %cfg.host, port = cfg.port, "swarm listening");

        let serve_shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::serve(listener, serve_shared).await {
                tracing::error!(error = %e, "accept loop failed");
            }
        });

        tokio::spawn(transport::run_ticks(
            shared.clone(),
            Duration::from_millis(cfg.tick_interval_ms),
        ));

        if cfg.stats_port != 0 {
            let status_shared = shared.clone();
            let host = cfg.host.clone();
            let port = cfg.stats_port;
            tokio::spawn(async move {
                if let Err(e) = status::serve(status_shared, &host, port).await {
                    tracing::error!(error = %e, "status server failed");
                }
            });
        }

        shutdown_signal().await?;
        tracing::info!("shutting down");
        anyhow::Ok(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
