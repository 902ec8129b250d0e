// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! victus-daemon: system service that owns the hp-wmi fan controls, runs
//! Better-Auto and answers clients over a Unix domain socket.

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use victus_fan_control::Daemon;
use victus_fan_control::config::{self, Config};
use victus_fan_control::server::Server;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "victus-daemon", about = "HP Victus fan control daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    write_default_config: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));

    if cli.write_default_config {
        config::save_config(&config_path, &Config::default())
            .with_context(|| format!("writing {}", config_path.display()))?;
        return Ok(());
    }

    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    if nix::unistd::geteuid().is_root() {
        log::info!("Running as root, writing sysfs directly");
    } else {
        log::info!("Running unprivileged, helper scripts will be used where sysfs is read-only");
    }

    let daemon = Daemon::with_system_writer(&cfg);
    let listener = bind_socket(Path::new(&socket_path), cfg.daemon.socket_mode)?;
    log::info!("Listening on {socket_path}");

    if cfg.daemon.ensure_better_auto_on_start {
        let d = daemon.clone();
        match tokio::task::spawn_blocking(move || d.ensure_better_auto()).await? {
            Ok(()) => log::info!("Better-Auto active"),
            Err(e) => log::error!("Failed to start Better-Auto: {e}"),
        }
    }

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();
    let mut sigterm = signal(SignalKind::terminate())?;

    // Signal handler
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
        shutdown_signal.notify_one();
    });

    let server = Server::new(daemon.clone(), cfg.daemon.max_command_len);
    server.serve(listener, shutdown).await;

    tokio::task::spawn_blocking(move || daemon.shutdown()).await?;

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);
    log::info!("Daemon stopped");
    Ok(())
}

/// Bind the socket, replacing a stale socket file and applying `mode`.
fn bind_socket(path: &Path, mode: u32) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    // Clean up old socket file
    let _ = std::fs::remove_file(path);
    let listener =
        UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }

    Ok(listener)
}
