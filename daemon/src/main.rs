mod config;
mod controller;
mod desktop;
mod error;
mod event;
mod logging;
mod monitor;
mod paths;
mod privilege;
mod ui;

use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::controller::{Controller, RecoveryTiming};
use crate::desktop::{CommandQuery, DesktopClassifier, DesktopKind};
use crate::event::DaemonEvent;
use crate::monitor::{root_device, DeviceMonitor, VanishedState};
use crate::privilege::PrivilegedHelper;
use crate::ui::{ConsoleUi, UiContext, UserAction};

/// Watches the storage device of a live system and offers a reboot once it is
/// pulled out.
#[derive(Parser, Debug)]
#[command(name = "vanished-root-handler", version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show the recovery window immediately instead of waiting for the root
    /// device to vanish.
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.clone().unwrap_or_else(paths::config_file_path);
    let (cfg, config_error) = match config::load_or_default(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (config::Config::default(), Some(e)),
    };

    // ── Logging ───────────────────────────────────────────────────────────────
    logging::init(&cfg.logging);
    if let Some(e) = config_error {
        error!("[config] {e:#} (using defaults)");
    }
    info!("vanished-root-handler v{} started", env!("CARGO_PKG_VERSION"));

    // ── Privilege broker ──────────────────────────────────────────────────────
    let helper = PrivilegedHelper::new(cfg.privilege.clone());
    helper.prime().await;

    // ── UI thread ─────────────────────────────────────────────────────────────
    let (ui, ui_thread) = match UiContext::spawn(ConsoleUi::stdout()) {
        Ok(ui) => ui,
        Err(e) => {
            error!("Failed to start the UI thread: {e}");
            std::process::exit(1);
        }
    };

    let controller = Controller::new(ui, helper, RecoveryTiming::from_config(&cfg.recovery));
    let event_tx = controller.sender();
    let mut monitor_handle = None;

    if args.test {
        info!("Test mode: showing the recovery window now");
        let _ = event_tx.send(DaemonEvent::RootVanished).await;
    } else {
        // ── Root device ───────────────────────────────────────────────────────
        let root = match root_device::resolve(&cfg.monitor.medium_mounts, cfg.monitor.match_whole_disk) {
            Ok(root) => {
                info!("System storage device: {root}");
                Some(root)
            }
            Err(e) => {
                error!("Can not determine the system storage device: {e}");
                None
            }
        };

        // ── Device monitor ────────────────────────────────────────────────────
        let device_monitor = DeviceMonitor::new(root, VanishedState::new());
        controller.watch_vanished(device_monitor.state().clone());
        match device_monitor.start(&cfg.monitor, event_tx.clone()) {
            Ok(handle) => monitor_handle = Some(handle),
            Err(e) => {
                error!("[monitor] Failed to start device monitor: {e}");
                let _ = event_tx.send(DaemonEvent::MonitorFailed(e.to_string())).await;
            }
        }

        // ── Desktop ───────────────────────────────────────────────────────────
        let desktop_cfg = cfg.desktop.clone();
        let desktop = tokio::task::spawn_blocking(move || {
            let query = CommandQuery::new(desktop_cfg.window_manager_query);
            DesktopClassifier::from_env(&desktop_cfg.session_env_var, query).classify()
        })
        .await
        .unwrap_or(DesktopKind::Unknown);
        info!("Current desktop: {desktop}");

        let policy = desktop.policy();
        if policy.needs_warmup_stage() {
            controller.schedule_warmup(policy.warmup_delay());
        }
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    spawn_stdin_reader(event_tx);

    // ── Event loop ────────────────────────────────────────────────────────────
    controller.run().await;

    if let Some(handle) = monitor_handle {
        handle.stop().await;
    }
    ui_thread.wait().await;
}

/// Reads recovery commands from stdin on a plain thread; a blocking stdin read
/// must not keep the runtime from shutting down.
fn spawn_stdin_reader(tx: mpsc::Sender<DaemonEvent>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match UserAction::parse(&line) {
                    Some(action) => {
                        if tx.blocking_send(DaemonEvent::UserAction(action)).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to read commands from stdin: {e}");
    }
}
