//! Root device removal detection.
//!
//! [`DeviceMonitor`] consumes the line stream of `udisksctl monitor`, picks
//! out block device removals and flips the shared [`VanishedState`] when the
//! removed device is the resolved root device.

pub mod line_source;
pub mod root_device;
pub mod vanished;

use std::sync::OnceLock;

use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::event::DaemonEvent;
use line_source::LineSource;
pub use root_device::RootDeviceRef;
pub use vanished::VanishedState;

/// A udisks block device object disappeared, e.g.
/// `12:04:31.337: Removed /org/freedesktop/UDisks2/block_devices/sdb1`.
const REMOVED_PATTERN: &str = r"^.*: Removed (/org/freedesktop/UDisks2/block_devices/.*)$";

fn removed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(REMOVED_PATTERN).expect("removal pattern is a valid regex"))
}

/// Extracts the device id (final path segment) from a removal notification.
/// Returns `None` for every other line.
pub fn removed_device(line: &str) -> Option<&str> {
    let path = removed_pattern().captures(line)?.get(1)?.as_str();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
}

/// What a single line did to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not a removal notification.
    Ignored,
    /// Some device other than the root device was removed.
    OtherDevice(String),
    /// The root device was removed and this line performed the transition.
    RootVanished,
    /// The root device was removed again after the transition already happened.
    AlreadyVanished,
}

pub struct DeviceMonitor {
    root: Option<RootDeviceRef>,
    state: VanishedState,
}

impl DeviceMonitor {
    /// With `root = None` the monitor never matches (degraded mode).
    pub fn new(root: Option<RootDeviceRef>, state: VanishedState) -> Self {
        Self { root, state }
    }

    pub fn state(&self) -> &VanishedState {
        &self.state
    }

    /// Evaluates one line.  Only a removal of exactly the root device id
    /// changes state.
    pub fn process_line(&self, line: &str) -> LineOutcome {
        let Some(device) = removed_device(line) else {
            return LineOutcome::Ignored;
        };
        info!("[monitor] Removed device: {device}");

        match &self.root {
            Some(root) if root.id() == device => {
                if self.state.mark_vanished() {
                    info!("[monitor] The root file system vanished ({device})");
                    LineOutcome::RootVanished
                } else {
                    debug!("[monitor] Root device {device} already marked as vanished");
                    LineOutcome::AlreadyVanished
                }
            }
            Some(root) => {
                debug!("[monitor] {device} is not the root device ({root}); ignoring");
                LineOutcome::OtherDevice(device.to_string())
            }
            None => {
                debug!("[monitor] Root device unknown; ignoring removal of {device}");
                LineOutcome::OtherDevice(device.to_string())
            }
        }
    }

    /// Evaluates lines one at a time, in arrival order, until the channel
    /// closes.
    pub async fn consume(&self, mut lines: mpsc::Receiver<String>) {
        while let Some(line) = lines.recv().await {
            self.process_line(&line);
        }
    }

    /// Spawns the device event command and a task that consumes its output.
    ///
    /// If the stream ends before the root device vanished, and not because of
    /// [`MonitorHandle::stop`], removal can no longer be detected; that is
    /// reported as [`DaemonEvent::MonitorFailed`] on `events`.
    pub fn start(
        self,
        config: &MonitorConfig,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Result<MonitorHandle, MonitorError> {
        if self.root.is_none() {
            warn!("[monitor] Root device unknown; removal detection is disabled for this session");
        }

        let (source, lines) = LineSource::spawn(&config.command, &config.locale)?;
        let program = config.command.join(" ");
        info!(
            "[monitor] Watching `{program}` for removal of {}",
            self.root.as_ref().map_or("<unknown>", RootDeviceRef::id)
        );

        let state = self.state.clone();
        let (stopping_tx, stopping_rx) = watch::channel(false);
        let consumer = tokio::spawn(async move {
            self.consume(lines).await;
            let stopped = *stopping_rx.borrow();
            if stopped {
                debug!("[monitor] Device event stream closed on stop");
            } else if self.state.is_vanished() {
                debug!("[monitor] Device event stream ended after the root vanished");
            } else {
                error!("[monitor] `{program}` stopped reporting device events");
                let reason = format!("`{program}` exited unexpectedly");
                let _ = events.send(DaemonEvent::MonitorFailed(reason)).await;
            }
        });

        Ok(MonitorHandle {
            source,
            consumer,
            state,
            stopping_tx,
        })
    }
}

/// A running monitor.  Dropping it also kills the subprocess.
pub struct MonitorHandle {
    source: LineSource,
    consumer: JoinHandle<()>,
    state: VanishedState,
    stopping_tx: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Kills the device event command and waits for the consumer to drain.
    /// An already-set vanished flag stays set.
    pub async fn stop(self) {
        self.stopping_tx.send_replace(true);
        self.source.stop().await;
        let _ = self.consumer.await;
        info!(
            "[monitor] Stopped (root vanished: {})",
            self.state.is_vanished()
        );
    }
}
