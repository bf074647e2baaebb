/// Reboot and power-off through pre-authorized helpers run by the privilege
/// broker (`pkexec vanished_root_handler_reboot` and friends).
///
/// Invocations are fire-and-forget: nothing is read from the helper, and a
/// failure is logged but never retried.
use std::process::Stdio;

use log::{error, info, warn};
use tokio::process::Command;

use crate::config::PrivilegeConfig;

/// The power actions offered by the recovery window.
pub trait PowerControl: Send + Sync + 'static {
    fn reboot(&self);
    fn power_off(&self);
}

pub struct PrivilegedHelper {
    config: PrivilegeConfig,
}

impl PrivilegedHelper {
    pub fn new(config: PrivilegeConfig) -> Self {
        Self { config }
    }

    /// Runs the no-op helper once and waits for it.  Without this warm call
    /// the broker fails with a bus error once the root file system is gone.
    pub async fn prime(&self) {
        let helper = &self.config.prime_helper;
        match self.command(helper).status().await {
            Ok(status) if status.success() => info!("[privilege] Primed {} with {helper}", self.config.broker),
            Ok(status) => warn!("[privilege] {helper} exited with {status}"),
            Err(e) => warn!("[privilege] Failed to run {} {helper}: {e}", self.config.broker),
        }
    }

    fn command(&self, helper: &str) -> Command {
        let mut cmd = Command::new(&self.config.broker);
        cmd.arg(helper)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn invoke(&self, helper: &str) {
        let broker = self.config.broker.clone();
        let helper = helper.to_string();
        let mut child = match self.command(&helper).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("[privilege] Failed to run {broker} {helper}: {e}");
                return;
            }
        };
        // Reap the child in the background so failures still reach the log.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => error!("[privilege] {broker} {helper} exited with {status}"),
                Err(e) => error!("[privilege] Waiting for {broker} {helper} failed: {e}"),
            }
        });
    }
}

impl PowerControl for PrivilegedHelper {
    fn reboot(&self) {
        info!("[privilege] Trying to reboot the system");
        self.invoke(&self.config.reboot_helper);
    }

    fn power_off(&self) {
        info!("[privilege] Trying to power off the system");
        self.invoke(&self.config.poweroff_helper);
    }
}
