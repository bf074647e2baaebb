/// Orchestration of the recovery flow.
///
/// Background tasks (warm-up timer, vanished-root waiter, countdown, stdin,
/// Ctrl+C) all report through one [`DaemonEvent`] channel.  The controller's
/// event loop is the only place that decides what the UI shows and when the
/// power helpers run; UI work is always marshaled through [`UiContext`].
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use crate::config::RecoveryConfig;
use crate::event::DaemonEvent;
use crate::monitor::VanishedState;
use crate::privilege::PowerControl;
use crate::ui::{RecoveryMode, UiContext, UserAction};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Timer settings of the recovery flow.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryTiming {
    /// Number of countdown steps before the automatic reboot.
    pub countdown_secs: u32,
    /// Length of one countdown step.
    pub tick: Duration,
    /// How long the warm-up window stays up.
    pub warmup_visible: Duration,
}

impl RecoveryTiming {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            countdown_secs: config.effective_countdown_secs(),
            tick: Duration::from_secs(1),
            warmup_visible: Duration::from_millis(config.warmup_visible_ms),
        }
    }
}

pub struct Controller<P> {
    ui: UiContext,
    power: P,
    timing: RecoveryTiming,
    tx: mpsc::Sender<DaemonEvent>,
    rx: mpsc::Receiver<DaemonEvent>,
    /// Set to `true` on shutdown; cancels the warm-up timers.
    shutdown_tx: watch::Sender<bool>,
    /// Mode of the recovery window, once shown.
    recovery: Option<RecoveryMode>,
    /// Cancels the running countdown, if any.
    countdown: Option<watch::Sender<bool>>,
}

impl<P: PowerControl> Controller<P> {
    pub fn new(ui: UiContext, power: P, timing: RecoveryTiming) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ui,
            power,
            timing,
            tx,
            rx,
            shutdown_tx,
            recovery: None,
            countdown: None,
        }
    }

    /// Sender for feeding events from outside (Ctrl+C, stdin, monitor failure).
    pub fn sender(&self) -> mpsc::Sender<DaemonEvent> {
        self.tx.clone()
    }

    /// Emits [`DaemonEvent::WarmupDue`] once `delay` has passed, unless the
    /// daemon shuts down first.
    pub fn schedule_warmup(&self, delay: Duration) {
        let tx = self.tx.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(DaemonEvent::WarmupDue).await;
                }
                _ = cancelled(&mut shutdown) => {}
            }
        });
    }

    /// Blocks a dedicated thread on `state` and emits
    /// [`DaemonEvent::RootVanished`] when it flips.
    pub fn watch_vanished(&self, state: VanishedState) {
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("vanished-root-waiter".into())
            .spawn(move || {
                info!("Waiting for the root file system to vanish");
                state.wait_until_vanished(None);
                let _ = tx.blocking_send(DaemonEvent::RootVanished);
            });
        if let Err(e) = spawned {
            error!("Failed to start the vanished root waiter: {e}");
        }
    }

    /// Runs the event loop until [`DaemonEvent::Shutdown`].
    pub async fn run(mut self) {
        while let Some(evt) = self.rx.recv().await {
            match evt {
                DaemonEvent::WarmupDue => self.flash_warmup_window(),

                DaemonEvent::RootVanished => {
                    self.show_recovery(RecoveryMode::Countdown {
                        total_secs: self.timing.countdown_secs,
                    });
                }

                DaemonEvent::MonitorFailed(reason) => {
                    error!("Root device removal can not be detected: {reason}");
                    self.show_recovery(RecoveryMode::Manual);
                }

                DaemonEvent::CountdownTick { remaining } => {
                    if self.countdown.is_some() {
                        self.ui.run_later(move |ui| ui.update_countdown(remaining));
                    }
                }

                DaemonEvent::CountdownElapsed => {
                    // A user action may have superseded the countdown while
                    // this event was queued.
                    if self.countdown.take().is_some() {
                        info!("Countdown elapsed");
                        self.power.reboot();
                    }
                }

                DaemonEvent::UserAction(action) => self.handle_user_action(action),

                DaemonEvent::Shutdown => {
                    info!("Shutting down");
                    self.shutdown_tx.send_replace(true);
                    self.cancel_countdown();
                    break;
                }
            }
        }
    }

    fn flash_warmup_window(&self) {
        info!("Showing warm-up window");
        self.ui.run_later(|ui| ui.show_warmup_window());

        let ui = self.ui.clone();
        let visible = self.timing.warmup_visible;
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(visible) => {}
                _ = cancelled(&mut shutdown) => {}
            }
            ui.run_later(|ui| ui.hide_warmup_window());
        });
    }

    fn show_recovery(&mut self, mode: RecoveryMode) {
        if let Some(current) = self.recovery {
            debug!("Recovery window already shown ({current:?}); ignoring {mode:?}");
            return;
        }
        info!("Showing recovery window ({mode:?})");
        self.recovery = Some(mode);
        self.ui.run_later(move |ui| ui.show_recovery_window(mode));

        if let RecoveryMode::Countdown { total_secs } = mode {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            self.countdown = Some(cancel_tx);
            tokio::spawn(run_countdown(total_secs, self.timing.tick, self.tx.clone(), cancel_rx));
        }
    }

    fn handle_user_action(&mut self, action: UserAction) {
        if self.recovery.is_none() {
            warn!("Ignoring {action:?}: recovery window is not shown");
            return;
        }
        self.cancel_countdown();
        match action {
            UserAction::Reboot => self.power.reboot(),
            UserAction::PowerOff => self.power.power_off(),
        }
    }

    fn cancel_countdown(&mut self) {
        if let Some(cancel) = self.countdown.take() {
            let _ = cancel.send(true);
        }
    }
}

/// Resolves once `rx` reads `true` or its sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Emits one tick per step, counting `total` down to zero, then
/// [`DaemonEvent::CountdownElapsed`].
async fn run_countdown(
    total: u32,
    tick: Duration,
    tx: mpsc::Sender<DaemonEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    for remaining in (0..total).rev() {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = cancelled(&mut cancel) => return,
        }
        if tx.send(DaemonEvent::CountdownTick { remaining }).await.is_err() {
            return;
        }
    }
    let _ = tx.send(DaemonEvent::CountdownElapsed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{DeviceMonitor, RootDeviceRef};
    use crate::ui::{RecoveryUi, UiThread};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum UiCall {
        ShowWarmup,
        HideWarmup,
        ShowRecovery(RecoveryMode),
        Countdown(u32),
    }

    #[derive(Clone, Default)]
    struct FakeUi(Arc<Mutex<Vec<UiCall>>>);

    impl FakeUi {
        fn calls(&self) -> Vec<UiCall> {
            self.0.lock().unwrap().clone()
        }
    }

    impl RecoveryUi for FakeUi {
        fn show_warmup_window(&mut self) {
            self.0.lock().unwrap().push(UiCall::ShowWarmup);
        }
        fn hide_warmup_window(&mut self) {
            self.0.lock().unwrap().push(UiCall::HideWarmup);
        }
        fn show_recovery_window(&mut self, mode: RecoveryMode) {
            self.0.lock().unwrap().push(UiCall::ShowRecovery(mode));
        }
        fn update_countdown(&mut self, remaining_secs: u32) {
            self.0.lock().unwrap().push(UiCall::Countdown(remaining_secs));
        }
    }

    #[derive(Clone, Default)]
    struct FakePower {
        reboots: Arc<AtomicU32>,
        power_offs: Arc<AtomicU32>,
    }

    impl FakePower {
        fn reboots(&self) -> u32 {
            self.reboots.load(Ordering::SeqCst)
        }
        fn power_offs(&self) -> u32 {
            self.power_offs.load(Ordering::SeqCst)
        }
    }

    impl PowerControl for FakePower {
        fn reboot(&self) {
            self.reboots.fetch_add(1, Ordering::SeqCst);
        }
        fn power_off(&self) {
            self.power_offs.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        ui: FakeUi,
        power: FakePower,
        tx: mpsc::Sender<DaemonEvent>,
        run: tokio::task::JoinHandle<()>,
        ui_thread: UiThread,
    }

    fn timing(countdown_secs: u32, tick_ms: u64) -> RecoveryTiming {
        RecoveryTiming {
            countdown_secs,
            tick: Duration::from_millis(tick_ms),
            warmup_visible: Duration::from_millis(20),
        }
    }

    /// Builds a controller, lets `setup` schedule background work on it, and
    /// starts its event loop.
    fn start(timing: RecoveryTiming, setup: impl FnOnce(&Controller<FakePower>)) -> Harness {
        let ui = FakeUi::default();
        let power = FakePower::default();
        let (ctx, ui_thread) = UiContext::spawn(ui.clone()).unwrap();
        let controller = Controller::new(ctx, power.clone(), timing);
        setup(&controller);
        let tx = controller.sender();
        let run = tokio::spawn(controller.run());
        Harness { ui, power, tx, run, ui_thread }
    }

    impl Harness {
        async fn shutdown(self) -> Vec<UiCall> {
            self.tx.send(DaemonEvent::Shutdown).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), self.run)
                .await
                .expect("controller should stop on shutdown")
                .unwrap();
            // Background tasks may still hold UI handles for a moment.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let calls = self.ui.calls();
            drop(self.ui_thread);
            calls
        }
    }

    async fn eventually(cond: impl Fn() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn removed(id: &str) -> String {
        format!("12:04:31.337: Removed /org/freedesktop/UDisks2/block_devices/{id}")
    }

    // ── vanish → countdown → reboot ───────────────────────────────────────────

    #[tokio::test]
    async fn vanished_root_counts_down_and_reboots_once() {
        let monitor = DeviceMonitor::new(Some(RootDeviceRef::new("sda1")), VanishedState::new());
        let h = start(timing(3, 10), |c| c.watch_vanished(monitor.state().clone()));

        monitor.process_line("12:04:30.001: Added /org/freedesktop/UDisks2/block_devices/sdb1");
        monitor.process_line(&removed("sda1"));
        monitor.process_line(&removed("sda1"));

        let power = h.power.clone();
        assert!(eventually(|| power.reboots() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.power.reboots(), 1);
        assert_eq!(h.power.power_offs(), 0);

        let calls = h.shutdown().await;
        assert_eq!(
            calls,
            [
                UiCall::ShowRecovery(RecoveryMode::Countdown { total_secs: 3 }),
                UiCall::Countdown(2),
                UiCall::Countdown(1),
                UiCall::Countdown(0),
            ]
        );
    }

    #[tokio::test]
    async fn other_device_removal_shows_nothing() {
        let monitor = DeviceMonitor::new(Some(RootDeviceRef::new("sda1")), VanishedState::new());
        let h = start(timing(1, 10), |c| c.watch_vanished(monitor.state().clone()));
        monitor.process_line(&removed("sdb1"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.power.reboots(), 0);
        assert!(h.shutdown().await.is_empty());
    }

    // ── user actions ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn user_action_supersedes_countdown() {
        let h = start(timing(5, 100), |_| {});
        h.tx.send(DaemonEvent::RootVanished).await.unwrap();
        let ui = h.ui.clone();
        assert!(eventually(|| !ui.calls().is_empty()).await);

        h.tx.send(DaemonEvent::UserAction(UserAction::PowerOff)).await.unwrap();
        let power = h.power.clone();
        assert!(eventually(|| power.power_offs() == 1).await);

        // Long enough for the whole countdown to have elapsed.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(h.power.reboots(), 0);
        let calls = h.shutdown().await;
        assert!(!calls.contains(&UiCall::Countdown(0)));
    }

    #[tokio::test]
    async fn reboot_button_reboots_immediately() {
        let h = start(timing(600, 1000), |_| {});
        h.tx.send(DaemonEvent::RootVanished).await.unwrap();
        h.tx.send(DaemonEvent::UserAction(UserAction::Reboot)).await.unwrap();
        let power = h.power.clone();
        assert!(eventually(|| power.reboots() == 1).await);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn user_action_before_recovery_is_ignored() {
        let h = start(timing(1, 10), |_| {});
        h.tx.send(DaemonEvent::UserAction(UserAction::Reboot)).await.unwrap();
        h.tx.send(DaemonEvent::UserAction(UserAction::PowerOff)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.power.reboots(), 0);
        assert_eq!(h.power.power_offs(), 0);
        h.shutdown().await;
    }

    // ── monitor failure ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn monitor_failure_shows_manual_recovery_without_reboot() {
        let h = start(timing(1, 10), |_| {});
        h.tx.send(DaemonEvent::MonitorFailed("udisksctl missing".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.power.reboots(), 0);

        h.tx.send(DaemonEvent::UserAction(UserAction::Reboot)).await.unwrap();
        let power = h.power.clone();
        assert!(eventually(|| power.reboots() == 1).await);

        let calls = h.shutdown().await;
        assert_eq!(calls, [UiCall::ShowRecovery(RecoveryMode::Manual)]);
    }

    #[tokio::test]
    async fn recovery_window_is_shown_once() {
        let h = start(timing(600, 1000), |_| {});
        h.tx.send(DaemonEvent::RootVanished).await.unwrap();
        h.tx.send(DaemonEvent::RootVanished).await.unwrap();
        h.tx.send(DaemonEvent::MonitorFailed("late".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = h.shutdown().await;
        assert_eq!(
            calls,
            [UiCall::ShowRecovery(RecoveryMode::Countdown { total_secs: 600 })]
        );
    }

    // ── warm-up stage ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn warmup_window_is_shown_then_hidden() {
        let h = start(timing(1, 10), |c| c.schedule_warmup(Duration::from_millis(10)));
        let ui = h.ui.clone();
        assert!(eventually(|| ui.calls().len() == 2).await);
        assert_eq!(ui.calls(), [UiCall::ShowWarmup, UiCall::HideWarmup]);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_warmup() {
        let h = start(timing(1, 10), |c| c.schedule_warmup(Duration::from_secs(30)));
        let calls = h.shutdown().await;
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn warmup_and_vanish_run_concurrently() {
        let monitor = DeviceMonitor::new(Some(RootDeviceRef::new("sdb")), VanishedState::new());
        let h = start(timing(600, 1000), |c| {
            c.schedule_warmup(Duration::from_millis(10));
            c.watch_vanished(monitor.state().clone());
        });
        monitor.process_line(&removed("sdb"));

        let ui = h.ui.clone();
        assert!(eventually(|| ui.calls().len() == 3).await);
        let calls = h.shutdown().await;
        assert!(calls.contains(&UiCall::ShowWarmup));
        assert!(calls.contains(&UiCall::HideWarmup));
        assert!(calls.contains(&UiCall::ShowRecovery(RecoveryMode::Countdown { total_secs: 600 })));
    }

    // ── timing ────────────────────────────────────────────────────────────────

    #[test]
    fn timing_from_config_uses_one_second_ticks() {
        let t = RecoveryTiming::from_config(&RecoveryConfig::default());
        assert_eq!(t.countdown_secs, 30);
        assert_eq!(t.tick, Duration::from_secs(1));
        assert_eq!(t.warmup_visible, Duration::from_millis(1000));
    }
}
