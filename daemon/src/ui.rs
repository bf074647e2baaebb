/// Recovery UI collaborator and the thread that owns it.
///
/// The UI is only ever touched from its own thread.  Everything else hands it
/// work through [`UiContext::run_later`], which queues a closure onto that
/// thread.
use std::io::{self, Write};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use log::warn;

/// How the recovery window was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// The root device vanished: count down to an automatic reboot.
    Countdown { total_secs: u32 },
    /// Detection is unavailable: offer the controls but never reboot on our own.
    Manual,
}

/// A button on the recovery window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Reboot,
    PowerOff,
}

impl UserAction {
    /// Parses a console command (`reboot`/`r`, `poweroff`/`p`).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "reboot" | "r" => Some(UserAction::Reboot),
            "poweroff" | "power-off" | "p" => Some(UserAction::PowerOff),
            _ => None,
        }
    }
}

/// Rendering side of the recovery flow.  Implementations live on the UI
/// thread and need not be `Sync`.
pub trait RecoveryUi: Send + 'static {
    fn show_warmup_window(&mut self);
    fn hide_warmup_window(&mut self);
    fn show_recovery_window(&mut self, mode: RecoveryMode);
    fn update_countdown(&mut self, remaining_secs: u32);
}

/// "now", "1 second", "N seconds".
pub fn remaining_time(remaining_secs: u32) -> String {
    match remaining_secs {
        0 => "now".to_string(),
        1 => "1 second".to_string(),
        n => format!("{n} seconds"),
    }
}

pub fn countdown_label(remaining_secs: u32) -> String {
    format!("Automatic reboot in {}", remaining_time(remaining_secs))
}

type UiTask = Box<dyn FnOnce(&mut dyn RecoveryUi) + Send>;

/// Handle for marshaling work onto the UI thread.  Cheap to clone.
#[derive(Clone)]
pub struct UiContext {
    tx: std_mpsc::Sender<UiTask>,
}

/// The UI thread itself.  It exits once every [`UiContext`] is dropped.
pub struct UiThread {
    handle: JoinHandle<()>,
}

impl UiContext {
    /// Moves `ui` onto a new thread and returns the handle used to reach it.
    pub fn spawn<U: RecoveryUi>(mut ui: U) -> io::Result<(UiContext, UiThread)> {
        let (tx, rx) = std_mpsc::channel::<UiTask>();
        let handle = std::thread::Builder::new()
            .name("recovery-ui".into())
            .spawn(move || {
                let ui: &mut dyn RecoveryUi = &mut ui;
                for task in rx {
                    task(&mut *ui);
                }
            })?;
        Ok((UiContext { tx }, UiThread { handle }))
    }

    /// Queues `task` to run on the UI thread.
    pub fn run_later(&self, task: impl FnOnce(&mut dyn RecoveryUi) + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            warn!("[ui] UI thread is gone; dropping request");
        }
    }
}

impl UiThread {
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("[ui] UI thread panicked");
        }
    }

    /// Like [`UiThread::join`], but parks a blocking-pool thread instead of an
    /// async worker, so runtime tasks still holding a [`UiContext`] can finish.
    pub async fn wait(self) {
        if tokio::task::spawn_blocking(move || self.join()).await.is_err() {
            warn!("[ui] Failed to wait for the UI thread");
        }
    }
}

/// Terminal rendering of the recovery flow.  Reboot and power-off are read
/// from stdin by the daemon, not by this type.
pub struct ConsoleUi<W> {
    out: W,
}

impl ConsoleUi<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleUi<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn line(&mut self, text: &str) {
        // A terminal that went away along with the root device is not an error
        // we can act on.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send + 'static> RecoveryUi for ConsoleUi<W> {
    fn show_warmup_window(&mut self) {
        self.line("[vanished-root-handler] Warm-up check");
    }

    fn hide_warmup_window(&mut self) {
        self.line("[vanished-root-handler] Warm-up check done");
    }

    fn show_recovery_window(&mut self, mode: RecoveryMode) {
        self.line("");
        match mode {
            RecoveryMode::Countdown { .. } => {
                self.line("The storage device of this system has been removed.");
            }
            RecoveryMode::Manual => {
                self.line("Removal of the storage device can not be detected on this system.");
            }
        }
        self.line("Type `reboot` (r) or `poweroff` (p) and press Enter.");
        if let RecoveryMode::Countdown { total_secs } = mode {
            self.line(&countdown_label(total_secs));
        }
    }

    fn update_countdown(&mut self, remaining_secs: u32) {
        self.line(&countdown_label(remaining_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    // ── labels ────────────────────────────────────────────────────────────────

    #[test]
    fn remaining_time_wording() {
        assert_eq!(remaining_time(0), "now");
        assert_eq!(remaining_time(1), "1 second");
        assert_eq!(remaining_time(2), "2 seconds");
        assert_eq!(remaining_time(30), "30 seconds");
        assert_eq!(countdown_label(5), "Automatic reboot in 5 seconds");
    }

    #[test]
    fn user_action_parsing() {
        assert_eq!(UserAction::parse("reboot"), Some(UserAction::Reboot));
        assert_eq!(UserAction::parse(" R \n"), Some(UserAction::Reboot));
        assert_eq!(UserAction::parse("PowerOff"), Some(UserAction::PowerOff));
        assert_eq!(UserAction::parse("p"), Some(UserAction::PowerOff));
        assert_eq!(UserAction::parse(""), None);
        assert_eq!(UserAction::parse("shutdown now"), None);
    }

    // ── UiContext ─────────────────────────────────────────────────────────────

    #[test]
    fn tasks_run_on_the_ui_thread_in_order() {
        let buf = SharedBuf::default();
        let (ui, thread) = UiContext::spawn(ConsoleUi::new(buf.clone())).unwrap();

        let caller = std::thread::current().id();
        let (seen_tx, seen_rx) = std_mpsc::channel();
        ui.run_later(move |_| {
            seen_tx.send(std::thread::current().id()).unwrap();
        });
        ui.run_later(|ui| ui.show_recovery_window(RecoveryMode::Countdown { total_secs: 30 }));
        ui.run_later(|ui| ui.update_countdown(29));
        drop(ui);
        thread.join();

        assert_ne!(seen_rx.recv().unwrap(), caller);
        let text = buf.text();
        let shown = text.find("Automatic reboot in 30 seconds").unwrap();
        let ticked = text.find("Automatic reboot in 29 seconds").unwrap();
        assert!(shown < ticked);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_lets_runtime_tasks_finish_their_ui_work() {
        let buf = SharedBuf::default();
        let (ui, thread) = UiContext::spawn(ConsoleUi::new(buf.clone())).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            ui.run_later(|ui| ui.hide_warmup_window());
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), thread.wait())
            .await
            .expect("UI thread should exit once the last context is dropped");
        assert!(buf.text().contains("Warm-up check done"));
    }

    #[test]
    fn manual_mode_has_no_countdown() {
        let buf = SharedBuf::default();
        let mut ui = ConsoleUi::new(buf.clone());
        ui.show_recovery_window(RecoveryMode::Manual);
        let text = buf.text();
        assert!(text.contains("reboot"));
        assert!(!text.contains("Automatic reboot"));
    }
}
