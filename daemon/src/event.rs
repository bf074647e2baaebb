use crate::ui::UserAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// The desktop's warm-up delay elapsed; flash the warm-up window.
    WarmupDue,
    /// The root device vanished; show the recovery window and start counting down.
    RootVanished,
    /// The device monitor could not be started; removal will never be detected.
    MonitorFailed(String),
    /// One countdown step passed; `remaining` seconds are left.
    CountdownTick { remaining: u32 },
    /// The countdown reached zero.
    CountdownElapsed,
    /// Reboot or power-off chosen on the recovery window.
    UserAction(UserAction),
    /// Ctrl+C received; stop monitoring and exit.
    Shutdown,
}
