/// Detection of the running Linux desktop environment.
///
/// Some desktops (GNOME, Cinnamon, MATE) crash instead of showing the recovery
/// window when the root file system vanishes while their session startup is
/// still in progress.  Showing and hiding an inert warm-up window shortly after
/// login forces that initialization to finish.  The classified
/// [`DesktopKind`] decides whether that warm-up stage is needed and how long
/// to wait before showing it.
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use log::debug;

/// The desktop environments we know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopKind {
    Gnome,
    Kde,
    Cinnamon,
    Mate,
    Xfce,
    Lxde,
    Enlightenment,
    /// Nothing recognizable; assume the worst.
    Unknown,
}

/// Warm-up requirements of a desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopPolicy {
    /// Seconds after startup until the warm-up window is shown.  `None` means
    /// no warm-up stage is needed.
    pub warmup_timeout_secs: Option<u32>,
}

impl DesktopPolicy {
    pub fn needs_warmup_stage(&self) -> bool {
        self.warmup_timeout_secs.is_some()
    }

    /// Delay before the warm-up window; zero when no warm-up stage is needed.
    pub fn warmup_delay(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs.unwrap_or(0).into())
    }
}

impl DesktopKind {
    pub const fn policy(self) -> DesktopPolicy {
        let warmup_timeout_secs = match self {
            // Autologin processes start late, so the session is nearly ready.
            DesktopKind::Gnome | DesktopKind::Mate => Some(5),
            // 5s was too short for Cinnamon and 10s only just enough on fast hardware.
            DesktopKind::Cinnamon => Some(15),
            DesktopKind::Unknown => Some(15),
            DesktopKind::Kde | DesktopKind::Xfce | DesktopKind::Lxde | DesktopKind::Enlightenment => None,
        };
        DesktopPolicy { warmup_timeout_secs }
    }

    /// Maps an `XDG_CURRENT_DESKTOP` value.  Only exact names are recognized.
    pub fn from_xdg_session(value: &str) -> Option<Self> {
        match value {
            "GNOME" => Some(DesktopKind::Gnome),
            "KDE" => Some(DesktopKind::Kde),
            "X-Cinnamon" => Some(DesktopKind::Cinnamon),
            "MATE" => Some(DesktopKind::Mate),
            "LXDE" => Some(DesktopKind::Lxde),
            _ => None,
        }
    }

    /// Maps a window manager name as reported by `wmctrl -m`.
    pub fn from_window_manager(name: &str) -> Option<Self> {
        match name {
            "Xfwm4" => Some(DesktopKind::Xfce),
            "Enlightenment" => Some(DesktopKind::Enlightenment),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DesktopKind::Gnome => "GNOME",
            DesktopKind::Kde => "KDE",
            DesktopKind::Cinnamon => "CINNAMON",
            DesktopKind::Mate => "MATE",
            DesktopKind::Xfce => "XFCE",
            DesktopKind::Lxde => "LXDE",
            DesktopKind::Enlightenment => "ENLIGHTENMENT",
            DesktopKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DesktopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.policy().warmup_timeout_secs {
            Some(secs) => write!(f, "{}, warm-up stage after {secs} seconds", self.name()),
            None => write!(f, "{}, no warm-up stage needed", self.name()),
        }
    }
}

/// Returns the value of the first `Name: <value>` line, if any.
pub fn window_manager_name(output: &str) -> Option<&str> {
    output.lines().find_map(|line| line.strip_prefix("Name: "))
}

/// Source of window manager information for non-XDG desktops.
pub trait WindowManagerQuery {
    /// Raw stdout of the query, or `None` if it could not be run.
    fn query(&self) -> Option<String>;
}

/// Runs an external command (by default `wmctrl -m`).
pub struct CommandQuery {
    command: Vec<String>,
}

impl CommandQuery {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl WindowManagerQuery for CommandQuery {
    fn query(&self) -> Option<String> {
        let (program, args) = self.command.split_first()?;
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Err(e) => {
                debug!("[desktop] `{program}` unavailable: {e}");
                None
            }
        }
    }
}

/// Classifies the desktop once and keeps the answer.
pub struct DesktopClassifier<Q> {
    session: Option<String>,
    query: Q,
    cached: OnceLock<DesktopKind>,
}

impl<Q: WindowManagerQuery> DesktopClassifier<Q> {
    /// `session` is the value of the XDG session variable, if set.
    pub fn new(session: Option<String>, query: Q) -> Self {
        Self {
            session,
            query,
            cached: OnceLock::new(),
        }
    }

    /// Reads the session name from environment variable `var`.
    pub fn from_env(var: &str, query: Q) -> Self {
        Self::new(std::env::var(var).ok(), query)
    }

    /// Returns the desktop kind, resolving it on the first call only.
    pub fn classify(&self) -> DesktopKind {
        *self.cached.get_or_init(|| self.resolve())
    }

    fn resolve(&self) -> DesktopKind {
        if let Some(kind) = self.session.as_deref().and_then(DesktopKind::from_xdg_session) {
            return kind;
        }

        // Non-XDG desktops: ask the window manager.  Only the first Name line
        // counts, whether or not it is recognized.
        self.query
            .query()
            .as_deref()
            .and_then(window_manager_name)
            .and_then(DesktopKind::from_window_manager)
            .unwrap_or(DesktopKind::Unknown)
    }
}
