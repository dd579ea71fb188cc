use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use tracing::info;

/// Receiver of alert-worthy notifications.
pub trait NotificationSink {
    fn alert(&self, title: &str, body: &str, link: &str) -> Result<()>;
}

/// Desktop notification via `notify-send`.
pub struct DesktopSink {
    app_name: String,
    program:  String,
}

impl DesktopSink {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self { app_name: app_name.into(), program: "notify-send".into() }
    }

    #[cfg(test)]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check once, before polling starts, that alerts can actually be shown:
    /// a graphical session must be present and `notify-send` must run.
    pub fn probe(&self) -> Result<()> {
        let has_display = ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|v| std::env::var_os(v).is_some_and(|s| !s.is_empty()));
        if !has_display {
            return Err(Error::PermissionDenied("no graphical session (DISPLAY/WAYLAND_DISPLAY unset)".into()));
        }

        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::PermissionDenied(format!("{} not available: {}", self.program, e)))?;
        if !status.success() {
            return Err(Error::PermissionDenied(format!("{} exited with {}", self.program, status)));
        }
        Ok(())
    }
}

impl NotificationSink for DesktopSink {
    fn alert(&self, title: &str, body: &str, link: &str) -> Result<()> {
        let body = format!("{} <a href=\"{}\">look</a>", body, link);
        let status = Command::new(&self.program)
            .args(["--app-name", &self.app_name, title, &body])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::Sink(format!("{}: {}", self.program, e)))?;
        if !status.success() {
            return Err(Error::Sink(format!("{} exited with {}", self.program, status)));
        }
        Ok(())
    }
}

/// Dry-run sink: alerts only show up in the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn alert(&self, title: &str, body: &str, link: &str) -> Result<()> {
        info!(%link, "ALERT {}: {}", title, body);
        Ok(())
    }
}
