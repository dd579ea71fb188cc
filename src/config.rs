use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// How often each instance records that it is alive (ms).
    pub heartbeat_interval_ms: u64,
    /// How often the elected instance polls the notification panel (ms).
    pub poll_interval_ms: u64,
    /// Re-alert a still-unread task after this long (ms). 0 = re-alert on every poll.
    pub renotify_cooldown_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Phabricator base URL, e.g. "https://phab.example.com". Required.
    pub base_url: String,
    /// Path of the notification panel endpoint.
    pub panel_path: String,
    /// Raw Cookie header sent with each request (session cookie). Empty = none.
    pub cookie: String,
    /// Upper bound on a single panel request, in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Application name shown by the desktop notification daemon.
    pub app_name: String,
    /// Warn in the log when at least this many unread notifications pile up. 0 = never.
    pub flood_warning_threshold: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory shared by all instances. Empty = ~/.local/share/notificator.
    pub dir: String,
}

// ── Defaults ─────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            poll_interval_ms:      15_000,
            renotify_cooldown_ms:  30 * 60 * 1_000,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url:     String::new(),
            panel_path:   "/notification/panel/".into(),
            cookie:       String::new(),
            timeout_secs: 10,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            app_name:                "notificator".into(),
            flood_warning_threshold: 50,
        }
    }
}

impl FeedConfig {
    pub fn panel_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.panel_path.trim_start_matches('/')
        )
    }
}

impl StoreConfig {
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        if self.dir.is_empty() {
            crate::util::store::FileStore::default_dir()
        } else {
            Some(PathBuf::from(&self.dir))
        }
    }
}

// ── Load / Save ───────────────────────────────────────────────────────

impl Config {
    pub fn load() -> Self {
        match Config::config_path() {
            Some(path) => Config::load_from(path),
            None       => Config::default(),
        }
    }

    /// Load from `path`, writing defaults there on first run (best-effort).
    pub fn load_from(path: PathBuf) -> Self {
        match try_load(&path) {
            Ok(c)  => c,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("ignoring unreadable config {}: {}", path.display(), e);
                } else {
                    let _ = try_write_defaults(&path);
                }
                Config::default()
            }
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("notificator").join("notificator.toml"))
    }
}

fn try_load(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&text)?;
    Ok(cfg)
}

fn try_write_defaults(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(&Config::default())?;
    fs::write(path, format!("# notificator configuration\n# Generated on first run, edit freely\n\n{}", text))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("notificator").join("notificator.toml");
        let cfg = Config::load_from(path.clone());
        assert_eq!(cfg.general.renotify_cooldown_ms, 1_800_000);
        assert!(path.exists());

        let reloaded = Config::load_from(path);
        assert_eq!(reloaded.general.heartbeat_interval_ms, 5_000);
        assert_eq!(reloaded.feed.panel_path, "/notification/panel/");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("notificator.toml");
        fs::write(&path, "[feed]\nbase_url = \"https://phab.example/\"\n\n[general]\npoll_interval_ms = 60000\n")
            .expect("write");
        let cfg = Config::load_from(path);
        assert_eq!(cfg.feed.base_url, "https://phab.example/");
        assert_eq!(cfg.feed.timeout_secs, 10);
        assert_eq!(cfg.general.poll_interval_ms, 60_000);
        assert_eq!(cfg.general.heartbeat_interval_ms, 5_000);
        assert_eq!(cfg.feed.panel_url(), "https://phab.example/notification/panel/");
    }

    #[test]
    fn broken_file_is_left_alone() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("notificator.toml");
        fs::write(&path, "[general\n").expect("write");
        let cfg = Config::load_from(path.clone());
        assert_eq!(cfg.general.poll_interval_ms, 15_000);
        assert_eq!(fs::read_to_string(path).expect("read"), "[general\n");
    }
}
