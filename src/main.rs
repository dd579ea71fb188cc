mod collectors;
mod config;
mod daemon;
mod dedup;
mod error;
mod liveness;
mod models;
mod poller;
mod util;

use anyhow::{bail, Context, Result};
use clap::Parser;
use collectors::feed::HttpFeed;
use daemon::Daemon;
use dedup::ShownState;
use poller::{CycleOutcome, PollSettings, Poller};
use tracing_subscriber::EnvFilter;
use util::clock::{fmt_local, Clock, SystemClock};
use util::notify::{DesktopSink, LogSink, NotificationSink};
use util::store::FileStore;

#[derive(Parser, Debug)]
#[command(name = "notificator", about = "Desktop alerts for unread Phabricator notifications", version)]
struct Cli {
    /// Log alerts instead of raising desktop notifications
    #[arg(long)]
    dry_run: bool,

    /// Heartbeat once, poll once if this instance is elected, then exit
    #[arg(long)]
    once: bool,

    /// Print live instances and tracked tasks, then exit
    #[arg(long)]
    status: bool,

    /// Forget every shown task (all unread notifications alert again), then exit
    #[arg(long)]
    reset: bool,

    /// Print config file path and current values, then exit
    #[arg(long)]
    config: bool,

    /// Phabricator base URL, overrides feed.base_url from the config file
    #[arg(long)]
    base_url: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cfg = config::Config::load();
    if let Some(url) = &cli.base_url {
        cfg.feed.base_url = url.clone();
    }

    if cli.config {
        return run_print_config(&cfg);
    }

    let store = open_store(&cfg)?;
    if cli.status {
        return run_status(&store, &cfg);
    }
    if cli.reset {
        return run_reset(&store);
    }
    run_daemon(cfg, store, cli.dry_run, cli.once)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_store(cfg: &config::Config) -> Result<FileStore> {
    let dir = cfg.store.resolve_dir().context("no data directory for the shared store")?;
    Ok(FileStore::new(dir))
}

fn run_print_config(cfg: &config::Config) -> Result<()> {
    let path = config::Config::config_path()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(unknown)".to_string());
    let store = cfg.store.resolve_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(unknown)".to_string());
    let g = &cfg.general;
    println!("Config: {}", path);
    println!();
    println!("[general]");
    println!("  heartbeat_interval_ms = {}", g.heartbeat_interval_ms);
    println!("  poll_interval_ms      = {}", g.poll_interval_ms);
    println!("  renotify_cooldown_ms  = {}", g.renotify_cooldown_ms);
    println!();
    println!("[feed]");
    let base = if cfg.feed.base_url.is_empty() { "(not set)" } else { cfg.feed.base_url.as_str() };
    println!("  base_url     = {}", base);
    println!("  panel_path   = {}", cfg.feed.panel_path);
    println!("  cookie       = {}", if cfg.feed.cookie.is_empty() { "(not set)" } else { "(configured)" });
    println!("  timeout_secs = {}", cfg.feed.timeout_secs);
    println!();
    println!("[notifications]");
    println!("  app_name                = {}", cfg.notifications.app_name);
    println!("  flood_warning_threshold = {}", cfg.notifications.flood_warning_threshold);
    println!();
    println!("[store]");
    println!("  dir = {}", store);
    Ok(())
}

fn run_status(store: &FileStore, cfg: &config::Config) -> Result<()> {
    let now = SystemClock.now_ms();
    println!("Store: {}", store.dir().display());
    let live = liveness::snapshot(store, now, cfg.general.heartbeat_interval_ms as i64);
    if live.is_empty() {
        println!("No running instances.");
    } else {
        println!("Running instances ({}):", live.len());
        for (i, (start, hb)) in live.iter().enumerate() {
            let role = if i == 0 { "leader" } else { "standby" };
            println!("  {} started {}  last heartbeat {}ms ago  [{}]", start, fmt_local(*start), now.saturating_sub(*hb), role);
        }
    }

    let shown = ShownState::load(store);
    println!();
    if shown.is_empty() {
        println!("No tracked tasks.");
        return Ok(());
    }
    println!("Tracked tasks ({}):", shown.len());
    for (task, entry) in &shown.tasks {
        println!(
            "  {:<12} {} notification(s) shown, renotify at {}",
            task, entry.acknowledged_meta_ids.len(), fmt_local(entry.next_renotify_at)
        );
    }
    Ok(())
}

fn run_reset(store: &FileStore) -> Result<()> {
    let tracked = ShownState::load(store).len();
    ShownState::default().save(store).context("clearing shown notifications")?;
    println!("Forgot {} tracked task(s).", tracked);
    Ok(())
}

/// Probe the desktop sink once; startup fails if alerts cannot be shown.
fn checked_desktop(desktop: DesktopSink) -> Result<Box<dyn NotificationSink>> {
    desktop.probe().context("notificator can't work without desktop notifications")?;
    Ok(Box::new(desktop))
}

fn run_daemon(cfg: config::Config, store: FileStore, dry_run: bool, once: bool) -> Result<()> {
    if cfg.feed.base_url.is_empty() {
        let path = config::Config::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the config file".to_string());
        bail!("feed.base_url is not set; edit {} or pass --base-url", path);
    }

    let sink: Box<dyn NotificationSink> = if dry_run {
        Box::new(LogSink)
    } else {
        checked_desktop(DesktopSink::new(cfg.notifications.app_name.clone()))?
    };

    let feed = HttpFeed::new(&cfg.feed).context("building HTTP client")?;
    tracing::debug!(url = feed.url(), "polling notification panel");
    let poller = Poller::new(
        Box::new(feed),
        sink,
        PollSettings {
            base_url:                cfg.feed.base_url.clone(),
            renotify_cooldown_ms:    cfg.general.renotify_cooldown_ms as i64,
            flood_warning_threshold: cfg.notifications.flood_warning_threshold,
        },
    );
    let mut daemon = Daemon::new(SystemClock, Box::new(store), poller, &cfg.general);

    if once {
        daemon.heartbeat();
        match daemon.poll() {
            CycleOutcome::Completed(r) => println!(
                "{} notification(s), {} unread, {} alerted, {} tracked",
                r.fetched, r.unread, r.alerted, r.tracked
            ),
            CycleOutcome::Paused { others_alive } => {
                println!("Paused: {} other instance(s) running.", others_alive)
            }
            CycleOutcome::Aborted => bail!("poll cycle failed, see log"),
        }
        return Ok(());
    }

    daemon.run()
}
