use crate::collectors::feed::FeedSource;
use crate::collectors::panel;
use crate::dedup::ShownState;
use crate::error::Result;
use crate::liveness::ElectionOutcome;
use crate::util::notify::NotificationSink;
use crate::util::store::Store;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Fetching,
    Reconciling,
    Delivering,
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched:   usize,
    pub unread:    usize,
    pub alerted:   usize,
    /// Alerts the sink rejected; they still count as shown.
    pub failed:    usize,
    /// Tasks remembered after the cycle.
    pub tracked:   usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another, older instance is alive and does the polling.
    Paused { others_alive: usize },
    Completed(CycleReport),
    /// Fetch, parse or persist failed; nothing was written or delivered.
    Aborted,
}

pub struct PollSettings {
    pub base_url:                String,
    pub renotify_cooldown_ms:    i64,
    pub flood_warning_threshold: usize,
}

/// Fetch → reconcile → deliver, once per poll tick, on the elected instance only.
pub struct Poller {
    feed:     Box<dyn FeedSource>,
    sink:     Box<dyn NotificationSink>,
    settings: PollSettings,
    phase:    PollPhase,
}

impl Poller {
    pub fn new(feed: Box<dyn FeedSource>, sink: Box<dyn NotificationSink>, settings: PollSettings) -> Self {
        Self { feed, sink, settings, phase: PollPhase::Idle }
    }

    #[cfg(test)]
    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// Handle one poll tick. Errors end the cycle here and never reach the caller.
    pub fn on_tick(&mut self, store: &dyn Store, election: &ElectionOutcome, now: i64) -> CycleOutcome {
        if !election.is_leader() {
            info!(
                "paused while {} other instance(s) running",
                election.others_alive
            );
            return CycleOutcome::Paused { others_alive: election.others_alive };
        }

        let result = self.run_cycle(store, now);
        let outcome = match result {
            Ok(report) => CycleOutcome::Completed(report),
            Err(e) => {
                error!(phase = ?self.phase, "{}", e);
                CycleOutcome::Aborted
            }
        };
        self.phase = PollPhase::Idle;
        outcome
    }

    fn run_cycle(&mut self, store: &dyn Store, now: i64) -> Result<CycleReport> {
        self.phase = PollPhase::Fetching;
        let raw = self.feed.fetch()?;
        let batch = panel::parse(&raw, &self.settings.base_url)?;

        self.phase = PollPhase::Reconciling;
        let mut shown = ShownState::load(store);
        let to_alert = shown.reconcile(&batch, now, self.settings.renotify_cooldown_ms);
        shown.save(store)?;

        let unread = batch.iter().filter(|r| r.unread).count();
        let threshold = self.settings.flood_warning_threshold;
        if threshold > 0 && unread >= threshold {
            warn!(
                "{} unread notifications. If you already surrendered, hit 'Mark All Read' in the notification panel to start from scratch",
                unread
            );
        }

        self.phase = PollPhase::Delivering;
        let mut failed = 0;
        for rec in &to_alert {
            if let Err(e) = self.sink.alert(&rec.title, &rec.text, &rec.link) {
                warn!(task = %rec.task, meta = %rec.meta, "{}", e);
                failed += 1;
            }
        }

        let report = CycleReport {
            fetched: batch.len(),
            unread,
            alerted: to_alert.len(),
            failed,
            tracked: shown.len(),
        };
        debug!(?report, "poll cycle done");
        Ok(report)
    }
}
