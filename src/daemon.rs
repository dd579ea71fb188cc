use crate::config::GeneralConfig;
use crate::liveness::{self, ElectionOutcome};
use crate::poller::{CycleOutcome, Poller};
use crate::util::clock::Clock;
use crate::util::store::Store;
use std::time::Duration;
use tracing::{debug, info};

const MIN_INTERVAL_MS: i64 = 500;

/// One running instance: a fast heartbeat timer and a slower poll timer,
/// serviced from a single thread.
pub struct Daemon<C: Clock> {
    clock:         C,
    store:         Box<dyn Store>,
    poller:        Poller,
    instance_id:   i64,
    heartbeat_ms:  i64,
    poll_ms:       i64,
    /// None until the first heartbeat.
    election:      Option<ElectionOutcome>,
    next_heartbeat: i64,
    next_poll:     i64,
}

impl<C: Clock> Daemon<C> {
    /// The instance id is the start time read from `clock`. The first heartbeat
    /// is due immediately, the first poll one poll interval later.
    pub fn new(clock: C, store: Box<dyn Store>, poller: Poller, general: &GeneralConfig) -> Self {
        let instance_id  = clock.now_ms();
        let heartbeat_ms = (general.heartbeat_interval_ms as i64).max(MIN_INTERVAL_MS);
        let poll_ms      = (general.poll_interval_ms as i64).max(MIN_INTERVAL_MS);
        Self {
            clock,
            store,
            poller,
            instance_id,
            heartbeat_ms,
            poll_ms,
            election: None,
            next_heartbeat: instance_id,
            next_poll: instance_id + poll_ms,
        }
    }

    #[cfg(test)]
    pub fn election(&self) -> Option<ElectionOutcome> {
        self.election
    }

    #[cfg(test)]
    pub fn is_leader(&self) -> bool {
        self.election.is_some_and(|e| e.is_leader())
    }

    pub fn heartbeat(&mut self) -> ElectionOutcome {
        let now = self.clock.now_ms();
        let outcome = liveness::tick(self.store.as_ref(), self.instance_id, now, self.heartbeat_ms);
        if self.election.map(|e| e.is_leader()) != Some(outcome.is_leader()) {
            if outcome.is_leader() {
                info!(instance = self.instance_id, "this instance is now polling");
            } else {
                info!(instance = self.instance_id, "an older instance is running, standing by");
            }
        }
        self.election = Some(outcome);
        outcome
    }

    pub fn poll(&mut self) -> CycleOutcome {
        let election = match self.election {
            Some(e) => e,
            None    => self.heartbeat(),
        };
        let now = self.clock.now_ms();
        self.poller.on_tick(self.store.as_ref(), &election, now)
    }

    /// Fire whichever timers are due. Returns the poll outcome if the poll timer fired.
    pub fn step(&mut self) -> Option<CycleOutcome> {
        let now = self.clock.now_ms();
        if now >= self.next_heartbeat {
            self.heartbeat();
            self.next_heartbeat = next_due(self.next_heartbeat, self.heartbeat_ms, now);
        }
        if now >= self.next_poll {
            let outcome = self.poll();
            self.next_poll = next_due(self.next_poll, self.poll_ms, now);
            return Some(outcome);
        }
        None
    }

    /// Time until the next timer is due.
    pub fn until_next(&self) -> Duration {
        let now = self.clock.now_ms();
        let due = self.next_heartbeat.min(self.next_poll);
        Duration::from_millis((due - now).max(0) as u64)
    }

    /// Service both timers until the process is stopped. Stopping leaves the
    /// liveness entry behind; other instances reap it once it goes stale.
    pub fn run(&mut self) -> ! {
        info!(
            instance = self.instance_id,
            heartbeat_ms = self.heartbeat_ms,
            poll_ms = self.poll_ms,
            "notificator started"
        );
        loop {
            if let Some(outcome) = self.step() {
                debug!(?outcome, "poll tick");
            }
            std::thread::sleep(self.until_next());
        }
    }
}

/// Next slot on the fixed cadence strictly after `now`; missed slots are skipped.
fn next_due(prev_due: i64, interval: i64, now: i64) -> i64 {
    let mut due = prev_due + interval;
    if due <= now {
        let missed = (now - due) / interval + 1;
        due += missed * interval;
    }
    due
}
