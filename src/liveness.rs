use crate::util::store::{load_or_default, save_json, Store};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const RUNNING_KEY: &str = "notificator-running";

/// Instance start time (ms) → last heartbeat (ms), shared by all instances.
pub type LivenessRecord = BTreeMap<i64, i64>;

/// Result of one heartbeat. Valid until the next heartbeat of the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElectionOutcome {
    /// Live instances that started strictly before this one.
    pub older_alive: usize,
    /// Every other live instance, older or newer.
    pub others_alive: usize,
}

impl ElectionOutcome {
    pub fn is_leader(&self) -> bool {
        self.older_alive == 0
    }
}

/// An entry is stale once its heartbeat is more than two intervals away from
/// `now`, in either direction. A heartbeat that far in the future comes from a
/// skewed clock or a damaged record and would otherwise never expire.
fn is_stale(last_heartbeat: i64, now: i64, heartbeat_interval_ms: i64) -> bool {
    let window = heartbeat_interval_ms.saturating_mul(2);
    let age = now.saturating_sub(last_heartbeat);
    age > window || age < window.saturating_neg()
}

/// Record a heartbeat for `instance_id` and decide whether it leads this tick.
///
/// Stale entries of other instances are reaped as a side effect. The earliest
/// started live instance leads; everyone else follows and keeps heartbeating so
/// it can take over once the leader's entry goes stale. An unreadable record is
/// treated as empty, which makes this instance leader rather than letting a
/// corrupt value silence every instance.
pub fn tick(
    store: &dyn Store,
    instance_id: i64,
    now: i64,
    heartbeat_interval_ms: i64,
) -> ElectionOutcome {
    let mut running: LivenessRecord = load_or_default(store, RUNNING_KEY);

    running.retain(|start, hb| {
        let stale = is_stale(*hb, now, heartbeat_interval_ms);
        if stale && *start != instance_id {
            debug!(instance = *start, last_heartbeat = *hb, "reaping stale instance");
        }
        !stale
    });

    let older_alive  = running.keys().filter(|&&start| start < instance_id).count();
    let others_alive = running.keys().filter(|&&start| start != instance_id).count();

    running.insert(instance_id, now);
    if let Err(e) = save_json(store, RUNNING_KEY, &running) {
        warn!("failed to record heartbeat: {}", e);
    }

    ElectionOutcome { older_alive, others_alive }
}

/// Live entries as of `now`, without writing anything.
pub fn snapshot(store: &dyn Store, now: i64, heartbeat_interval_ms: i64) -> LivenessRecord {
    let mut running: LivenessRecord = load_or_default(store, RUNNING_KEY);
    running.retain(|_, hb| !is_stale(*hb, now, heartbeat_interval_ms));
    running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::fakes::FailingStore;
    use crate::util::store::MemoryStore;

    const HB: i64 = 5_000;

    #[test]
    fn lone_instance_leads_and_registers() {
        let store = MemoryStore::new();
        let out = tick(&store, 100, 1_000, HB);
        assert!(out.is_leader());
        assert_eq!(out.others_alive, 0);
        assert_eq!(snapshot(&store, 1_000, HB).get(&100), Some(&1_000));
    }

    #[test]
    fn older_live_instance_wins() {
        let store = MemoryStore::new();
        assert!(tick(&store, 100, 1_000, HB).is_leader());

        let newer = tick(&store, 200, 1_500, HB);
        assert!(!newer.is_leader());
        assert_eq!(newer.older_alive, 1);
        assert_eq!(newer.others_alive, 1);

        // A newer instance never outranks an older one.
        let older = tick(&store, 100, 6_000, HB);
        assert!(older.is_leader());
        assert_eq!(older.others_alive, 1);
    }

    #[test]
    fn entry_at_exactly_twice_interval_is_still_live() {
        let store = MemoryStore::new();
        tick(&store, 100, 0, HB);
        let out = tick(&store, 200, 2 * HB, HB);
        assert!(!out.is_leader());

        let out = tick(&store, 200, 2 * HB + 1, HB);
        assert!(out.is_leader());
        assert!(!snapshot(&store, 2 * HB + 1, HB).contains_key(&100));
    }

    #[test]
    fn corrupt_record_fails_open() {
        let store = MemoryStore::new();
        store.set(RUNNING_KEY, "][").expect("write");
        let out = tick(&store, 300, 1_000, HB);
        assert!(out.is_leader());

        let record: LivenessRecord = load_or_default(&store, RUNNING_KEY);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get(&300), Some(&1_000));
    }

    #[test]
    fn extreme_heartbeats_are_reaped() {
        for now in [1_000_i64, 1_000_000, 1_000_000_000] {
            let store = MemoryStore::new();
            store.set(RUNNING_KEY, &format!(r#"{{"1":{}}}"#, i64::MIN)).expect("write");
            let out = tick(&store, 300, now, HB);
            assert!(out.is_leader(), "now = {now}");
            assert_eq!(out.others_alive, 0);
            assert!(!snapshot(&store, now, HB).contains_key(&1));
        }
    }

    #[test]
    fn heartbeat_far_in_the_future_is_stale() {
        let store = MemoryStore::new();
        store.set(RUNNING_KEY, &format!(r#"{{"1":{},"2":{}}}"#, i64::MAX, 1_000 + 2 * HB + 1)).expect("write");
        let out = tick(&store, 300, 1_000, HB);
        assert!(out.is_leader());
        let record: LivenessRecord = load_or_default(&store, RUNNING_KEY);
        assert_eq!(record.keys().copied().collect::<Vec<_>>(), vec![300]);

        // Small skew within the window keeps the entry live.
        let store = MemoryStore::new();
        tick(&store, 100, 1_000 + 2 * HB, HB);
        assert!(!tick(&store, 200, 1_000, HB).is_leader());
    }

    #[test]
    fn failed_heartbeat_write_keeps_the_outcome() {
        let store = FailingStore::default();
        assert!(tick(&store, 300, 1_000, HB).is_leader());

        store.inner.set(RUNNING_KEY, r#"{"100":900}"#).expect("write");
        let out = tick(&store, 300, 1_000, HB);
        assert!(!out.is_leader());
        assert_eq!(out.older_alive, 1);
        assert_eq!(store.inner.get(RUNNING_KEY).as_deref(), Some(r#"{"100":900}"#));
    }

    #[test]
    fn follower_keeps_heartbeating() {
        let store = MemoryStore::new();
        tick(&store, 100, 0, HB);
        tick(&store, 200, 10, HB);
        tick(&store, 200, 10 + HB, HB);
        assert_eq!(snapshot(&store, 10 + HB, HB).get(&200), Some(&(10 + HB)));
    }

    /// Several instances ticking on one shared store, each slightly offset in
    /// time. Among ticking instances exactly the earliest-started live one leads.
    #[test]
    fn simulated_instances_elect_exactly_one_leader() {
        let store = MemoryStore::new();
        let starts = [1_000_i64, 1_001, 1_002, 1_003];
        let mut alive = [true; 4];
        let mut stopped_at: Option<i64> = None;

        for round in 0..30_i64 {
            if round == 10 {
                alive[0] = false;
                stopped_at = Some(10_000 + 9 * HB);
            }
            let mut leaders = Vec::new();
            for (i, &start) in starts.iter().enumerate() {
                if !alive[i] { continue; }
                let now = 10_000 + round * HB + i as i64 * 10;
                let out = tick(&store, start, now, HB);
                if out.is_leader() { leaders.push(start); }

                let live = snapshot(&store, now, HB);
                let earliest = *live.keys().next().expect("self is registered");
                assert_eq!(out.is_leader(), earliest == start, "round {round}, instance {start}");
            }

            assert!(leaders.len() <= 1, "round {round}: {leaders:?}");
            let now = 10_000 + round * HB;
            let grace_over = stopped_at.map_or(true, |t| now - t > 2 * HB);
            if grace_over {
                let expected = starts.iter().zip(alive).find(|(_, a)| *a).map(|(s, _)| *s);
                assert_eq!(leaders, expected.into_iter().collect::<Vec<_>>(), "round {round}");
            }
        }

        let end = 10_000 + 29 * HB;
        assert!(!snapshot(&store, end, HB).contains_key(&1_000));
        assert_eq!(snapshot(&store, end, HB).len(), 3);
    }

    #[test]
    fn stopped_instance_is_reaped_by_a_survivor() {
        let store = MemoryStore::new();
        tick(&store, 100, 0, HB);
        tick(&store, 200, 0, HB);

        // 100 stops; 200 keeps ticking.
        let mut now = 0;
        while now <= 2 * HB {
            now += HB;
            tick(&store, 200, now, HB);
        }
        let record: LivenessRecord = load_or_default(&store, RUNNING_KEY);
        assert!(!record.contains_key(&100));
        assert!(now <= 3 * HB);
    }
}
