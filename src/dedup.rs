use crate::error::Result;
use crate::models::notification::NotificationRecord;
use crate::util::store::{load_or_default, save_json, Store};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const SHOWN_KEY: &str = "notificator-shown";

/// Alert bookkeeping for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Once reached, the task is alerted again even if every meta is acknowledged.
    pub next_renotify_at: i64,
    #[serde(default)]
    pub acknowledged_meta_ids: BTreeSet<String>,
}

/// Task id → [`TaskEntry`] for every unread task of the latest fetched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShownState {
    pub tasks: BTreeMap<String, TaskEntry>,
}

impl ShownState {
    /// Load from the store; missing or undecodable state is empty.
    pub fn load(store: &dyn Store) -> Self {
        load_or_default(store, SHOWN_KEY)
    }

    /// Persist the whole mapping in one write.
    pub fn save(&self, store: &dyn Store) -> Result<()> {
        save_json(store, SHOWN_KEY, self)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Fold a freshly fetched batch (newest first) into the state and return the
    /// records to alert, oldest first.
    ///
    /// Only unread records take part. A record is alerted when its task is new,
    /// when its meta has not been alerted yet, or when the task's renotify time
    /// has been reached. Overdue tasks advance `next_renotify_at` by exactly one
    /// cooldown from the previous threshold, not from `now`, so a long pause is
    /// paid back one cooldown per poll. Tasks with no unread record in the batch
    /// are forgotten. A cooldown of zero or less re-alerts on every call.
    pub fn reconcile(
        &mut self,
        batch: &[NotificationRecord],
        now: i64,
        renotify_cooldown_ms: i64,
    ) -> Vec<NotificationRecord> {
        let mut to_alert = Vec::new();
        let mut present: HashSet<&str> = HashSet::new();

        for rec in batch.iter().filter(|r| r.unread) {
            present.insert(rec.task.as_str());

            let (entry, show) = match self.tasks.entry(rec.task.clone()) {
                Entry::Vacant(slot) => {
                    let entry = slot.insert(TaskEntry {
                        next_renotify_at:      now.saturating_add(renotify_cooldown_ms),
                        acknowledged_meta_ids: BTreeSet::new(),
                    });
                    (entry, true)
                }
                Entry::Occupied(slot) => {
                    let entry = slot.into_mut();
                    let mut show = !entry.acknowledged_meta_ids.contains(&rec.meta);
                    if now >= entry.next_renotify_at {
                        entry.next_renotify_at = entry.next_renotify_at.saturating_add(renotify_cooldown_ms);
                        show = true;
                    }
                    (entry, show)
                }
            };

            if show {
                entry.acknowledged_meta_ids.insert(rec.meta.clone());
                to_alert.push(rec.clone());
            }
        }

        self.tasks.retain(|task, _| present.contains(task.as_str()));

        to_alert.reverse();
        to_alert
    }
}
