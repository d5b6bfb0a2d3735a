use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_REMOVE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveEntity {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub count: usize,
    pub items: Vec<ActiveEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub newly_seen: HashSet<String>,
    pub applied_now: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PresenceState {
    active: HashMap<String, ActiveEntity>,
    latest_now: Option<DateTime<Utc>>,
}

/// Time-windowed set of tags currently in front of the reader.
///
/// A tag stays active while it is re-observed within the grace window. Eviction only happens in
/// [`PresenceTracker::mark_seen`], so a call with no ids is how time alone moves stale tags out.
#[derive(Debug)]
pub struct PresenceTracker {
    state: Mutex<PresenceState>,
    grace: ChronoDuration,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REMOVE_GRACE)
    }
}

impl PresenceTracker {
    pub fn new(grace: Duration) -> Self {
        let grace = ChronoDuration::from_std(grace).unwrap_or_else(|_| {
            tracing::warn!(
                requested = ?grace,
                fallback = ?DEFAULT_REMOVE_GRACE,
                "remove grace out of range; using the default"
            );
            ChronoDuration::seconds(DEFAULT_REMOVE_GRACE.as_secs() as i64)
        });
        Self {
            state: Mutex::new(PresenceState::default()),
            grace,
        }
    }

    pub fn grace(&self) -> ChronoDuration {
        self.grace
    }

    /// Records one observation of every id in `ids` at `now` (wall clock when `None`) and
    /// returns the ids that were not active before this call.
    ///
    /// Duplicates within `ids` count once. Entities whose `last_seen` falls before
    /// `now - grace` are evicted afterwards. A `now` older than the latest applied `now` is
    /// clamped up to it, so eviction math only ever sees monotonic time.
    pub fn mark_seen<I, S>(&self, ids: I, now: Option<DateTime<Utc>>) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.observe(ids, now).newly_seen
    }

    /// [`PresenceTracker::mark_seen`], also reporting the `now` that was actually applied
    /// after clamping. Anything stamped alongside the observation should use that time.
    pub fn observe<I, S>(&self, ids: I, now: Option<DateTime<Utc>>) -> Observation
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested = now.unwrap_or_else(Utc::now);
        let mut state = self.lock();

        let now = match state.latest_now {
            Some(latest) if requested < latest => {
                tracing::debug!(
                    requested = %requested,
                    latest = %latest,
                    "clamping out-of-order presence timestamp"
                );
                latest
            }
            _ => requested,
        };
        state.latest_now = Some(now);

        let mut newly_seen = HashSet::new();
        for id in ids {
            let id = id.as_ref();
            match state.active.get_mut(id) {
                Some(entity) => entity.last_seen = now,
                None => {
                    state.active.insert(
                        id.to_string(),
                        ActiveEntity {
                            id: id.to_string(),
                            first_seen: now,
                            last_seen: now,
                        },
                    );
                    newly_seen.insert(id.to_string());
                }
            }
        }

        let cutoff = now - self.grace;
        let before = state.active.len();
        state.active.retain(|_, entity| entity.last_seen >= cutoff);
        let evicted = before - state.active.len();
        if evicted > 0 {
            tracing::debug!(evicted, active = state.active.len(), "evicted stale tags");
        }

        Observation {
            newly_seen,
            applied_now: now,
        }
    }

    /// Active entities, most recent first arrival first. Ties break on id for a stable order.
    pub fn list_active(&self) -> Vec<ActiveEntity> {
        let state = self.lock();
        let mut items: Vec<ActiveEntity> = state.active.values().cloned().collect();
        items.sort_by(|a, b| {
            b.first_seen
                .cmp(&a.first_seen)
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.lock().active.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().active.contains_key(id)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let items = self.list_active();
        PresenceSnapshot {
            count: items.len(),
            items,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
