//! Activity ledger: totals, day-bucketed counters and a bounded recent feed.
//!
//! Written once per terminal outcome, read by status pages and the admin
//! dashboard. Day buckets are computed in one fixed timezone for the whole
//! process.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use turnstile_core::{ActivityEntry, ActivityKind, Clock};

/// Entries kept in the recent-activity feed.
pub const RECENT_CAPACITY: usize = 20;

/// Days covered by the admin chart, today included.
const CHART_DAYS: u64 = 7;

/// Aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_successes: u64,
    pub total_errors: u64,
    #[serde(default)]
    pub daily_successes: BTreeMap<NaiveDate, u64>,
    #[serde(default)]
    pub daily_errors: BTreeMap<NaiveDate, u64>,
}

/// Persistable ledger state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Newest first.
    pub recent_activity: Vec<ActivityEntry>,
    pub stats: LedgerStats,
}

/// One day of the admin chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub successes: u64,
    pub errors: u64,
}

/// Admin dashboard view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminSummary {
    pub total_successes: u64,
    pub total_errors: u64,
    pub today: DailyBucket,
    /// Oldest first, zero-filled, ending today.
    pub last_7_days: Vec<DailyBucket>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    stats: LedgerStats,
    recent: VecDeque<ActivityEntry>,
}

pub struct ActivityLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    started_at: DateTime<Utc>,
}

impl core::fmt::Debug for ActivityLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActivityLedger")
            .field("timezone", &self.timezone)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ActivityLedger {
    pub fn new(clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        let started_at = clock.now();
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
            timezone,
            started_at,
        }
    }

    /// Replace state with a previously persisted snapshot.
    pub fn restore(&self, snapshot: LedgerSnapshot) {
        let mut state = self.lock();
        state.stats = snapshot.stats;
        state.recent = snapshot
            .recent_activity
            .into_iter()
            .take(RECENT_CAPACITY)
            .collect();
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            recent_activity: state.recent.iter().cloned().collect(),
            stats: state.stats.clone(),
        }
    }

    pub fn record_success(&self, username: &str, outcome_id: &str, credential: Option<&str>) {
        self.record(
            username,
            ActivityKind::Success {
                outcome_id: outcome_id.to_string(),
            },
            credential,
        );
    }

    pub fn record_error(&self, username: &str, message: &str, credential: Option<&str>) {
        self.record(
            username,
            ActivityKind::Error {
                message: message.to_string(),
            },
            credential,
        );
    }

    /// Most recent entries, newest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.lock().recent.iter().take(limit).cloned().collect()
    }

    /// Successes in today's bucket.
    pub fn today_successes(&self) -> u64 {
        let today = self.today();
        self.lock()
            .stats
            .daily_successes
            .get(&today)
            .copied()
            .unwrap_or(0)
    }

    pub fn admin_summary(&self) -> AdminSummary {
        let now = self.clock.now();
        let today = self.local_date(now);
        let state = self.lock();

        let bucket = |date: NaiveDate| DailyBucket {
            date,
            successes: state.stats.daily_successes.get(&date).copied().unwrap_or(0),
            errors: state.stats.daily_errors.get(&date).copied().unwrap_or(0),
        };

        let last_7_days = (0..CHART_DAYS)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .map(bucket)
            .collect();

        AdminSummary {
            total_successes: state.stats.total_successes,
            total_errors: state.stats.total_errors,
            today: bucket(today),
            last_7_days,
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds().max(0),
        }
    }

    fn record(&self, username: &str, kind: ActivityKind, credential: Option<&str>) {
        let now = self.clock.now();
        let day = self.local_date(now);
        let mut state = self.lock();

        match kind {
            ActivityKind::Success { .. } => {
                state.stats.total_successes += 1;
                *state.stats.daily_successes.entry(day).or_insert(0) += 1;
            }
            ActivityKind::Error { .. } => {
                state.stats.total_errors += 1;
                *state.stats.daily_errors.entry(day).or_insert(0) += 1;
            }
        }

        state.recent.push_front(ActivityEntry {
            username: username.to_string(),
            kind,
            credential: credential.map(str::to_string),
            timestamp: now,
        });
        state.recent.truncate(RECENT_CAPACITY);
    }

    fn today(&self) -> NaiveDate {
        self.local_date(self.clock.now())
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use turnstile_core::ManualClock;

    fn setup(tz: Tz) -> (ActivityLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()));
        (ActivityLedger::new(clock.clone(), tz), clock)
    }

    #[test]
    fn ring_buffer_keeps_newest_twenty() {
        let (ledger, _) = setup(Tz::UTC);
        for i in 0..25 {
            ledger.record_success(&format!("user{i}"), "gold_monthly", Some("k1"));
        }

        let all = ledger.recent(100);
        assert_eq!(all.len(), RECENT_CAPACITY);
        assert_eq!(all[0].username, "user24");
        assert_eq!(all[19].username, "user5");
        assert!(all.iter().all(|e| e.username != "user4"));
        assert_eq!(ledger.snapshot().stats.total_successes, 25);
    }

    #[test]
    fn recent_respects_limit_and_order() {
        let (ledger, clock) = setup(Tz::UTC);
        ledger.record_success("alice", "gold_monthly", Some("k1"));
        clock.advance(Duration::seconds(1));
        ledger.record_error("bob", "identity not found", None);

        let one = ledger.recent(1);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].username, "bob");
        assert!(!one[0].is_success());

        let two = ledger.recent(2);
        assert!(two[0].timestamp > two[1].timestamp);
        assert_eq!(ledger.recent(0).len(), 0);
    }

    #[test]
    fn admin_summary_zero_fills_the_week() {
        let (ledger, clock) = setup(Tz::UTC);
        clock.advance(Duration::days(-3));
        ledger.record_success("a", "x", None);
        clock.advance(Duration::days(3));
        ledger.record_success("b", "x", None);
        ledger.record_error("c", "boom", None);

        let summary = ledger.admin_summary();
        assert_eq!(summary.total_successes, 2);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.today.successes, 1);
        assert_eq!(summary.today.errors, 1);
        assert_eq!(summary.last_7_days.len(), 7);

        let counts: Vec<u64> = summary.last_7_days.iter().map(|d| d.successes).collect();
        assert_eq!(counts, [0, 0, 0, 1, 0, 0, 1]);
        assert_eq!(summary.last_7_days[6].date, summary.today.date);
        assert_eq!(summary.uptime_secs, 0);
    }

    #[test]
    fn buckets_follow_the_reference_timezone() {
        // 23:30 UTC on the 10th is already the 11th in Tokyo.
        let (ledger, clock) = setup(chrono_tz::Asia::Tokyo);
        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap());
        ledger.record_success("a", "x", None);

        let stats = ledger.snapshot().stats;
        let key = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(stats.daily_successes.get(&key), Some(&1));
        assert_eq!(ledger.today_successes(), 1);
    }

    #[test]
    fn restore_round_trips_through_json() {
        let (ledger, _) = setup(Tz::UTC);
        ledger.record_success("alice", "gold_monthly", Some("k1"));
        ledger.record_error("bob", "nope", Some("k2"));

        let json = serde_json::to_string(&ledger.snapshot()).unwrap();
        let (fresh, _) = setup(Tz::UTC);
        fresh.restore(serde_json::from_str(&json).unwrap());

        assert_eq!(fresh.snapshot(), ledger.snapshot());
    }
}
