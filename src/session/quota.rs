//! Anonymous daily call quota
//!
//! This module limits anonymous identities to a fixed number of generation
//! calls per local calendar day. Authenticated identities bypass the gate
//! entirely.
//!
//! The only durable artifact is a JSON record under [`QUOTA_KEY`]:
//!
//! ```text
//! {"date": "2025-03-01", "count": 7}
//! ```
//!
//! `count` is the number of calls still allowed for `date`. It never grows
//! within a day and is rewritten to the configured limit when `date` is not
//! today.
//!
//! # Storage failures
//!
//! When the store cannot be read or written the gate fails open: it keeps
//! counting in memory, starting from the configured limit, and logs a
//! warning. Callers never see a storage error from [`QuotaGate::consume`].
//!
//! The read-decrement-write sequence is not atomic across processes sharing
//! one store; two clients racing may both spend the same unit.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::api::Identity;
use crate::storage::KeyValueStore;

/// Storage key of the quota record
pub const QUOTA_KEY: &str = "estimate_quota";

/// Storage key of the anonymous identity token
pub const ANONYMOUS_ID_KEY: &str = "anonymous_id";

/// Format of [`QuotaRecord::date`]
pub const QUOTA_DATE_FORMAT: &str = "%Y-%m-%d";

/// Persisted quota record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Calendar day the count applies to
    pub date: String,
    /// Calls still allowed on `date`
    pub count: u32,
}

impl QuotaRecord {
    fn fresh(day: NaiveDate, count: u32) -> Self {
        Self {
            date: day.format(QUOTA_DATE_FORMAT).to_string(),
            count,
        }
    }

    fn is_for(&self, day: NaiveDate) -> bool {
        NaiveDate::parse_from_str(&self.date, QUOTA_DATE_FORMAT)
            .map(|d| d == day)
            .unwrap_or(false)
    }
}

/// Source of "today"
pub trait Clock: Send + Sync {
    /// The current local calendar day
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock whose day is set by hand
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use estimate_chat::session::quota::{Clock, ManualClock};
///
/// let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
/// let clock = ManualClock::new(day);
/// clock.advance_days(1);
/// assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<NaiveDate>,
}

impl ManualClock {
    /// Create a clock fixed at `day`
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    /// Move the clock to `day`
    pub fn set(&self, day: NaiveDate) {
        if let Ok(mut current) = self.day.lock() {
            *current = day;
        }
    }

    /// Move the clock forward by whole days
    pub fn advance_days(&self, days: u64) {
        if let Ok(mut current) = self.day.lock() {
            if let Some(next) = current.checked_add_days(chrono::Days::new(days)) {
                *current = next;
            }
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        self.day
            .lock()
            .map(|d| *d)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Gate state for the current anonymous identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaState {
    /// No record has been read yet
    Uninitialized,
    /// Calls still allowed today
    Ready(u32),
    /// A call was refused today
    Exhausted,
}

/// Result of [`QuotaGate::consume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The call may proceed. `remaining` is `None` for authenticated
    /// identities, which are not counted.
    Allowed {
        /// Calls left today after this one
        remaining: Option<u32>,
    },
    /// The daily limit has been reached
    Exhausted,
}

impl QuotaDecision {
    /// Whether the call may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-day call counter for anonymous identities
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use estimate_chat::api::Identity;
/// use estimate_chat::session::quota::{QuotaDecision, QuotaGate};
/// use estimate_chat::storage::MemoryStore;
///
/// let mut gate = QuotaGate::new(2, Arc::new(MemoryStore::new()));
/// let anonymous = Identity::Anonymous { anonymous_id: "a".into() };
///
/// assert_eq!(gate.consume(&anonymous), QuotaDecision::Allowed { remaining: Some(1) });
/// assert_eq!(gate.consume(&anonymous), QuotaDecision::Allowed { remaining: Some(0) });
/// assert_eq!(gate.consume(&anonymous), QuotaDecision::Exhausted);
/// ```
pub struct QuotaGate {
    limit: u32,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: QuotaState,
    /// Last known record, used when the store is unavailable
    mirror: Option<(NaiveDate, u32)>,
}

impl QuotaGate {
    /// Create a gate on the local wall clock
    pub fn new(limit: u32, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(limit, store, Arc::new(LocalClock))
    }

    /// Create a gate with an explicit day source
    pub fn with_clock(limit: u32, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            store,
            clock,
            state: QuotaState::Uninitialized,
            mirror: None,
        }
    }

    /// Configured daily limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Current state
    pub fn state(&self) -> QuotaState {
        self.state
    }

    /// Spend one call for `identity`
    ///
    /// Authenticated identities always succeed without touching storage.
    /// For anonymous identities the record is re-read on every call, so a
    /// day change or another writer is picked up immediately.
    pub fn consume(&mut self, identity: &Identity) -> QuotaDecision {
        if identity.is_authenticated() {
            return QuotaDecision::Allowed { remaining: None };
        }

        let today = self.clock.today();
        let count = self.load(today);

        if count == 0 {
            self.state = QuotaState::Exhausted;
            tracing::info!(limit = self.limit, "Anonymous daily quota exhausted");
            return QuotaDecision::Exhausted;
        }

        let remaining = count - 1;
        self.save(today, remaining);
        self.state = QuotaState::Ready(remaining);
        tracing::debug!(remaining, "Consumed one anonymous call");
        QuotaDecision::Allowed {
            remaining: Some(remaining),
        }
    }

    /// Calls left today, `None` for authenticated identities
    pub fn remaining(&mut self, identity: &Identity) -> Option<u32> {
        if identity.is_authenticated() {
            return None;
        }
        let today = self.clock.today();
        let count = self.load(today);
        if self.state == QuotaState::Uninitialized {
            self.state = QuotaState::Ready(count);
        }
        Some(count)
    }

    /// Restore today's allowance to the configured limit
    pub fn reset(&mut self) {
        let today = self.clock.today();
        self.save(today, self.limit);
        self.state = QuotaState::Ready(self.limit);
        tracing::info!(limit = self.limit, "Anonymous quota reset");
    }

    /// Count allowed today, writing a fresh record when the stored one is
    /// missing, unreadable or from another day
    fn load(&mut self, today: NaiveDate) -> u32 {
        match self.store.get(QUOTA_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<QuotaRecord>(&raw) {
                Ok(record) if record.is_for(today) => {
                    let count = record.count.min(self.limit);
                    self.mirror = Some((today, count));
                    count
                }
                Ok(record) => {
                    tracing::debug!(stale = %record.date, "Quota record is from another day");
                    self.save(today, self.limit);
                    self.limit
                }
                Err(e) => {
                    tracing::warn!("Discarding unreadable quota record: {}", e);
                    self.save(today, self.limit);
                    self.limit
                }
            },
            Ok(None) => {
                self.save(today, self.limit);
                self.limit
            }
            Err(e) => {
                tracing::warn!("Quota storage unavailable, counting in memory: {}", e);
                match self.mirror {
                    Some((day, count)) if day == today => count,
                    _ => {
                        self.mirror = Some((today, self.limit));
                        self.limit
                    }
                }
            }
        }
    }

    fn save(&mut self, today: NaiveDate, count: u32) {
        self.mirror = Some((today, count));
        let record = QuotaRecord::fresh(today, count);
        let result = serde_json::to_string(&record)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(QUOTA_KEY, &raw));
        if let Err(e) = result {
            tracing::warn!("Failed to persist quota record, counting in memory: {}", e);
        }
    }
}

/// Load the anonymous identity token, generating and persisting one on
/// first use
///
/// If the store is unavailable the token is generated for this process
/// only.
pub fn anonymous_identity(store: &dyn KeyValueStore) -> Identity {
    match store.get(ANONYMOUS_ID_KEY) {
        Ok(Some(id)) if !id.trim().is_empty() => {
            return Identity::Anonymous { anonymous_id: id };
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Could not read anonymous identity: {}", e),
    }

    let anonymous_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = store.set(ANONYMOUS_ID_KEY, &anonymous_id) {
        tracing::warn!("Anonymous identity will not survive restart: {}", e);
    }
    Identity::Anonymous { anonymous_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EstimateError, Result};
    use crate::storage::MemoryStore;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(EstimateError::Storage("blocked".into()).into())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(EstimateError::Storage("blocked".into()).into())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn anonymous() -> Identity {
        Identity::Anonymous {
            anonymous_id: "anon-1".into(),
        }
    }

    fn stored(store: &MemoryStore) -> QuotaRecord {
        serde_json::from_str(&store.get(QUOTA_KEY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_count_after_k_calls() {
        let limit = 5;
        for k in 0..=8u32 {
            let store = Arc::new(MemoryStore::new());
            let mut gate =
                QuotaGate::with_clock(limit, store.clone(), Arc::new(ManualClock::new(day(1))));
            let mut allowed = 0;
            for _ in 0..k {
                if gate.consume(&anonymous()).is_allowed() {
                    allowed += 1;
                }
            }
            assert_eq!(allowed, k.min(limit));
            if k > 0 {
                assert_eq!(stored(&store).count, limit.saturating_sub(k));
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut gate = QuotaGate::with_clock(
            1,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(day(1))),
        );
        assert_eq!(gate.state(), QuotaState::Uninitialized);

        gate.consume(&anonymous());
        assert_eq!(gate.state(), QuotaState::Ready(0));

        assert_eq!(gate.consume(&anonymous()), QuotaDecision::Exhausted);
        assert_eq!(gate.state(), QuotaState::Exhausted);

        gate.reset();
        assert_eq!(gate.state(), QuotaState::Ready(1));
        assert!(gate.consume(&anonymous()).is_allowed());
    }

    #[test]
    fn test_rollover_from_exhausted_yesterday() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(QUOTA_KEY, r#"{"date":"2025-03-01","count":0}"#)
            .unwrap();
        let mut gate = QuotaGate::with_clock(11, store.clone(), Arc::new(ManualClock::new(day(2))));

        assert_eq!(
            gate.consume(&anonymous()),
            QuotaDecision::Allowed { remaining: Some(10) }
        );
        assert_eq!(
            stored(&store),
            QuotaRecord {
                date: "2025-03-02".into(),
                count: 10
            }
        );
    }

    #[test]
    fn test_authenticated_never_touches_storage() {
        let mut gate = QuotaGate::new(1, Arc::new(FailingStore));
        let user = Identity::Authenticated {
            token: "t".into(),
        };
        for _ in 0..5 {
            assert_eq!(gate.consume(&user), QuotaDecision::Allowed { remaining: None });
        }
        assert_eq!(gate.remaining(&user), None);
        assert_eq!(gate.state(), QuotaState::Uninitialized);
    }

    #[test]
    fn test_storage_failure_fails_open_with_memory_count() {
        let mut gate =
            QuotaGate::with_clock(2, Arc::new(FailingStore), Arc::new(ManualClock::new(day(1))));
        assert!(gate.consume(&anonymous()).is_allowed());
        assert!(gate.consume(&anonymous()).is_allowed());
        assert_eq!(gate.consume(&anonymous()), QuotaDecision::Exhausted);
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUOTA_KEY, "not json").unwrap();
        let mut gate = QuotaGate::with_clock(3, store.clone(), Arc::new(ManualClock::new(day(1))));
        assert_eq!(gate.remaining(&anonymous()), Some(3));
        assert_eq!(stored(&store).count, 3);
    }

    #[test]
    fn test_stored_count_above_limit_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(QUOTA_KEY, r#"{"date":"2025-03-01","count":99}"#)
            .unwrap();
        let mut gate = QuotaGate::with_clock(3, store, Arc::new(ManualClock::new(day(1))));
        assert_eq!(gate.remaining(&anonymous()), Some(3));
    }

    #[test]
    fn test_anonymous_identity_is_stable() {
        let store = MemoryStore::new();
        let first = anonymous_identity(&store);
        let second = anonymous_identity(&store);
        assert_eq!(first, second);
        assert!(!first.is_authenticated());
    }

    #[test]
    fn test_anonymous_identity_without_storage() {
        let identity = anonymous_identity(&FailingStore);
        match identity {
            Identity::Anonymous { anonymous_id } => assert_eq!(anonymous_id.len(), 36),
            other => panic!("unexpected identity {:?}", other),
        }
    }
}
