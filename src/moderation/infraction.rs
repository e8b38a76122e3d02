//! Infraction records and their store
//!
//! An infraction is an immutable historical record of a moderation action.
//! Records are created by the orchestrator on a successful punishment, by
//! the sweep on a successful reversal, and by the audit observer for
//! actions performed outside the bot. The only delete paths are the
//! orchestrator's compensating delete and warn retention pruning.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ActionKind, InfractionFlag, NO_REASON};

/// Entries per page returned by [`InfractionStore::search`].
pub const SEARCH_PAGE_SIZE: usize = 10;

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a time-sortable infraction id.
///
/// Fixed-width hex: millisecond timestamp, then a wrapping per-process
/// sequence to order ids minted in the same millisecond, then a random
/// salt. Lexicographic order approximates chronological order.
#[must_use]
pub fn next_infraction_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    let salt: u32 = rand::random();
    format!("{millis:012x}{seq:04x}{salt:08x}")
}

/// An immutable record of a moderation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infraction {
    /// Unique, time-sortable id
    pub id: String,
    /// Guild where the action happened
    pub guild_id: u64,
    /// User the action was taken against
    pub target_id: u64,
    /// Moderator (or bot) that performed the action
    pub executor_id: u64,
    /// What was done
    pub kind: ActionKind,
    /// Why, or the no-reason sentinel
    pub reason: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the punishment lapses; `None` means permanent or not
    /// time-bounded
    pub expires_at: Option<DateTime<Utc>>,
    /// Origin marker
    pub flag: InfractionFlag,
}

impl Infraction {
    /// Create a new infraction record with a freshly generated id.
    #[must_use]
    pub fn new(
        guild_id: u64,
        target_id: u64,
        executor_id: u64,
        kind: ActionKind,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        flag: InfractionFlag,
    ) -> Self {
        Self {
            id: next_infraction_id(),
            guild_id,
            target_id,
            executor_id,
            kind,
            reason: reason.unwrap_or_else(|| NO_REASON.to_string()),
            created_at: Utc::now(),
            expires_at,
            flag,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone)]
pub struct InfractionPage {
    /// Records on this page, newest first
    pub entries: Vec<Infraction>,
    /// Zero-based page index
    pub page: usize,
    /// Total matching records across all pages
    pub total: usize,
}

/// Store for infraction records
#[derive(Clone, Default)]
pub struct InfractionStore {
    records: Arc<DashMap<String, Infraction>>,
}

impl InfractionStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record and return it.
    pub fn store(&self, record: Infraction) -> Infraction {
        self.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Get a record by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Infraction> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Delete a record by id. Idempotent: returns `None` if already absent.
    ///
    /// Used only as the compensating action when a punishment failed after
    /// the record was optimistically created, and by warn pruning.
    pub fn delete(&self, id: &str) -> Option<Infraction> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Search a target's history in a guild, newest first, paginated.
    #[must_use]
    pub fn search(
        &self,
        guild_id: u64,
        target_id: u64,
        kind: Option<ActionKind>,
        page: usize,
    ) -> InfractionPage {
        let mut matches: Vec<Infraction> = self
            .records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                let kind_ok = kind.is_none_or(|k| record.kind == k);
                if record.guild_id == guild_id && record.target_id == target_id && kind_ok {
                    Some(record.clone())
                } else {
                    None
                }
            })
            .collect();

        // Ids are time-sortable, so id order is chronological order.
        matches.sort_by(|a, b| b.id.cmp(&a.id));

        let total = matches.len();
        let entries = matches
            .into_iter()
            .skip(page * SEARCH_PAGE_SIZE)
            .take(SEARCH_PAGE_SIZE)
            .collect();

        InfractionPage {
            entries,
            page,
            total,
        }
    }

    /// Delete all expired warn records and return how many were pruned.
    ///
    /// Warns are never reversed at the platform, only pruned from history.
    pub fn prune_expired_warns(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                if record.kind == ActionKind::Warn
                    && record.expires_at.is_some_and(|at| at <= now)
                {
                    Some(record.id.clone())
                } else {
                    None
                }
            })
            .collect();

        let mut pruned = 0;
        for id in expired {
            if self.records.remove(&id).is_some() {
                pruned += 1;
            }
        }
        pruned
    }

    /// All records, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Infraction> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Load records, for startup.
    pub fn restore(&self, records: Vec<Infraction>) {
        for record in records {
            self.records.insert(record.id.clone(), record);
        }
    }

    /// Number of records in the store
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
