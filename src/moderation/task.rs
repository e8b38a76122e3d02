//! Pending reversal tasks and their store
//!
//! A task is the durable promise that a timed punishment will be undone.
//! At most one task exists per (guild, target, class): a task exists iff
//! the punishment is believed to still be in effect and time-bounded, and
//! its absence for a currently-punished target means the punishment is
//! believed permanent.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::ReversalClass;

/// Uniqueness key for a pending reversal task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Guild the punishment applies in
    pub guild_id: u64,
    /// Punished user
    pub target_id: u64,
    /// Which punishment class the task reverses
    pub class: ReversalClass,
}

impl TaskKey {
    /// Create a task key
    #[must_use]
    pub fn new(guild_id: u64, target_id: u64, class: ReversalClass) -> Self {
        Self {
            guild_id,
            target_id,
            class,
        }
    }
}

/// A pending scheduled reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevTask {
    /// Unique id of this task
    pub id: String,
    /// Guild the punishment applies in
    pub guild_id: u64,
    /// Punished user
    pub target_id: u64,
    /// Which punishment class this task reverses
    pub class: ReversalClass,
    /// The infraction that created this obligation
    pub infraction_id: String,
    /// When the reversal is due
    pub expires_at: DateTime<Utc>,
}

impl RevTask {
    /// The uniqueness key of this task
    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.guild_id, self.target_id, self.class)
    }
}

/// Store for pending reversal tasks
///
/// Upsert and delete are the only mutation paths, which is what enforces
/// the one-task-per-key invariant.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<DashMap<TaskKey, RevTask>>,
}

impl TaskStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or fully replace the task for a key.
    ///
    /// An existing task keeps its id but every other field is replaced;
    /// a new key gets a fresh id.
    pub fn upsert(
        &self,
        key: TaskKey,
        infraction_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> RevTask {
        let id = self
            .tasks
            .get(&key)
            .map_or_else(|| Uuid::new_v4().to_string(), |prior| prior.id.clone());

        let task = RevTask {
            id,
            guild_id: key.guild_id,
            target_id: key.target_id,
            class: key.class,
            infraction_id: infraction_id.into(),
            expires_at,
        };
        self.tasks.insert(key, task.clone());
        task
    }

    /// Get the task for a key
    #[must_use]
    pub fn get(&self, key: TaskKey) -> Option<RevTask> {
        self.tasks.get(&key).map(|entry| entry.value().clone())
    }

    /// Delete the task for a key. Idempotent: `None` means there was
    /// nothing to delete, which callers must not treat as an error.
    pub fn delete(&self, key: TaskKey) -> Option<RevTask> {
        self.tasks.remove(&key).map(|(_, task)| task)
    }

    /// All tasks due at or before `now`, grouped per guild. Used
    /// exclusively by the reconciliation sweep.
    #[must_use]
    pub fn list_expired(&self, now: DateTime<Utc>) -> HashMap<u64, Vec<RevTask>> {
        let mut by_guild: HashMap<u64, Vec<RevTask>> = HashMap::new();
        for entry in self.tasks.iter() {
            let task = entry.value();
            if task.expires_at <= now {
                by_guild.entry(task.guild_id).or_default().push(task.clone());
            }
        }
        by_guild
    }

    /// All tasks, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RevTask> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Load tasks, for startup. Later entries for the same key win.
    pub fn restore(&self, tasks: Vec<RevTask>) {
        for task in tasks {
            self.tasks.insert(task.key(), task);
        }
    }

    /// Number of pending tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_replaces_rather_than_duplicates() {
        let store = TaskStore::new();
        let key = TaskKey::new(10, 20, ReversalClass::Mute);
        let first_due = Utc::now() + Duration::minutes(5);
        let second_due = Utc::now() + Duration::minutes(30);

        let first = store.upsert(key, "inf-1", first_due);
        let second = store.upsert(key, "inf-2", second_due);

        assert_eq!(store.len(), 1);
        // Same key keeps its id; fields are fully replaced
        assert_eq!(first.id, second.id);
        let current = store.get(key).unwrap();
        assert_eq!(current.infraction_id, "inf-2");
        assert_eq!(current.expires_at, second_due);
    }

    #[test]
    fn test_distinct_classes_are_distinct_keys() {
        let store = TaskStore::new();
        let due = Utc::now() + Duration::minutes(5);

        store.upsert(TaskKey::new(10, 20, ReversalClass::Mute), "inf-1", due);
        store.upsert(TaskKey::new(10, 20, ReversalClass::Ban), "inf-2", due);

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = TaskStore::new();
        let key = TaskKey::new(10, 20, ReversalClass::Ban);
        store.upsert(key, "inf-1", Utc::now());

        assert!(store.delete(key).is_some());
        assert!(store.delete(key).is_none());
        assert!(store.delete(key).is_none());
    }

    #[test]
    fn test_list_expired_groups_by_guild() {
        let store = TaskStore::new();
        let now = Utc::now();

        store.upsert(
            TaskKey::new(10, 20, ReversalClass::Mute),
            "inf-1",
            now - Duration::minutes(1),
        );
        store.upsert(
            TaskKey::new(10, 21, ReversalClass::Ban),
            "inf-2",
            now - Duration::hours(2),
        );
        store.upsert(
            TaskKey::new(11, 20, ReversalClass::Mute),
            "inf-3",
            now - Duration::seconds(1),
        );
        // Not yet due
        store.upsert(
            TaskKey::new(10, 22, ReversalClass::Mute),
            "inf-4",
            now + Duration::minutes(1),
        );

        let expired = store.list_expired(now);
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[&10].len(), 2);
        assert_eq!(expired[&11].len(), 1);
    }

    #[test]
    fn test_restore_keeps_one_per_key() {
        let store = TaskStore::new();
        let due = Utc::now();
        let mk = |infraction_id: &str| RevTask {
            id: Uuid::new_v4().to_string(),
            guild_id: 10,
            target_id: 20,
            class: ReversalClass::Mute,
            infraction_id: infraction_id.to_string(),
            expires_at: due,
        };

        store.restore(vec![mk("inf-1"), mk("inf-2")]);
        assert_eq!(store.len(), 1);
        let task = store.get(TaskKey::new(10, 20, ReversalClass::Mute)).unwrap();
        assert_eq!(task.infraction_id, "inf-2");
    }
}
