use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;

use crate::models::Timer;
use crate::models::TimerId;
use crate::models::TimerKey;

/// Timer entries indexed by the start time and by the key.
///
/// Entries starting at the same time are ordered by their local ids.  Both
/// indexes are updated together in every mutation.
#[derive(Debug, Default)]
pub struct TimersContainer {
    by_start: BTreeMap<DateTime<Utc>, Vec<Arc<Timer>>>,
    by_key: HashMap<TimerKey, Arc<Timer>>,
    last_id: u64,
}

impl TimersContainer {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts a new entry or replaces the entry having the same key.
    ///
    /// The local id of a replaced entry is preserved.  Returns `false` if
    /// the container has an identical entry.
    pub fn upsert(&mut self, mut timer: Timer) -> bool {
        let key = timer.key();
        match self.by_key.get(&key).cloned() {
            Some(current) => {
                if current.same_contents(&timer) {
                    return false;
                }
                timer.id = current.id;
                let timer = Arc::new(timer);
                if current.start == timer.start {
                    self.replace_in_start_index(&current, timer.clone());
                } else {
                    self.remove_from_start_index(&current);
                    self.insert_into_start_index(timer.clone());
                }
                self.by_key.insert(key, timer);
                tracing::debug!(timer.key = %key, "Updated");
            }
            None => {
                self.last_id += 1;
                timer.id = Some(TimerId::new(self.last_id));
                let timer = Arc::new(timer);
                self.insert_into_start_index(timer.clone());
                self.by_key.insert(key, timer);
                tracing::debug!(timer.key = %key, "Added");
            }
        }
        true
    }

    /// Removes the entry having the key.
    ///
    /// Returns `false` if there is no such entry.
    pub fn remove(&mut self, key: &TimerKey) -> bool {
        match self.by_key.remove(key) {
            Some(timer) => {
                self.remove_from_start_index(&timer);
                tracing::debug!(timer.key = %key, "Removed");
                true
            }
            None => false,
        }
    }

    /// Makes the container hold exactly `entries`.
    ///
    /// Returns `true` if any entry was added, updated or removed.
    pub fn reconcile(&mut self, entries: Vec<Timer>) -> bool {
        let keys: HashSet<TimerKey> = entries.iter().map(Timer::key).collect();
        let obsolete: Vec<TimerKey> = self
            .by_key
            .keys()
            .filter(|key| !keys.contains(key))
            .cloned()
            .collect();
        let mut changed = false;
        for key in obsolete.iter() {
            changed |= self.remove(key);
        }
        for timer in entries.into_iter() {
            changed |= self.upsert(timer);
        }
        changed
    }

    pub fn lookup_by_backend_key(&self, key: &TimerKey) -> Option<&Arc<Timer>> {
        self.by_key.get(key)
    }

    pub fn lookup_by_local_id(&self, id: TimerId) -> Option<&Arc<Timer>> {
        self.by_key.values().find(|timer| timer.id == Some(id))
    }

    pub fn all_ordered_by_start(&self) -> Vec<Arc<Timer>> {
        self.iter().cloned().collect()
    }

    /// Iterates entries in the order of the start time.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Timer>> {
        self.by_start.values().flatten()
    }

    /// Returns the rule which generated `timer`.
    pub fn rule_for(&self, timer: &Timer) -> Option<&Arc<Timer>> {
        timer
            .parent_key()
            .and_then(|key| self.by_key.get(&key))
            .filter(|rule| rule.is_rule)
    }

    /// Returns instances generated by the rule, in the order of the start
    /// time.
    pub fn instances_of(&self, rule: &TimerKey) -> Vec<Arc<Timer>> {
        self.iter()
            .filter(|timer| timer.parent_key().as_ref() == Some(rule))
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &TimerKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Removes all entries.  Local ids will never be reused.
    pub fn clear(&mut self) {
        self.by_start.clear();
        self.by_key.clear();
    }

    fn insert_into_start_index(&mut self, timer: Arc<Timer>) {
        let bucket = self.by_start.entry(timer.start).or_default();
        let pos = bucket.partition_point(|other| other.id < timer.id);
        bucket.insert(pos, timer);
    }

    fn replace_in_start_index(&mut self, current: &Timer, timer: Arc<Timer>) {
        if let Some(bucket) = self.by_start.get_mut(&current.start) {
            if let Some(slot) = bucket.iter_mut().find(|other| other.key() == current.key()) {
                *slot = timer;
            }
        }
    }

    fn remove_from_start_index(&mut self, timer: &Timer) {
        let key = timer.key();
        let empty = match self.by_start.get_mut(&timer.start) {
            Some(bucket) => {
                bucket.retain(|other| other.key() != key);
                bucket.is_empty()
            }
            None => false,
        };
        if empty {
            self.by_start.remove(&timer.start);
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let num_entries: usize = self.by_start.values().map(Vec::len).sum();
        assert_eq!(num_entries, self.by_key.len());
        for (start, bucket) in self.by_start.iter() {
            assert!(!bucket.is_empty());
            for timer in bucket.iter() {
                assert_eq!(timer.start, *start);
                assert_eq!(self.by_key.get(&timer.key()), Some(timer));
            }
        }
    }
}

// </coverage:exclude>
