//! In-process staging store with the same per-key semantics as Redis.
//!
//! All state sits behind one mutex, so every trait method (composite ones
//! included) is atomic with respect to every other caller sharing the store.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::staging::{ScoreBound, StagingStore};
use crate::{DeferredError, DeferredResult, UpdateKeys};

#[derive(Clone, Default)]
pub struct MemoryStagingStore {
    state: Arc<Mutex<HashMap<String, Entry>>>,
}

enum Entry {
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Sorted(SortedSet),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::List(_) => "list",
            Entry::Hash(_) => "hash",
            Entry::Sorted(_) => "sorted set",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Entry::List(items) => items.is_empty(),
            Entry::Hash(fields) => fields.is_empty(),
            Entry::Sorted(set) => set.scores.is_empty(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(Score(previous), member.to_string()));
        }
        self.order.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, max: ScoreBound, limit: usize) -> Vec<(String, f64)> {
        self.order
            .iter()
            .take_while(|(score, _)| max.admits(score.0))
            .take(limit)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }
}

fn wrong_type(key: &str, found: &Entry, wanted: &str) -> DeferredError {
    DeferredError::staging(format!(
        "key '{key}' holds a {} where a {wanted} was expected",
        found.kind()
    ))
}

fn list_mut<'a>(
    state: &'a mut HashMap<String, Entry>,
    key: &str,
) -> DeferredResult<&'a mut VecDeque<String>> {
    let entry = state
        .entry(key.to_string())
        .or_insert_with(|| Entry::List(VecDeque::new()));
    match entry {
        Entry::List(items) => Ok(items),
        other => Err(wrong_type(key, other, "list")),
    }
}

fn hash_mut<'a>(
    state: &'a mut HashMap<String, Entry>,
    key: &str,
) -> DeferredResult<&'a mut HashMap<String, String>> {
    let entry = state
        .entry(key.to_string())
        .or_insert_with(|| Entry::Hash(HashMap::new()));
    match entry {
        Entry::Hash(fields) => Ok(fields),
        other => Err(wrong_type(key, other, "hash")),
    }
}

fn sorted_mut<'a>(
    state: &'a mut HashMap<String, Entry>,
    key: &str,
) -> DeferredResult<&'a mut SortedSet> {
    let entry = state
        .entry(key.to_string())
        .or_insert_with(|| Entry::Sorted(SortedSet::default()));
    match entry {
        Entry::Sorted(set) => Ok(set),
        other => Err(wrong_type(key, other, "sorted set")),
    }
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<F, T>(&self, func: F) -> DeferredResult<T>
    where
        F: FnOnce(&mut HashMap<String, Entry>) -> DeferredResult<T>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| DeferredError::staging("memory staging store poisoned"))?;
        let result = func(&mut guard);
        guard.retain(|_, entry| !entry.is_empty());
        result
    }

    pub fn key_count(&self) -> DeferredResult<usize> {
        self.with_state(|state| Ok(state.len()))
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn push_tail(&self, key: &str, payload: String) -> DeferredResult<u64> {
        self.with_state(|state| {
            let items = list_mut(state, key)?;
            items.push_back(payload);
            Ok(items.len() as u64)
        })
    }

    async fn list_len(&self, key: &str) -> DeferredResult<u64> {
        self.with_state(|state| Ok(list_mut(state, key)?.len() as u64))
    }

    async fn pop_prefix(&self, key: &str, count: usize) -> DeferredResult<Vec<String>> {
        self.with_state(|state| {
            let items = list_mut(state, key)?;
            let take = count.min(items.len());
            Ok(items.drain(..take).collect())
        })
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> DeferredResult<()> {
        self.with_state(|state| {
            hash_mut(state, key)?.insert(field.to_string(), value);
            Ok(())
        })
    }

    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> DeferredResult<Vec<Option<String>>> {
        self.with_state(|state| {
            let map = hash_mut(state, key)?;
            Ok(fields.iter().map(|field| map.get(field).cloned()).collect())
        })
    }

    async fn hash_delete_many(&self, key: &str, fields: &[String]) -> DeferredResult<u64> {
        self.with_state(|state| {
            let map = hash_mut(state, key)?;
            Ok(fields
                .iter()
                .filter(|field| map.remove(field.as_str()).is_some())
                .count() as u64)
        })
    }

    async fn hash_len(&self, key: &str) -> DeferredResult<u64> {
        self.with_state(|state| Ok(hash_mut(state, key)?.len() as u64))
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> DeferredResult<()> {
        self.with_state(|state| {
            sorted_mut(state, key)?.insert(member, score);
            Ok(())
        })
    }

    async fn sorted_score(&self, key: &str, member: &str) -> DeferredResult<Option<f64>> {
        self.with_state(|state| Ok(sorted_mut(state, key)?.scores.get(member).copied()))
    }

    async fn sorted_len(&self, key: &str) -> DeferredResult<u64> {
        self.with_state(|state| Ok(sorted_mut(state, key)?.scores.len() as u64))
    }

    async fn range_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        limit: usize,
    ) -> DeferredResult<Vec<(String, f64)>> {
        self.with_state(|state| Ok(sorted_mut(state, key)?.range(max, limit)))
    }

    async fn remove_range_by_score(&self, key: &str, max: f64) -> DeferredResult<u64> {
        self.with_state(|state| {
            let set = sorted_mut(state, key)?;
            let doomed = set.range(ScoreBound::Inclusive(max), usize::MAX);
            for (member, _) in &doomed {
                set.remove(member);
            }
            Ok(doomed.len() as u64)
        })
    }

    async fn stage_update(
        &self,
        keys: &UpdateKeys,
        member: &str,
        value: String,
        score: f64,
    ) -> DeferredResult<()> {
        self.with_state(|state| {
            // Check both key types before mutating so a failure leaves neither half applied.
            sorted_mut(state, &keys.ids)?;
            hash_mut(state, &keys.values)?.insert(member.to_string(), value);
            sorted_mut(state, &keys.ids)?.insert(member, score);
            Ok(())
        })
    }

    async fn take_oldest(
        &self,
        keys: &UpdateKeys,
        count: usize,
    ) -> DeferredResult<Vec<(String, Option<String>)>> {
        self.with_state(|state| {
            hash_mut(state, &keys.values)?;
            let set = sorted_mut(state, &keys.ids)?;
            let members = set.range(ScoreBound::Unbounded, count);
            for (member, _) in &members {
                set.remove(member);
            }
            let values = hash_mut(state, &keys.values)?;
            Ok(members
                .into_iter()
                .map(|(member, _)| {
                    let value = values.remove(&member);
                    (member, value)
                })
                .collect())
        })
    }
}
