use async_trait::async_trait;

use crate::{DeferredResult, UpdateKeys};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScoreBound {
    Unbounded,
    Inclusive(f64),
}

impl ScoreBound {
    pub fn admits(self, score: f64) -> bool {
        match self {
            ScoreBound::Unbounded => true,
            ScoreBound::Inclusive(max) => score <= max,
        }
    }
}

impl From<Option<f64>> for ScoreBound {
    fn from(value: Option<f64>) -> Self {
        value.map_or(ScoreBound::Unbounded, ScoreBound::Inclusive)
    }
}

/// Key-value primitives the queues stage writes through.
///
/// Every method is a single atomic operation against the store. The composite
/// methods (`pop_prefix`, `stage_update`, `take_oldest`) run all of their steps
/// with no other operation interleaved.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn push_tail(&self, key: &str, payload: String) -> DeferredResult<u64>;
    async fn list_len(&self, key: &str) -> DeferredResult<u64>;
    async fn pop_prefix(&self, key: &str, count: usize) -> DeferredResult<Vec<String>>;

    async fn hash_set(&self, key: &str, field: &str, value: String) -> DeferredResult<()>;
    async fn hash_get_many(&self, key: &str, fields: &[String])
    -> DeferredResult<Vec<Option<String>>>;
    async fn hash_delete_many(&self, key: &str, fields: &[String]) -> DeferredResult<u64>;
    async fn hash_len(&self, key: &str) -> DeferredResult<u64>;

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> DeferredResult<()>;
    async fn sorted_score(&self, key: &str, member: &str) -> DeferredResult<Option<f64>>;
    async fn sorted_len(&self, key: &str) -> DeferredResult<u64>;
    async fn range_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        limit: usize,
    ) -> DeferredResult<Vec<(String, f64)>>;
    async fn remove_range_by_score(&self, key: &str, max: f64) -> DeferredResult<u64>;

    async fn stage_update(
        &self,
        keys: &UpdateKeys,
        member: &str,
        value: String,
        score: f64,
    ) -> DeferredResult<()>;

    async fn take_oldest(
        &self,
        keys: &UpdateKeys,
        count: usize,
    ) -> DeferredResult<Vec<(String, Option<String>)>>;
}
