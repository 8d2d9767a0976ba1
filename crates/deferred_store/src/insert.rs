use std::collections::HashSet;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::config::{DeferredConfig, QueueSettings};
use crate::options::ProcessOptions;
use crate::relation::bulk_insert;
use crate::target::InsertTarget;
use deferred_core::{
    AttributeMap, DeferredError, DeferredResult, DrainReport, DrainStep, StagingKeys,
    StagingStore, drain,
};

#[derive(Clone, Debug)]
pub struct InsertQueue {
    keys: StagingKeys,
    settings: QueueSettings,
}

impl InsertQueue {
    pub fn new(config: &DeferredConfig) -> Self {
        Self::from_parts(config.staging_keys(), config.queue_settings())
    }

    pub fn from_parts(keys: StagingKeys, settings: QueueSettings) -> Self {
        Self { keys, settings }
    }

    pub async fn enqueue<S, R>(
        &self,
        store: &S,
        target: &InsertTarget,
        record: &R,
    ) -> DeferredResult<u64>
    where
        S: StagingStore + ?Sized,
        R: Serialize + Sync + ?Sized,
    {
        match serde_json::to_value(record)? {
            JsonValue::Object(attributes) => self.enqueue_attributes(store, target, attributes).await,
            other => Err(DeferredError::validation(format!(
                "insert record for '{}' must be an object, got {}",
                target.entity,
                json_kind(&other)
            ))),
        }
    }

    pub async fn enqueue_attributes<S>(
        &self,
        store: &S,
        target: &InsertTarget,
        attributes: AttributeMap,
    ) -> DeferredResult<u64>
    where
        S: StagingStore + ?Sized,
    {
        let payload = serde_json::to_string(&attributes)?;
        store
            .push_tail(&self.keys.insert(&target.entity), payload)
            .await
    }

    pub async fn pending<S>(&self, store: &S, target: &InsertTarget) -> DeferredResult<u64>
    where
        S: StagingStore + ?Sized,
    {
        store.list_len(&self.keys.insert(&target.entity)).await
    }

    /// Drains the queue into `target.table` until it is empty or time runs out.
    ///
    /// A batch popped from the staging store is gone from it before the insert
    /// commits; a failed insert loses that batch.
    pub async fn process<S>(
        &self,
        store: &S,
        conn: &DatabaseConnection,
        target: &InsertTarget,
        options: ProcessOptions<AttributeMap>,
    ) -> DeferredResult<DrainReport>
    where
        S: StagingStore + ?Sized,
    {
        let limits = options.limits(self.settings.insert_batch_size, &self.settings)?;
        let mut step = InsertStep {
            store,
            conn,
            key: self.keys.insert(&target.entity),
            table: &target.table,
        };
        let report = drain(&mut step, limits, options.transform.as_ref()).await?;
        log::info!(
            "deferred: inserted {} rows into {} in {} batches ({:?}, {:?})",
            report.rows(),
            target.table,
            report.batches(),
            report.stop_reason,
            report.elapsed
        );
        Ok(report)
    }
}

struct InsertStep<'a, S: ?Sized> {
    store: &'a S,
    conn: &'a DatabaseConnection,
    key: String,
    table: &'a str,
}

#[async_trait]
impl<S> DrainStep for InsertStep<'_, S>
where
    S: StagingStore + ?Sized,
{
    type Row = AttributeMap;

    async fn extract(&mut self, limit: usize) -> DeferredResult<Vec<AttributeMap>> {
        let payloads = self.store.pop_prefix(&self.key, limit).await?;
        payloads
            .iter()
            .map(|payload| serde_json::from_str::<AttributeMap>(payload).map_err(DeferredError::from))
            .collect()
    }

    async fn apply(&mut self, rows: Vec<AttributeMap>) -> DeferredResult<()> {
        let columns = batch_columns(&rows);
        if rows.iter().any(|row| row.len() != columns.len()) {
            log::warn!(
                "deferred: insert batch for {} has uneven attributes; missing ones are NULL",
                self.table
            );
        }
        let values = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| row.remove(column).unwrap_or(JsonValue::Null))
                    .collect()
            })
            .collect();
        bulk_insert(self.conn, self.table, &columns, values).await?;
        Ok(())
    }
}

fn batch_columns(rows: &[AttributeMap]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for key in rows.iter().flat_map(|row| row.keys()) {
        if seen.insert(key.as_str()) {
            columns.push(key.clone());
        }
    }
    columns
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferred_core::MemoryStagingStore;
    use serde_json::json;

    fn attrs(value: JsonValue) -> AttributeMap {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn batch_columns_are_the_union_in_first_seen_order() {
        let rows = vec![
            attrs(json!({"a": 1, "b": 2})),
            attrs(json!({"c": 3, "a": 4})),
        ];
        let columns = batch_columns(&rows);
        assert_eq!(columns.len(), 3);
        assert!(columns.contains(&"a".to_string()));
        assert_eq!(columns.last().map(String::as_str), Some("c"));
    }

    #[tokio::test]
    async fn non_object_records_are_rejected() {
        let store = MemoryStagingStore::new();
        let queue = InsertQueue::new(&DeferredConfig::default());
        let target = InsertTarget::new("PageView", "page_views");
        let err = queue
            .enqueue(&store, &target, &vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, DeferredError::Validation { .. }));
        assert_eq!(queue.pending(&store, &target).await.expect("pending"), 0);
    }

    #[tokio::test]
    async fn enqueue_keeps_producer_order() -> DeferredResult<()> {
        let store = MemoryStagingStore::new();
        let queue = InsertQueue::new(&DeferredConfig::default());
        let target = InsertTarget::new("PageView", "page_views");
        for n in 0..3 {
            queue.enqueue(&store, &target, &json!({"n": n})).await?;
        }
        let popped = store.pop_prefix("deferred:insert:page_view", 10).await?;
        assert_eq!(popped, vec![r#"{"n":0}"#, r#"{"n":1}"#, r#"{"n":2}"#]);
        Ok(())
    }
}
