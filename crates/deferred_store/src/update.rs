use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::config::{DeferredConfig, QueueSettings};
use crate::options::ProcessOptions;
use crate::relation::{StagingRelation, StagingRelations, apply_batch, drain_through_relation};
use crate::target::FieldTarget;
use deferred_core::{
    BatchRow, DeferredResult, DrainReport, DrainStep, RecordId, StagedValue, StagingKeys,
    StagingStore, UpdateKeys, now_epoch_seconds,
};

/// Last-write-wins field updates, drained oldest-staged first.
///
/// Re-enqueuing an id overwrites its pending value and moves it to the back
/// of the queue, so hot ids yield to stale ones.
#[derive(Clone)]
pub struct UpdateQueue {
    keys: StagingKeys,
    settings: QueueSettings,
    relations: StagingRelations,
}

impl UpdateQueue {
    pub fn new(config: &DeferredConfig) -> Self {
        Self {
            keys: config.staging_keys(),
            settings: config.queue_settings(),
            relations: StagingRelations::with_defaults(),
        }
    }

    pub fn with_relations(mut self, relations: StagingRelations) -> Self {
        self.relations = relations;
        self
    }

    pub fn relations(&self) -> &StagingRelations {
        &self.relations
    }

    pub async fn enqueue<S>(
        &self,
        store: &S,
        target: &FieldTarget,
        id: impl Into<RecordId>,
        value: impl Into<StagedValue>,
    ) -> DeferredResult<()>
    where
        S: StagingStore + ?Sized,
    {
        let id = id.into();
        let payload = value.into().coerce(target.family)?.encode()?;
        store
            .stage_update(
                &self.keys.update(&target.entity, &target.column),
                &id.to_string(),
                payload,
                now_epoch_seconds(),
            )
            .await
    }

    pub async fn pending<S>(&self, store: &S, target: &FieldTarget) -> DeferredResult<u64>
    where
        S: StagingStore + ?Sized,
    {
        store
            .sorted_len(&self.keys.update(&target.entity, &target.column).ids)
            .await
    }

    pub async fn process<S>(
        &self,
        store: &S,
        conn: &DatabaseConnection,
        target: &FieldTarget,
        options: ProcessOptions<BatchRow>,
    ) -> DeferredResult<DrainReport>
    where
        S: StagingStore + ?Sized,
    {
        let limits = options.limits(self.settings.update_batch_size, &self.settings)?;
        let relation = self.relations.for_family(target.family)?;
        let mut step = UpdateStep {
            store,
            conn,
            keys: self.keys.update(&target.entity, &target.column),
            relation: relation.as_ref(),
            target,
        };
        let report = drain_through_relation(
            conn,
            relation.as_ref(),
            &mut step,
            limits,
            options.transform.as_ref(),
        )
        .await?;
        log::info!(
            "deferred: updated {} rows of {}.{} in {} batches ({:?}, {:?})",
            report.rows(),
            target.table,
            target.column,
            report.batches(),
            report.stop_reason,
            report.elapsed
        );
        Ok(report)
    }
}

struct UpdateStep<'a, S: ?Sized> {
    store: &'a S,
    conn: &'a DatabaseConnection,
    keys: UpdateKeys,
    relation: &'a dyn StagingRelation,
    target: &'a FieldTarget,
}

#[async_trait]
impl<S> DrainStep for UpdateStep<'_, S>
where
    S: StagingStore + ?Sized,
{
    type Row = BatchRow;

    async fn extract(&mut self, limit: usize) -> DeferredResult<Vec<BatchRow>> {
        loop {
            let taken = self.store.take_oldest(&self.keys, limit).await?;
            if taken.is_empty() {
                return Ok(Vec::new());
            }
            let mut rows = Vec::with_capacity(taken.len());
            for (member, value) in taken {
                match value {
                    Some(raw) => rows.push(BatchRow {
                        id: RecordId::from_member(&member)?,
                        value: StagedValue::decode(&raw)?,
                    }),
                    None => log::warn!(
                        "deferred: {} had no staged value for id {member}; skipped",
                        self.keys.ids
                    ),
                }
            }
            // A batch made only of orphaned ids is not the end of the queue.
            if !rows.is_empty() {
                return Ok(rows);
            }
        }
    }

    async fn apply(&mut self, rows: Vec<BatchRow>) -> DeferredResult<()> {
        let updated = apply_batch(
            self.conn,
            self.relation,
            &self.target.table,
            &self.target.column,
            &rows,
        )
        .await?;
        log::debug!(
            "deferred: {} of {} staged values matched rows in {}",
            updated,
            rows.len(),
            self.target.table
        );
        Ok(())
    }
}
