use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use time::OffsetDateTime;

use crate::config::{DeferredConfig, QueueSettings};
use crate::options::ProcessOptions;
use crate::relation::{StagingRelation, StagingRelations, apply_batch, drain_through_relation};
use crate::target::FieldTarget;
use deferred_core::{
    BatchRow, DeferredError, DeferredResult, DrainReport, DrainStep, RecordId, ScoreBound,
    StagedValue, StagingKeys, StagingStore, ValueFamily, datetime_to_epoch_seconds,
};

/// Field updates whose value is its own ordering key.
///
/// Staging is a plain score overwrite: producers are trusted to stage
/// non-decreasing keys per id. After a batch is written, every entry at or
/// below the batch's highest key is removed in one range delete, so a key
/// restaged at or below it while the batch was in flight is dropped unwritten.
#[derive(Clone)]
pub struct IncreasingUpdateQueue {
    keys: StagingKeys,
    settings: QueueSettings,
    relations: StagingRelations,
}

impl IncreasingUpdateQueue {
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

    pub async fn enqueue<S>(
        &self,
        store: &S,
        target: &FieldTarget,
        id: impl Into<RecordId>,
        ordering_key: f64,
    ) -> DeferredResult<()>
    where
        S: StagingStore + ?Sized,
    {
        if !ordering_key.is_finite() {
            return Err(DeferredError::validation(format!(
                "ordering key for {}.{} must be finite, got {ordering_key}",
                target.entity, target.column
            )));
        }
        // Staged keys must always decode into the column's family.
        decode_key(ordering_key, target.family)?;
        let id = id.into();
        store
            .sorted_add(
                &self.keys.increasing(&target.entity, &target.column),
                &id.to_string(),
                ordering_key,
            )
            .await
    }

    pub async fn enqueue_datetime<S>(
        &self,
        store: &S,
        target: &FieldTarget,
        id: impl Into<RecordId>,
        at: OffsetDateTime,
    ) -> DeferredResult<()>
    where
        S: StagingStore + ?Sized,
    {
        self.enqueue(store, target, id, datetime_to_epoch_seconds(at))
            .await
    }

    pub async fn staged_key<S>(
        &self,
        store: &S,
        target: &FieldTarget,
        id: impl Into<RecordId>,
    ) -> DeferredResult<Option<f64>>
    where
        S: StagingStore + ?Sized,
    {
        let id = id.into();
        store
            .sorted_score(
                &self.keys.increasing(&target.entity, &target.column),
                &id.to_string(),
            )
            .await
    }

    pub async fn pending<S>(&self, store: &S, target: &FieldTarget) -> DeferredResult<u64>
    where
        S: StagingStore + ?Sized,
    {
        store
            .sorted_len(&self.keys.increasing(&target.entity, &target.column))
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
        let mut step = IncreasingStep {
            store,
            conn,
            key: self.keys.increasing(&target.entity, &target.column),
            relation: relation.as_ref(),
            target,
            max: ScoreBound::from(options.max_ordering_key),
            max_found: None,
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
            "deferred: applied {} increasing values to {}.{} in {} batches ({:?}, {:?})",
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

struct IncreasingStep<'a, S: ?Sized> {
    store: &'a S,
    conn: &'a DatabaseConnection,
    key: String,
    relation: &'a dyn StagingRelation,
    target: &'a FieldTarget,
    max: ScoreBound,
    max_found: Option<f64>,
}

#[async_trait]
impl<S> DrainStep for IncreasingStep<'_, S>
where
    S: StagingStore + ?Sized,
{
    type Row = BatchRow;

    async fn extract(&mut self, limit: usize) -> DeferredResult<Vec<BatchRow>> {
        let entries = self.store.range_by_score(&self.key, self.max, limit).await?;
        // Ascending by score, so the last entry holds the batch maximum.
        self.max_found = entries.last().map(|(_, score)| *score);
        entries
            .into_iter()
            .map(|(member, score)| -> DeferredResult<BatchRow> {
                Ok(BatchRow {
                    id: RecordId::from_member(&member)?,
                    value: decode_key(score, self.target.family)?,
                })
            })
            .collect()
    }

    async fn apply(&mut self, rows: Vec<BatchRow>) -> DeferredResult<()> {
        apply_batch(
            self.conn,
            self.relation,
            &self.target.table,
            &self.target.column,
            &rows,
        )
        .await?;
        if let Some(max_found) = self.max_found.take() {
            let removed = self.store.remove_range_by_score(&self.key, max_found).await?;
            log::debug!(
                "deferred: cleared {removed} staged keys of {} up to {max_found}",
                self.key
            );
        }
        Ok(())
    }
}

fn decode_key(score: f64, family: ValueFamily) -> DeferredResult<StagedValue> {
    StagedValue::Float(score).coerce(family)
}
