//! Bounded-time batch driver shared by every queue kind.
//!
//! The deadline is only consulted between iterations: a batch that has been
//! extracted is always applied, so one call can overrun `max_running_time` by
//! up to one batch worth of work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{DeferredError, DeferredResult};

pub type Transform<T> = Arc<dyn Fn(Vec<T>) -> DeferredResult<Vec<T>> + Send + Sync>;

#[async_trait]
pub trait DrainStep: Send {
    type Row: Send;

    async fn extract(&mut self, limit: usize) -> DeferredResult<Vec<Self::Row>>;

    async fn apply(&mut self, rows: Vec<Self::Row>) -> DeferredResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainLimits {
    pub batch_size: usize,
    pub max_running_time: Duration,
}

impl DrainLimits {
    pub fn new(batch_size: usize, max_running_time: Duration) -> DeferredResult<Self> {
        if batch_size == 0 {
            return Err(DeferredError::configuration("batch size must be positive"));
        }
        Ok(Self {
            batch_size,
            max_running_time,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Drained,
    Deadline,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainReport {
    pub batch_sizes: Vec<usize>,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

impl DrainReport {
    pub fn batches(&self) -> usize {
        self.batch_sizes.len()
    }

    pub fn rows(&self) -> usize {
        self.batch_sizes.iter().sum()
    }
}

pub async fn drain<S>(
    step: &mut S,
    limits: DrainLimits,
    transform: Option<&Transform<S::Row>>,
) -> DeferredResult<DrainReport>
where
    S: DrainStep,
{
    let started = Instant::now();
    let mut batch_sizes = Vec::new();
    let stop_reason = loop {
        if started.elapsed() >= limits.max_running_time {
            break StopReason::Deadline;
        }
        let rows = step.extract(limits.batch_size).await?;
        if rows.is_empty() {
            break StopReason::Drained;
        }
        let rows = match transform {
            Some(transform) => transform(rows)?,
            None => rows,
        };
        let size = rows.len();
        step.apply(rows).await?;
        log::debug!("deferred: applied batch of {size} rows");
        batch_sizes.push(size);
    };
    Ok(DrainReport {
        batch_sizes,
        elapsed: started.elapsed(),
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingStep {
        remaining: usize,
        applied: Vec<usize>,
        fail_on_apply: Option<usize>,
    }

    #[async_trait]
    impl DrainStep for CountingStep {
        type Row = usize;

        async fn extract(&mut self, limit: usize) -> DeferredResult<Vec<usize>> {
            let take = limit.min(self.remaining);
            self.remaining -= take;
            Ok((0..take).collect())
        }

        async fn apply(&mut self, rows: Vec<usize>) -> DeferredResult<()> {
            if self.fail_on_apply == Some(self.applied.len()) {
                return Err(DeferredError::storage("apply failed"));
            }
            self.applied.push(rows.len());
            Ok(())
        }
    }

    fn step(remaining: usize) -> CountingStep {
        CountingStep {
            remaining,
            applied: Vec::new(),
            fail_on_apply: None,
        }
    }

    #[tokio::test]
    async fn drains_in_batches_until_empty() -> DeferredResult<()> {
        let mut step = step(250);
        let limits = DrainLimits::new(100, Duration::from_secs(60))?;
        let report = drain(&mut step, limits, None).await?;
        assert_eq!(report.batch_sizes, vec![100, 100, 50]);
        assert_eq!(report.rows(), 250);
        assert_eq!(report.stop_reason, StopReason::Drained);
        assert_eq!(step.applied, vec![100, 100, 50]);
        Ok(())
    }

    #[tokio::test]
    async fn zero_running_time_applies_nothing() -> DeferredResult<()> {
        let mut step = step(10);
        let limits = DrainLimits::new(5, Duration::ZERO)?;
        let report = drain(&mut step, limits, None).await?;
        assert_eq!(report.batches(), 0);
        assert_eq!(report.stop_reason, StopReason::Deadline);
        assert_eq!(step.remaining, 10);
        Ok(())
    }

    #[tokio::test]
    async fn transform_runs_before_apply() -> DeferredResult<()> {
        let mut step = step(4);
        let limits = DrainLimits::new(10, Duration::from_secs(60))?;
        let transform: Transform<usize> =
            Arc::new(|rows: Vec<usize>| Ok(rows.into_iter().filter(|n| n % 2 == 0).collect()));
        let report = drain(&mut step, limits, Some(&transform)).await?;
        assert_eq!(report.batch_sizes, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn failing_apply_keeps_earlier_batches() {
        let mut step = step(30);
        step.fail_on_apply = Some(1);
        let limits = DrainLimits::new(10, Duration::from_secs(60)).expect("limits");
        let result = drain(&mut step, limits, None).await;
        assert!(matches!(result, Err(DeferredError::Storage { .. })));
        assert_eq!(step.applied, vec![10]);
    }

    #[test]
    fn zero_batch_size_is_a_configuration_error() {
        let err = DrainLimits::new(0, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_configuration());
    }
}
