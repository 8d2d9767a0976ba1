use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use deferred_core::{DeferredResult, DrainLimits, Transform, datetime_to_epoch_seconds};

use crate::config::QueueSettings;

pub struct ProcessOptions<T> {
    pub batch_size: Option<usize>,
    pub max_running_time: Option<Duration>,
    pub transform: Option<Transform<T>>,
    pub max_ordering_key: Option<f64>,
}

impl<T> Default for ProcessOptions<T> {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_running_time: None,
            transform: None,
            max_ordering_key: None,
        }
    }
}

impl<T> Clone for ProcessOptions<T> {
    fn clone(&self) -> Self {
        Self {
            batch_size: self.batch_size,
            max_running_time: self.max_running_time,
            transform: self.transform.clone(),
            max_ordering_key: self.max_ordering_key,
        }
    }
}

impl<T> ProcessOptions<T> {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_max_running_time(mut self, max_running_time: Duration) -> Self {
        self.max_running_time = Some(max_running_time);
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Vec<T>) -> DeferredResult<Vec<T>> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_max_ordering_key(mut self, max: f64) -> Self {
        self.max_ordering_key = Some(max);
        self
    }

    pub fn with_max_ordering_datetime(self, at: OffsetDateTime) -> Self {
        self.with_max_ordering_key(datetime_to_epoch_seconds(at))
    }

    pub(crate) fn limits(
        &self,
        default_batch_size: usize,
        settings: &QueueSettings,
    ) -> DeferredResult<DrainLimits> {
        DrainLimits::new(
            self.batch_size.unwrap_or(default_batch_size),
            self.max_running_time.unwrap_or(settings.max_running_time),
        )
    }
}
