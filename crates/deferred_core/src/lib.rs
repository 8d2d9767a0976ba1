pub mod drain;
pub mod error;
pub mod ids;
pub mod keys;
pub mod memory;
pub mod staging;
pub mod value;

pub use drain::{DrainLimits, DrainReport, DrainStep, StopReason, Transform, drain};
pub use error::{DeferredError, DeferredResult};
pub use ids::RecordId;
pub use keys::{StagingKeys, UpdateKeys};
pub use memory::MemoryStagingStore;
pub use staging::{ScoreBound, StagingStore};
pub use value::{
    AttributeMap, BatchRow, StagedValue, ValueFamily, datetime_to_epoch_seconds,
    epoch_seconds_to_datetime, now_epoch_seconds,
};
