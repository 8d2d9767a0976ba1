pub mod config;
pub mod connect;
pub mod increasing;
pub mod insert;
pub mod options;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod relation;
mod sql;
pub mod target;
pub mod update;

pub use config::{
    DatabaseConfig, DeferredConfig, PoolConfig, QueueConfig, QueueSettings, StagingConfig,
};
pub use connect::connect_relational;
pub use increasing::IncreasingUpdateQueue;
pub use insert::InsertQueue;
pub use options::ProcessOptions;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConnector, RedisSource, RedisStagingStore};
pub use relation::{
    StagingRelation, StagingRelations, TypedStagingRelation, ValueColumnTypes, apply_batch,
    bulk_insert,
};
pub use target::{FieldTarget, InsertTarget};
pub use update::UpdateQueue;

pub use deferred_core::{
    AttributeMap, BatchRow, DeferredError, DeferredResult, DrainReport, MemoryStagingStore,
    RecordId, StagedValue, StagingKeys, StagingStore, StopReason, ValueFamily,
};
