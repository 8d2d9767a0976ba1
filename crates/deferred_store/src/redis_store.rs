//! Redis-backed [`StagingStore`].
//!
//! Composite operations are atomic on the server: `pop_prefix` and
//! `stage_update` run as MULTI/EXEC pipelines, `take_oldest` runs as a Lua
//! script.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, Script};
use tokio::sync::OnceCell;

use crate::config::DeferredConfig;
use deferred_core::{DeferredError, DeferredResult, ScoreBound, StagingStore, UpdateKeys};

// Members are handled in slices to stay under Lua's unpack() stack limit.
static TAKE_OLDEST: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local members = redis.call('ZRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
local out = {}
for i = 1, #members, 500 do
  local slice = {unpack(members, i, math.min(i + 499, #members))}
  redis.call('ZREM', KEYS[1], unpack(slice))
  local values = redis.call('HMGET', KEYS[2], unpack(slice))
  redis.call('HDEL', KEYS[2], unpack(slice))
  for j, member in ipairs(slice) do
    out[#out + 1] = member
    out[#out + 1] = values[j]
  end
end
return out
",
    )
});

#[async_trait]
pub trait RedisConnector: Send + Sync {
    async fn connect(&self) -> DeferredResult<MultiplexedConnection>;
}

#[derive(Clone)]
pub enum RedisSource {
    Connection(MultiplexedConnection),
    Connector(Arc<dyn RedisConnector>),
    Client(Client),
}

#[derive(Clone)]
pub struct RedisStagingStore {
    source: RedisSource,
    cached: Arc<OnceCell<MultiplexedConnection>>,
}

impl RedisStagingStore {
    pub fn new(source: RedisSource) -> Self {
        Self {
            source,
            cached: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_config(config: &DeferredConfig) -> DeferredResult<Self> {
        let url = config
            .staging_url()
            .ok_or_else(|| DeferredError::configuration("no staging store url configured"))?;
        let client = Client::open(url).map_err(|err| {
            DeferredError::configuration(format!("invalid staging store url: {err}"))
        })?;
        Ok(Self::new(RedisSource::Client(client)))
    }

    async fn connection(&self) -> DeferredResult<MultiplexedConnection> {
        match &self.source {
            RedisSource::Connection(conn) => Ok(conn.clone()),
            RedisSource::Connector(connector) => connector.connect().await,
            RedisSource::Client(client) => {
                let conn = self
                    .cached
                    .get_or_try_init(|| async {
                        let conn = client
                            .get_multiplexed_async_connection()
                            .await
                            .map_err(staging_err)?;
                        log::info!("deferred: staging store connected");
                        Ok::<_, DeferredError>(conn)
                    })
                    .await?;
                Ok(conn.clone())
            }
        }
    }
}

fn staging_err(err: RedisError) -> DeferredError {
    DeferredError::staging(err.to_string())
}

fn score_arg(bound: ScoreBound) -> String {
    match bound {
        ScoreBound::Unbounded => "+inf".to_string(),
        ScoreBound::Inclusive(max) => max.to_string(),
    }
}

#[async_trait]
impl StagingStore for RedisStagingStore {
    async fn push_tail(&self, key: &str, payload: String) -> DeferredResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.rpush(key, payload).await.map_err(staging_err)?;
        Ok(len)
    }

    async fn list_len(&self, key: &str) -> DeferredResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.llen(key).await.map_err(staging_err)?;
        Ok(len)
    }

    async fn pop_prefix(&self, key: &str, count: usize) -> DeferredResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let end = isize::try_from(count).unwrap_or(isize::MAX);
        let (items,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(key, 0, end - 1)
            .ltrim(key, end, -1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(staging_err)?;
        Ok(items)
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> DeferredResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.hset(key, field, value).await.map_err(staging_err)?;
        Ok(())
    }

    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> DeferredResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(staging_err)?;
        Ok(values)
    }

    async fn hash_delete_many(&self, key: &str, fields: &[String]) -> DeferredResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let removed: u64 = conn.hdel(key, fields).await.map_err(staging_err)?;
        Ok(removed)
    }

    async fn hash_len(&self, key: &str) -> DeferredResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.hlen(key).await.map_err(staging_err)?;
        Ok(len)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> DeferredResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.zadd(key, member, score).await.map_err(staging_err)?;
        Ok(())
    }

    async fn sorted_score(&self, key: &str, member: &str) -> DeferredResult<Option<f64>> {
        let mut conn = self.connection().await?;
        let score: Option<f64> = conn.zscore(key, member).await.map_err(staging_err)?;
        Ok(score)
    }

    async fn sorted_len(&self, key: &str) -> DeferredResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(key).await.map_err(staging_err)?;
        Ok(len)
    }

    async fn range_by_score(
        &self,
        key: &str,
        max: ScoreBound,
        limit: usize,
    ) -> DeferredResult<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let count = isize::try_from(limit).unwrap_or(isize::MAX);
        let entries: Vec<(String, f64)> = conn
            .zrangebyscore_limit_withscores(key, "-inf", score_arg(max), 0, count)
            .await
            .map_err(staging_err)?;
        Ok(entries)
    }

    async fn remove_range_by_score(&self, key: &str, max: f64) -> DeferredResult<u64> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn
            .zrembyscore(key, "-inf", score_arg(ScoreBound::Inclusive(max)))
            .await
            .map_err(staging_err)?;
        Ok(removed)
    }

    async fn stage_update(
        &self,
        keys: &UpdateKeys,
        member: &str,
        value: String,
        score: f64,
    ) -> DeferredResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(&keys.values, member, value)
            .ignore()
            .zadd(&keys.ids, member, score)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(staging_err)?;
        Ok(())
    }

    async fn take_oldest(
        &self,
        keys: &UpdateKeys,
        count: usize,
    ) -> DeferredResult<Vec<(String, Option<String>)>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let flat: Vec<Option<String>> = TAKE_OLDEST
            .key(&keys.ids)
            .key(&keys.values)
            .arg(count)
            .invoke_async(&mut conn)
            .await
            .map_err(staging_err)?;
        let mut taken = Vec::with_capacity(flat.len() / 2);
        let mut pairs = flat.into_iter();
        while let Some(member) = pairs.next() {
            let member = member
                .ok_or_else(|| DeferredError::staging("take-oldest script returned a nil member"))?;
            taken.push((member, pairs.next().flatten()));
        }
        Ok(taken)
    }
}
