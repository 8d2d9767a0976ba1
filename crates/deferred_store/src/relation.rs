//! Transient `(id, value)` relations used to turn a batch into one UPDATE.
//!
//! A batch is bulk-loaded into a temporary table typed like the target column,
//! then a single joined UPDATE copies every value across. Temporary tables are
//! session scoped, so every call here must go through the same relational
//! session (see [`crate::connect::connect_relational`]).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Expr, InsertStatement, PostgresQueryBuilder, Query, QueryStatementWriter,
    Value as SeaValue,
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, TransactionTrait,
};
use serde_json::Value as JsonValue;

use crate::connect::ensure_single_session;
use crate::sql::{exec, exec_sql, quote_ident};
use deferred_core::{
    BatchRow, DeferredError, DeferredResult, DrainLimits, DrainReport, DrainStep, StagedValue,
    Transform, ValueFamily, drain,
};

const ID_COLUMN: &str = "id";
const VALUE_COLUMN: &str = "value";
// Stays under the bind-parameter ceilings of SQLite, Postgres and MySQL.
const MAX_BIND_PARAMS: usize = 30_000;

#[async_trait]
pub trait StagingRelation: Send + Sync {
    fn family(&self) -> ValueFamily;

    fn table_name(&self) -> &str;

    async fn create(&self, conn: &DatabaseConnection) -> DeferredResult<()>;

    async fn drop_table(&self, conn: &DatabaseConnection) -> DeferredResult<()>;

    async fn bulk_load(&self, tx: &DatabaseTransaction, rows: &[BatchRow]) -> DeferredResult<()>;

    async fn apply_joined_update(
        &self,
        tx: &DatabaseTransaction,
        target_table: &str,
        target_column: &str,
    ) -> DeferredResult<u64>;

    async fn clear(&self, tx: &DatabaseTransaction) -> DeferredResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueColumnTypes {
    pub sqlite: &'static str,
    pub postgres: &'static str,
    pub mysql: &'static str,
}

impl ValueColumnTypes {
    fn for_backend(&self, backend: DatabaseBackend) -> &'static str {
        match backend {
            DatabaseBackend::Postgres => self.postgres,
            DatabaseBackend::MySql => self.mysql,
            _ => self.sqlite,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypedStagingRelation {
    family: ValueFamily,
    table_name: String,
    value_types: ValueColumnTypes,
}

impl TypedStagingRelation {
    pub fn new(
        family: ValueFamily,
        table_name: impl Into<String>,
        value_types: ValueColumnTypes,
    ) -> Self {
        Self {
            family,
            table_name: table_name.into(),
            value_types,
        }
    }

    pub fn text() -> Self {
        Self::new(
            ValueFamily::Text,
            "temp_deferred_updates_string",
            ValueColumnTypes {
                sqlite: "TEXT",
                postgres: "TEXT",
                mysql: "TEXT",
            },
        )
    }

    pub fn datetime() -> Self {
        Self::new(
            ValueFamily::DateTime,
            "temp_deferred_updates_datetime",
            ValueColumnTypes {
                sqlite: "TEXT",
                postgres: "TIMESTAMPTZ",
                mysql: "DATETIME(6)",
            },
        )
    }

    pub fn integer() -> Self {
        Self::new(
            ValueFamily::Integer,
            "temp_deferred_updates_integer",
            ValueColumnTypes {
                sqlite: "BIGINT",
                postgres: "BIGINT",
                mysql: "BIGINT",
            },
        )
    }

    fn encode(&self, value: &StagedValue) -> DeferredResult<SeaValue> {
        let value = value.clone().coerce(self.family)?;
        Ok(match value {
            StagedValue::Null => typed_null(self.family),
            StagedValue::Text(v) => v.into(),
            StagedValue::Integer(v) => v.into(),
            StagedValue::Float(v) => v.into(),
            StagedValue::Boolean(v) => v.into(),
            StagedValue::DateTime(v) => v.into(),
        })
    }
}

fn typed_null(family: ValueFamily) -> SeaValue {
    match family {
        ValueFamily::Integer => SeaValue::BigInt(None),
        ValueFamily::Float => SeaValue::Double(None),
        ValueFamily::Boolean => SeaValue::Bool(None),
        ValueFamily::DateTime => SeaValue::TimeDateTimeWithTimeZone(None),
        ValueFamily::Text => SeaValue::String(None),
    }
}

#[async_trait]
impl StagingRelation for TypedStagingRelation {
    fn family(&self) -> ValueFamily {
        self.family
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn create(&self, conn: &DatabaseConnection) -> DeferredResult<()> {
        self.drop_table(conn).await?;
        let backend = conn.get_database_backend();
        let sql = format!(
            "CREATE TEMPORARY TABLE {} ({} BIGINT, {} {})",
            quote_ident(backend, &self.table_name),
            quote_ident(backend, ID_COLUMN),
            quote_ident(backend, VALUE_COLUMN),
            self.value_types.for_backend(backend),
        );
        exec_sql(conn, sql).await?;
        Ok(())
    }

    async fn drop_table(&self, conn: &DatabaseConnection) -> DeferredResult<()> {
        let backend = conn.get_database_backend();
        let table = quote_ident(backend, &self.table_name);
        let sql = match backend {
            DatabaseBackend::MySql => format!("DROP TEMPORARY TABLE IF EXISTS {table}"),
            DatabaseBackend::Postgres => format!("DROP TABLE IF EXISTS pg_temp.{table}"),
            _ => format!("DROP TABLE IF EXISTS temp.{table}"),
        };
        exec_sql(conn, sql).await?;
        Ok(())
    }

    async fn bulk_load(&self, tx: &DatabaseTransaction, rows: &[BatchRow]) -> DeferredResult<()> {
        for chunk in rows.chunks(MAX_BIND_PARAMS / 2) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(self.table_name.clone()))
                .columns([
                    Alias::new(ID_COLUMN.to_string()),
                    Alias::new(VALUE_COLUMN.to_string()),
                ]);
            for row in chunk {
                insert
                    .values([Expr::val(row.id.as_i64()), Expr::val(self.encode(&row.value)?)])
                    .map_err(|err| DeferredError::storage(err.to_string()))?;
            }
            exec(tx, &insert).await?;
        }
        Ok(())
    }

    async fn apply_joined_update(
        &self,
        tx: &DatabaseTransaction,
        target_table: &str,
        target_column: &str,
    ) -> DeferredResult<u64> {
        let backend = tx.get_database_backend();
        let target = quote_ident(backend, target_table);
        let column = quote_ident(backend, target_column);
        let staging = quote_ident(backend, &self.table_name);
        let id = quote_ident(backend, ID_COLUMN);
        let value = quote_ident(backend, VALUE_COLUMN);
        let sql = match backend {
            DatabaseBackend::MySql => format!(
                "UPDATE {target} INNER JOIN {staging} ON {target}.{id} = {staging}.{id} \
                 SET {target}.{column} = {staging}.{value}"
            ),
            _ => format!(
                "UPDATE {target} SET {column} = {staging}.{value} FROM {staging} \
                 WHERE {target}.{id} = {staging}.{id}"
            ),
        };
        exec_sql(tx, sql).await
    }

    async fn clear(&self, tx: &DatabaseTransaction) -> DeferredResult<()> {
        let backend = tx.get_database_backend();
        exec_sql(
            tx,
            format!("DELETE FROM {}", quote_ident(backend, &self.table_name)),
        )
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct StagingRelations {
    entries: HashMap<ValueFamily, Arc<dyn StagingRelation>>,
}

impl StagingRelations {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut relations = Self::empty();
        relations.register(Arc::new(TypedStagingRelation::text()));
        relations.register(Arc::new(TypedStagingRelation::datetime()));
        relations.register(Arc::new(TypedStagingRelation::integer()));
        relations
    }

    pub fn register(&mut self, relation: Arc<dyn StagingRelation>) {
        self.entries.insert(relation.family(), relation);
    }

    pub fn for_family(&self, family: ValueFamily) -> DeferredResult<Arc<dyn StagingRelation>> {
        self.entries.get(&family).cloned().ok_or_else(|| {
            DeferredError::configuration(format!(
                "unsupported value family '{family}': register a staging relation for it"
            ))
        })
    }

    pub fn supports(&self, family: ValueFamily) -> bool {
        self.entries.contains_key(&family)
    }
}

impl Default for StagingRelations {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub async fn apply_batch(
    conn: &DatabaseConnection,
    relation: &dyn StagingRelation,
    target_table: &str,
    target_column: &str,
    rows: &[BatchRow],
) -> DeferredResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tx = conn.begin().await?;
    relation.bulk_load(&tx, rows).await?;
    let updated = relation
        .apply_joined_update(&tx, target_table, target_column)
        .await?;
    relation.clear(&tx).await?;
    tx.commit().await?;
    Ok(updated)
}

pub(crate) async fn drain_through_relation<S>(
    conn: &DatabaseConnection,
    relation: &dyn StagingRelation,
    step: &mut S,
    limits: DrainLimits,
    transform: Option<&Transform<S::Row>>,
) -> DeferredResult<DrainReport>
where
    S: DrainStep,
{
    ensure_single_session(conn)?;
    relation.create(conn).await?;
    let outcome = drain(step, limits, transform).await;
    let dropped = relation.drop_table(conn).await;
    match (outcome, dropped) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(drop_err)) => {
            log::warn!(
                "deferred: could not drop staging relation {}: {drop_err}",
                relation.table_name()
            );
            Err(err)
        }
    }
}

pub async fn bulk_insert(
    conn: &DatabaseConnection,
    table: &str,
    columns: &[String],
    rows: Vec<Vec<JsonValue>>,
) -> DeferredResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    if columns.is_empty() {
        return Err(DeferredError::validation(format!(
            "insert batch for '{table}' has no columns"
        )));
    }
    let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
    let backend = conn.get_database_backend();
    let tx = conn.begin().await?;
    let mut inserted = 0;
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let insert = insert_statement(table, columns, rows.by_ref().take(rows_per_statement))?;
        inserted += match inline_sql(backend, &insert) {
            Some(sql) => exec_sql(&tx, sql).await?,
            None => exec(&tx, &insert).await?,
        };
    }
    tx.commit().await?;
    Ok(inserted)
}

fn insert_statement(
    table: &str,
    columns: &[String],
    rows: impl Iterator<Item = Vec<JsonValue>>,
) -> DeferredResult<InsertStatement> {
    let json_expr = |value: JsonValue| match value {
        JsonValue::Null => Expr::cust("NULL"),
        JsonValue::Bool(v) => Expr::val(v),
        JsonValue::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(v), _, _) => Expr::val(v),
            (None, Some(v), _) => Expr::val(v),
            (None, None, Some(v)) => Expr::val(v),
            (None, None, None) => Expr::val(n.to_string()),
        },
        JsonValue::String(v) => Expr::val(v),
        other => Expr::val(other.to_string()),
    };
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(table.to_string()))
        .columns(columns.iter().map(|column| Alias::new(column.clone())));
    for row in rows {
        insert
            .values(row.into_iter().map(json_expr))
            .map_err(|err| DeferredError::storage(err.to_string()))?;
    }
    Ok(insert)
}

// Postgres refuses text-typed binds for timestamptz, uuid or jsonb columns, so
// JSON strings go out as untyped literals there.
fn inline_sql(backend: DatabaseBackend, insert: &InsertStatement) -> Option<String> {
    match backend {
        DatabaseBackend::Postgres => Some(insert.to_string(PostgresQueryBuilder)),
        _ => None,
    }
}
