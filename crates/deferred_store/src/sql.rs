use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};

use deferred_core::DeferredResult;

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> DeferredResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn exec_sql<C>(conn: &C, sql: String) -> DeferredResult<u64>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let result = conn
        .execute_raw(Statement::from_string(backend, sql))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) fn quote_ident(backend: DatabaseBackend, ident: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{}`", ident.replace('`', "``")),
        _ => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_per_backend() {
        assert_eq!(quote_ident(DatabaseBackend::Postgres, "users"), "\"users\"");
        assert_eq!(quote_ident(DatabaseBackend::Sqlite, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident(DatabaseBackend::MySql, "users"), "`users`");
    }
}
