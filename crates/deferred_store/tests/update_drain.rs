use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deferred_store::{
    BatchRow, DeferredConfig, DeferredResult, FieldTarget, MemoryStagingStore, ProcessOptions,
    RecordId, UpdateQueue, ValueFamily, connect_relational,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};
use tempfile::tempdir;

async fn sqlite_session(base: &Path) -> DeferredResult<DatabaseConnection> {
    let config = DeferredConfig::default_sqlite("writes.sqlite");
    let conn = connect_relational(&config, base).await?;
    conn.execute_raw(Statement::from_string(
        DatabaseBackend::Sqlite,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, nickname TEXT, logins INTEGER, rating REAL)",
    ))
    .await?;
    conn.execute_raw(Statement::from_string(
        DatabaseBackend::Sqlite,
        "INSERT INTO users (id, nickname, logins) VALUES (1, 'one', 0), (2, 'two', 0), (3, 'three', 0), (7, 'seven', 0)",
    ))
    .await?;
    Ok(conn)
}

async fn nickname_of(conn: &DatabaseConnection, id: i64) -> DeferredResult<Option<String>> {
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT nickname FROM users WHERE id = {id}"),
        ))
        .await?;
    let mut nickname = None;
    for row in rows {
        nickname = row.try_get::<Option<String>>("", "nickname")?;
    }
    Ok(nickname)
}

async fn staging_tables(conn: &DatabaseConnection) -> DeferredResult<usize> {
    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT name FROM sqlite_temp_master WHERE type = 'table' AND name LIKE 'temp_deferred_updates%'",
        ))
        .await?;
    Ok(rows.len())
}

fn nickname() -> FieldTarget {
    FieldTarget::new("User", "users", "nickname", ValueFamily::Text)
}

#[tokio::test]
async fn last_write_wins_per_id() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());

    queue.enqueue(&store, &nickname(), 7, "a").await?;
    queue.enqueue(&store, &nickname(), 7, "b").await?;

    let report = queue
        .process(&store, &conn, &nickname(), ProcessOptions::default())
        .await?;
    assert_eq!(report.batch_sizes, vec![1]);
    assert_eq!(nickname_of(&conn, 7).await?, Some("b".to_string()));
    assert_eq!(queue.pending(&store, &nickname()).await?, 0);
    assert_eq!(store.key_count()?, 0);
    assert_eq!(staging_tables(&conn).await?, 0);
    Ok(())
}

#[tokio::test]
async fn stale_ids_drain_before_hot_ones() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());

    for (id, value) in [(1, "x1"), (2, "x2"), (3, "x3"), (1, "y1")] {
        queue.enqueue(&store, &nickname(), id, value).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let seen: Arc<Mutex<Vec<RecordId>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let options = ProcessOptions::<BatchRow>::default()
        .with_batch_size(1)
        .with_transform(move |rows| {
            recorder
                .lock()
                .expect("lock")
                .extend(rows.iter().map(|row| row.id));
            Ok(rows)
        });
    let report = queue.process(&store, &conn, &nickname(), options).await?;

    assert_eq!(report.batch_sizes, vec![1, 1, 1]);
    assert_eq!(
        *seen.lock().expect("lock"),
        vec![RecordId(2), RecordId(3), RecordId(1)]
    );
    assert_eq!(nickname_of(&conn, 1).await?, Some("y1".to_string()));
    Ok(())
}

#[tokio::test]
async fn integer_columns_update_through_their_own_relation() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());
    let logins = FieldTarget::new("User", "users", "logins", ValueFamily::Integer);

    for id in [1, 2, 3] {
        queue.enqueue(&store, &logins, id, id * 10).await?;
    }
    queue
        .process(&store, &conn, &logins, ProcessOptions::default())
        .await?;

    let rows = conn
        .query_all_raw(Statement::from_string(
            DatabaseBackend::Sqlite,
            "SELECT logins FROM users WHERE id IN (1, 2, 3) ORDER BY id",
        ))
        .await?;
    let logins = rows
        .iter()
        .map(|row| row.try_get::<i64>("", "logins"))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(logins, vec![10, 20, 30]);
    Ok(())
}

#[tokio::test]
async fn unsupported_family_fails_before_touching_anything() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());
    let rating = FieldTarget::new("User", "users", "rating", ValueFamily::Float);

    queue.enqueue(&store, &rating, 1, 4.5).await?;
    let err = queue
        .process(&store, &conn, &rating, ProcessOptions::default())
        .await
        .err()
        .expect("float has no staging relation");
    assert!(err.is_configuration());
    assert_eq!(queue.pending(&store, &rating).await?, 1);
    assert_eq!(staging_tables(&conn).await?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_update_still_drops_the_staging_relation() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());
    let missing = FieldTarget::new("Ghost", "ghosts", "nickname", ValueFamily::Text);

    queue.enqueue(&store, &missing, 1, "boo").await?;
    let result = queue
        .process(&store, &conn, &missing, ProcessOptions::default())
        .await;
    assert!(result.is_err());
    assert_eq!(staging_tables(&conn).await?, 0);
    // Extraction happened before the failed write.
    assert_eq!(queue.pending(&store, &missing).await?, 0);
    Ok(())
}

#[tokio::test]
async fn zero_batch_size_is_a_configuration_error() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let conn = sqlite_session(dir.path()).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());
    queue.enqueue(&store, &nickname(), 1, "kept").await?;

    let err = queue
        .process(
            &store,
            &conn,
            &nickname(),
            ProcessOptions::default().with_batch_size(0),
        )
        .await
        .err()
        .expect("zero batch size");
    assert!(err.is_configuration());
    assert_eq!(queue.pending(&store, &nickname()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn multi_connection_pool_is_refused_before_draining() -> DeferredResult<()> {
    let dir = tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("pooled.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options.max_connections(2);
    let conn = Database::connect(options).await?;
    let store = MemoryStagingStore::new();
    let queue = UpdateQueue::new(&DeferredConfig::default());
    queue.enqueue(&store, &nickname(), 1, "uno").await?;

    let err = queue
        .process(&store, &conn, &nickname(), ProcessOptions::default())
        .await
        .err()
        .expect("pool wider than one session");
    assert!(err.is_configuration());
    assert_eq!(queue.pending(&store, &nickname()).await?, 1);
    Ok(())
}
