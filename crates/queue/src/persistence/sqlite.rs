//! SQLite implementation of TaskStore
//!
//! One `tasks` table; ids come from `AUTOINCREMENT` so they are never reused.
//! The completion update only matches unfinalized rows, which makes it
//! apply at most once even under concurrent writers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use taskq_core::{TaskCompletion, TaskId, TaskRecord};
use tracing::{debug, error, instrument};

use super::store::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    create_time TEXT NOT NULL,
    start_time TEXT NULL,
    time_to_execute REAL NULL,
    error TEXT NULL
)
"#;

/// SQLite implementation of TaskStore
///
/// # Example
///
/// ```ignore
/// use taskq_queue::SqliteTaskStore;
///
/// let store = SqliteTaskStore::connect("sqlite://tasks.db?mode=rwc").await?;
/// ```
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open a pool for `database_url` and create the schema if needed.
    ///
    /// In-memory databases are private to a connection, so they get a single
    /// connection that is never recycled.
    #[instrument]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = options.connect(database_url).await.map_err(|e| {
            error!("Failed to connect to database: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not created; call [`Self::migrate`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `tasks` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create tasks table: {}", e);
                StoreError::Database(e.to_string())
            })?;
        Ok(())
    }

    async fn exists(&self, id: TaskId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self))]
    async fn create(&self, create_time: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let result = sqlx::query("INSERT INTO tasks (create_time) VALUES (?)")
            .bind(create_time)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create task: {}", e);
                StoreError::Database(e.to_string())
            })?;

        let id = TaskId::new(result.last_insert_rowid());
        debug!(task_id = %id, "created task record");
        Ok(id)
    }

    #[instrument(skip(self, completion), fields(task_id = %completion.id))]
    async fn update(&self, completion: &TaskCompletion) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET start_time = ?, time_to_execute = ?, error = ?
            WHERE id = ? AND time_to_execute IS NULL
            "#,
        )
        .bind(completion.start_time)
        .bind(completion.time_to_execute.as_secs_f64())
        .bind(completion.outcome.error())
        .bind(completion.id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return if self.exists(completion.id).await? {
                Err(StoreError::AlreadyFinalized(completion.id))
            } else {
                Err(StoreError::NotFound(completion.id))
            };
        }

        debug!("finalized task record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, create_time, start_time, time_to_execute, error
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(e.to_string());

    let elapsed: Option<f64> = row.try_get("time_to_execute").map_err(decode)?;
    let time_to_execute = elapsed
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(TaskRecord {
        id: TaskId::new(row.try_get("id").map_err(decode)?),
        create_time: row.try_get("create_time").map_err(decode)?,
        start_time: row.try_get("start_time").map_err(decode)?,
        time_to_execute,
        error: row.try_get("error").map_err(decode)?,
    })
}

#[cfg(test)]
mod tests {
    use taskq_core::TaskOutcome;

    use super::*;

    async fn store() -> SqliteTaskStore {
        SqliteTaskStore::connect("sqlite::memory:").await.unwrap()
    }

    fn completion(id: TaskId, outcome: TaskOutcome) -> TaskCompletion {
        TaskCompletion {
            id,
            start_time: Utc::now(),
            time_to_execute: Duration::from_millis(1250),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = store().await;
        let mut previous = store.create(Utc::now()).await.unwrap();
        for _ in 0..5 {
            let next = store.create(Utc::now()).await.unwrap();
            assert!(next > previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_fresh_record_has_null_fields() {
        let store = store().await;
        let created = Utc::now();
        let id = store.create(created).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.create_time, created);
        assert!(record.start_time.is_none());
        assert!(record.time_to_execute.is_none());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_update_round_trips_timing() {
        let store = store().await;
        let id = store.create(Utc::now()).await.unwrap();
        let done = completion(id, TaskOutcome::Succeeded);
        store.update(&done).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.start_time, Some(done.start_time));
        assert_eq!(record.time_to_execute, Some(Duration::from_millis(1250)));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_persisted() {
        let store = store().await;
        let id = store.create(Utc::now()).await.unwrap();
        store
            .update(&completion(
                id,
                TaskOutcome::Failed {
                    error: "disk on fire".to_string(),
                },
            ))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("disk on fire"));
    }

    #[tokio::test]
    async fn test_second_update_is_rejected() {
        let store = store().await;
        let id = store.create(Utc::now()).await.unwrap();
        store
            .update(&completion(id, TaskOutcome::Succeeded))
            .await
            .unwrap();

        let err = store
            .update(&completion(id, TaskOutcome::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let store = store().await;
        assert!(store.get(TaskId::new(77)).await.unwrap().is_none());

        let err = store
            .update(&completion(TaskId::new(77), TaskOutcome::Succeeded))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
