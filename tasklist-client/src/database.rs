use crate::queries::{DbHelpers, Queries};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use tasklist_core::{
    errors::SyncError,
    models::{SyncAction, SyncQueueEntry, Task, TaskChanges, TaskId, TaskPage, TaskQuery},
    SyncResult,
};

/// Check if a sqlx error is a SQLite primary key / unique violation.
fn is_duplicate_key_error(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        // SQLITE_CONSTRAINT_PRIMARYKEY = 1555, SQLITE_CONSTRAINT_UNIQUE = 2067
        return db_err
            .code()
            .map(|c| c == "1555" || c == "2067")
            .unwrap_or(false);
    }
    false
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// The single persistence handle owning the task table and the sync queue.
pub struct ClientDatabase {
    pub pool: SqlitePool,
}

impl ClientDatabase {
    pub async fn new(database_url: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if is_in_memory(database_url) {
            // Every connection to a private in-memory database sees its own copy,
            // so keep exactly one connection alive for the pool's lifetime.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> SyncResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ===== Record store =====

    pub async fn get_task(&self, id: TaskId) -> SyncResult<Task> {
        self.find_task(id).await?.ok_or(SyncError::NotFound(id))
    }

    pub async fn find_task(&self, id: TaskId) -> SyncResult<Option<Task>> {
        let row = sqlx::query(Queries::GET_TASK)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(DbHelpers::parse_task).transpose()
    }

    pub async fn list_tasks(&self) -> SyncResult<Vec<Task>> {
        let rows = sqlx::query(Queries::LIST_TASKS)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_task).collect()
    }

    pub async fn query_tasks(&self, query: &TaskQuery) -> SyncResult<TaskPage> {
        let mut count = sqlx::QueryBuilder::<Sqlite>::new(Queries::SELECT_TASK_COUNT);
        DbHelpers::push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = sqlx::QueryBuilder::<Sqlite>::new(Queries::SELECT_TASK_COLUMNS);
        DbHelpers::push_filters(&mut select, query);
        select
            .push(" ORDER BY last_updated DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.effective_per_page()))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let tasks = rows
            .iter()
            .map(DbHelpers::parse_task)
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(TaskPage::new(tasks, total.max(0) as u64, query))
    }

    pub async fn count_tasks(&self) -> SyncResult<i64> {
        Ok(sqlx::query_scalar(Queries::COUNT_TASKS)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_unsynced(&self) -> SyncResult<i64> {
        Ok(sqlx::query_scalar(Queries::COUNT_UNSYNCED)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn max_task_id(&self) -> SyncResult<Option<TaskId>> {
        Ok(sqlx::query_scalar(Queries::MAX_TASK_ID)
            .fetch_one(&self.pool)
            .await?)
    }

    // ===== Atomic mutate-and-enqueue =====
    // Each of these commits the task change and its queue entry together, so no
    // reader ever sees a changed task without the entry that will sync it.

    pub async fn insert_task_and_enqueue(&self, task: &Task) -> SyncResult<i64> {
        let mut tx = self.pool.begin().await?;

        if Self::task_exists(&mut tx, task.id).await? {
            return Err(SyncError::DuplicateId(task.id));
        }

        DbHelpers::bind_task(sqlx::query(Queries::INSERT_TASK), task)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_duplicate_key_error(&e) {
                    SyncError::DuplicateId(task.id)
                } else {
                    e.into()
                }
            })?;

        let entry_id =
            Self::enqueue(&mut tx, task.id, SyncAction::Create, Some(task), task.last_updated)
                .await?;

        tx.commit().await?;

        tracing::info!(
            "DATABASE: Inserted task {} and queued create entry {}",
            task.id,
            entry_id
        );
        Ok(entry_id)
    }

    pub async fn update_task_and_enqueue(
        &self,
        id: TaskId,
        changes: TaskChanges,
        now_ms: i64,
    ) -> SyncResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(Queries::GET_TASK)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut task = match row {
            Some(row) => DbHelpers::parse_task(&row)?,
            None => return Err(SyncError::NotFound(id)),
        };

        task.apply(changes);
        task.last_updated = now_ms;
        task.is_synced = false;

        DbHelpers::bind_task(sqlx::query(Queries::UPSERT_TASK), &task)
            .execute(&mut *tx)
            .await?;

        let entry_id = Self::enqueue(&mut tx, id, SyncAction::Update, Some(&task), now_ms).await?;

        tx.commit().await?;

        tracing::info!(
            "DATABASE: Updated task {} and queued update entry {}",
            id,
            entry_id
        );
        Ok(task)
    }

    /// Remove a task and queue its deletion. Returns the removed snapshot.
    pub async fn delete_task_and_enqueue(&self, id: TaskId, now_ms: i64) -> SyncResult<Task> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(Queries::GET_TASK)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let task = match row {
            Some(row) => DbHelpers::parse_task(&row)?,
            None => return Err(SyncError::NotFound(id)),
        };

        sqlx::query(Queries::DELETE_TASK)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let entry_id = Self::enqueue(&mut tx, id, SyncAction::Delete, Some(&task), now_ms).await?;

        tx.commit().await?;

        tracing::info!(
            "DATABASE: Deleted task {} and queued delete entry {}",
            id,
            entry_id
        );
        Ok(task)
    }

    async fn task_exists(tx: &mut Transaction<'_, Sqlite>, id: TaskId) -> SyncResult<bool> {
        let exists: bool = sqlx::query_scalar(Queries::TASK_EXISTS)
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }

    async fn enqueue(
        tx: &mut Transaction<'_, Sqlite>,
        task_id: TaskId,
        action: SyncAction,
        payload: Option<&Task>,
        enqueued_at: i64,
    ) -> SyncResult<i64> {
        let payload_json = payload.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(Queries::INSERT_SYNC_QUEUE)
            .bind(task_id)
            .bind(action.to_string())
            .bind(payload_json)
            .bind(enqueued_at)
            .execute(&mut **tx)
            .await?;

        Ok(result.last_insert_rowid())
    }

    // ===== Sync queue =====

    /// All pending entries, oldest first.
    pub async fn queue_entries(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(Queries::GET_SYNC_QUEUE)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_queue_entry).collect()
    }

    pub async fn queue_entries_for_task(&self, task_id: TaskId) -> SyncResult<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(Queries::GET_QUEUE_FOR_TASK)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(DbHelpers::parse_queue_entry).collect()
    }

    pub async fn count_queue(&self) -> SyncResult<i64> {
        DbHelpers::count_queue(&self.pool).await
    }

    /// Record a confirmed delivery: drop the entry and, for create/update, mark
    /// the task synced when nothing newer for it is still queued.
    ///
    /// Returns whether the task was marked synced.
    pub async fn complete_entry(&self, entry: &SyncQueueEntry) -> SyncResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(Queries::DELETE_FROM_QUEUE)
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;

        let mut marked = false;
        if entry.action != SyncAction::Delete {
            let remaining: i64 = sqlx::query_scalar(Queries::COUNT_QUEUE_FOR_TASK)
                .bind(entry.task_id)
                .fetch_one(&mut *tx)
                .await?;

            if remaining == 0 {
                let result = sqlx::query(Queries::MARK_TASK_SYNCED)
                    .bind(entry.task_id)
                    .execute(&mut *tx)
                    .await?;
                marked = result.rows_affected() > 0;
            }
        }

        tx.commit().await?;

        tracing::debug!(
            "DATABASE: Completed queue entry {} for task {} (marked synced: {})",
            entry.id,
            entry.task_id,
            marked
        );
        Ok(marked)
    }

    /// Count a failed delivery. Returns the new attempt count, or `None` if
    /// the entry has been removed in the meantime.
    pub async fn record_failure(&self, entry_id: i64) -> SyncResult<Option<u32>> {
        let row = sqlx::query(Queries::INCREMENT_ATTEMPTS)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let attempts: i64 = row.try_get("attempts")?;
            Ok(attempts.max(0) as u32)
        })
        .transpose()
    }

    pub async fn remove_entry(&self, entry_id: i64) -> SyncResult<()> {
        sqlx::query(Queries::DELETE_FROM_QUEUE)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Bootstrap / maintenance =====

    /// Store tasks fetched from the remote as already synced, without queueing
    /// anything. Only applies to an empty store; returns how many were stored.
    pub async fn seed_synced_tasks(&self, tasks: &[Task]) -> SyncResult<usize> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar(Queries::COUNT_TASKS)
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            tracing::info!(
                "DATABASE: Store already holds {} tasks, skipping seed",
                existing
            );
            return Ok(0);
        }

        let mut stored = 0;
        for task in tasks {
            let mut task = task.clone();
            task.is_synced = true;
            DbHelpers::bind_task(sqlx::query(Queries::UPSERT_TASK), &task)
                .execute(&mut *tx)
                .await?;
            stored += 1;
        }

        tx.commit().await?;

        tracing::info!("DATABASE: Seeded {} synced tasks", stored);
        Ok(stored)
    }

    pub async fn clear_all(&self) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(Queries::CLEAR_QUEUE).execute(&mut *tx).await?;
        sqlx::query(Queries::CLEAR_TASKS).execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!("DATABASE: Cleared all tasks and pending sync entries");
        Ok(())
    }
}
