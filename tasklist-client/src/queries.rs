use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tasklist_core::{
    models::{parse_task_date, StatusFilter, SyncAction, SyncQueueEntry, Task, TaskQuery},
    SyncResult,
};

/// Type alias for task parameters tuple
pub type TaskParams = (
    i64,            // id
    String,         // title
    bool,           // completed
    String,         // date
    Option<String>, // display_tint
    i64,            // last_updated
    bool,           // is_synced
);

/// SQL queries for client database operations
pub struct Queries;

impl Queries {
    // Task queries
    pub const GET_TASK: &'static str = r#"
        SELECT id, title, completed, date, display_tint, last_updated, is_synced
        FROM tasks
        WHERE id = ?1
    "#;

    pub const TASK_EXISTS: &'static str = "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)";

    pub const INSERT_TASK: &'static str = r#"
        INSERT INTO tasks (
            id, title, completed, date, display_tint, last_updated, is_synced
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    "#;

    pub const UPSERT_TASK: &'static str = r#"
        INSERT INTO tasks (
            id, title, completed, date, display_tint, last_updated, is_synced
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            completed = excluded.completed,
            date = excluded.date,
            display_tint = excluded.display_tint,
            last_updated = excluded.last_updated,
            is_synced = excluded.is_synced
    "#;

    pub const DELETE_TASK: &'static str = "DELETE FROM tasks WHERE id = ?1";

    pub const LIST_TASKS: &'static str = r#"
        SELECT id, title, completed, date, display_tint, last_updated, is_synced
        FROM tasks
        ORDER BY last_updated DESC, id DESC
    "#;

    pub const COUNT_TASKS: &'static str = "SELECT COUNT(*) FROM tasks";

    pub const COUNT_UNSYNCED: &'static str = "SELECT COUNT(*) FROM tasks WHERE is_synced = 0";

    pub const MARK_TASK_SYNCED: &'static str = "UPDATE tasks SET is_synced = 1 WHERE id = ?1";

    pub const MAX_TASK_ID: &'static str = "SELECT MAX(id) FROM tasks";

    // Sync queue queries
    pub const INSERT_SYNC_QUEUE: &'static str = r#"
        INSERT INTO sync_queue (task_id, action, payload, enqueued_at, attempts)
        VALUES (?1, ?2, ?3, ?4, 0)
    "#;

    pub const GET_SYNC_QUEUE: &'static str = r#"
        SELECT id, task_id, action, payload, enqueued_at, attempts
        FROM sync_queue
        ORDER BY id ASC
    "#;

    pub const GET_QUEUE_FOR_TASK: &'static str = r#"
        SELECT id, task_id, action, payload, enqueued_at, attempts
        FROM sync_queue
        WHERE task_id = ?1
        ORDER BY id ASC
    "#;

    pub const COUNT_QUEUE: &'static str = "SELECT COUNT(*) FROM sync_queue";

    pub const COUNT_QUEUE_FOR_TASK: &'static str =
        "SELECT COUNT(*) FROM sync_queue WHERE task_id = ?1";

    pub const DELETE_FROM_QUEUE: &'static str = "DELETE FROM sync_queue WHERE id = ?1";

    pub const INCREMENT_ATTEMPTS: &'static str =
        "UPDATE sync_queue SET attempts = attempts + 1 WHERE id = ?1 RETURNING attempts";

    pub const CLEAR_TASKS: &'static str = "DELETE FROM tasks";

    pub const CLEAR_QUEUE: &'static str = "DELETE FROM sync_queue";

    /// Columns selected by filtered listings, see [`DbHelpers::push_filters`].
    pub const SELECT_TASK_COLUMNS: &'static str =
        "SELECT id, title, completed, date, display_tint, last_updated, is_synced FROM tasks";

    pub const SELECT_TASK_COUNT: &'static str = "SELECT COUNT(*) FROM tasks";
}

/// Helper functions for common database operations
pub struct DbHelpers;

impl DbHelpers {
    /// Parse a task from a database row
    pub fn parse_task(row: &SqliteRow) -> SyncResult<Task> {
        let date: String = row.try_get("date")?;

        Ok(Task {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            completed: row.try_get("completed")?,
            date: parse_task_date(&date)?,
            display_tint: row.try_get("display_tint")?,
            last_updated: row.try_get("last_updated")?,
            is_synced: row.try_get("is_synced")?,
        })
    }

    /// Parse a sync queue entry from a database row
    pub fn parse_queue_entry(row: &SqliteRow) -> SyncResult<SyncQueueEntry> {
        let action: String = row.try_get("action")?;
        let payload: Option<String> = row.try_get("payload")?;
        let attempts: i64 = row.try_get("attempts")?;

        Ok(SyncQueueEntry {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            action: SyncAction::from_str(&action)?,
            payload: payload
                .map(|json| serde_json::from_str::<Task>(&json))
                .transpose()?,
            enqueued_at: row.try_get("enqueued_at")?,
            attempts: attempts.max(0) as u32,
        })
    }

    /// Prepare task values for database insertion
    pub fn task_to_params(task: &Task) -> TaskParams {
        (
            task.id,
            task.title.clone(),
            task.completed,
            task.date.format("%Y-%m-%d").to_string(),
            task.display_tint.clone(),
            task.last_updated,
            task.is_synced,
        )
    }

    /// Bind a task in `INSERT_TASK` / `UPSERT_TASK` parameter order.
    pub fn bind_task<'q>(
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        task: &Task,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        let params = Self::task_to_params(task);
        query
            .bind(params.0) // id
            .bind(params.1) // title
            .bind(params.2) // completed
            .bind(params.3) // date
            .bind(params.4) // display_tint
            .bind(params.5) // last_updated
            .bind(params.6) // is_synced
    }

    /// Append the WHERE clause for a [`TaskQuery`] to a builder.
    pub fn push_filters(builder: &mut sqlx::QueryBuilder<'_, Sqlite>, query: &TaskQuery) {
        builder.push(" WHERE 1 = 1");

        match query.status {
            StatusFilter::All => {}
            StatusFilter::Completed => {
                builder.push(" AND completed = 1");
            }
            StatusFilter::Pending => {
                builder.push(" AND completed = 0");
            }
        }

        if let Some(date) = query.date {
            builder
                .push(" AND date = ")
                .push_bind(date.format("%Y-%m-%d").to_string());
        }

        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
                builder
                    .push(" AND (LOWER(title) LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR CAST(id AS TEXT) LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR date LIKE ")
                    .push_bind(pattern)
                    .push(" ESCAPE '\\')");
            }
        }
    }

    /// Get count of queue entries
    pub async fn count_queue(pool: &SqlitePool) -> SyncResult<i64> {
        Ok(sqlx::query_scalar(Queries::COUNT_QUEUE)
            .fetch_one(pool)
            .await?)
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
