use crate::{errors::SyncError, SyncResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use strum::{Display, EnumString};

pub type TaskId = i64;

/// Default page size for [`TaskQuery`].
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// A single to-do item as stored locally and sent to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub completed: bool,
    #[serde(deserialize_with = "deserialize_task_date")]
    pub date: NaiveDate,
    pub display_tint: Option<String>,
    /// Milliseconds since epoch of the most recent local mutation.
    pub last_updated: i64,
    pub is_synced: bool,
}

impl Task {
    /// Merge a partial update into this task. Bookkeeping fields are left alone.
    pub fn apply(&mut self, changes: TaskChanges) {
        if let Some(title) = changes.title {
            self.title = title;
        }
        if let Some(completed) = changes.completed {
            self.completed = completed;
        }
        if let Some(date) = changes.date {
            self.date = date;
        }
        if let Some(tint) = changes.display_tint {
            self.display_tint = tint;
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        validate_title(&self.title)
    }
}

/// Caller input for creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(deserialize_with = "deserialize_task_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub display_tint: Option<String>,
}

impl NewTask {
    pub fn new(id: TaskId, title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id,
            title: title.into(),
            completed: false,
            date,
            display_tint: None,
        }
    }

    pub fn with_tint(mut self, tint: impl Into<String>) -> Self {
        self.display_tint = Some(tint.into());
        self
    }

    /// Build the stored record: trimmed title, unsynced, stamped with `now_ms`.
    pub fn into_task(self, now_ms: i64) -> SyncResult<Task> {
        let title = self.title.trim().to_string();
        validate_title(&title)?;
        Ok(Task {
            id: self.id,
            title,
            completed: self.completed,
            date: self.date,
            display_tint: self.display_tint,
            last_updated: now_ms,
            is_synced: false,
        })
    }
}

/// Partial update. `display_tint: Some(None)` clears the tint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub completed: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_optional_task_date")]
    pub date: Option<NaiveDate>,
    pub display_tint: Option<Option<String>>,
}

impl TaskChanges {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.completed.is_none()
            && self.date.is_none()
            && self.display_tint.is_none()
    }

    /// Trim the title and reject it if that leaves nothing.
    pub fn normalized(mut self) -> SyncResult<Self> {
        if let Some(title) = self.title.take() {
            let title = title.trim().to_string();
            validate_title(&title)?;
            self.title = Some(title);
        }
        Ok(self)
    }
}

fn validate_title(title: &str) -> SyncResult<()> {
    if title.trim().is_empty() {
        return Err(SyncError::InvalidTask("title must not be empty".to_string()));
    }
    Ok(())
}

/// Parse a task date given either as `YYYY-MM-DD` or as a full RFC 3339
/// timestamp, in which case only the UTC calendar date is kept.
pub fn parse_task_date(value: &str) -> SyncResult<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    let timestamp = DateTime::parse_from_rfc3339(value)?;
    Ok(timestamp.with_timezone(&Utc).date_naive())
}

fn deserialize_task_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_task_date(&value).map_err(serde::de::Error::custom)
}

fn deserialize_optional_task_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| parse_task_date(&value).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Hands out task ids derived from the wall clock in milliseconds.
///
/// Ids are strictly increasing for the lifetime of the generator, so two
/// tasks created within the same millisecond never collide.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: AtomicI64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after an id already in use, e.g. the largest stored id.
    pub fn starting_after(last: TaskId) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Ensure every later id is greater than `id`.
    pub fn advance_past(&self, id: TaskId) {
        self.last.fetch_max(id, Ordering::AcqRel);
    }

    pub fn next_id(&self) -> TaskId {
        let now = now_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// A pending mutation awaiting confirmation by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub task_id: TaskId,
    pub action: SyncAction,
    /// Snapshot at enqueue time; `None` only for a delete of a vanished task.
    pub payload: Option<Task>,
    pub enqueued_at: i64,
    pub attempts: u32,
}

/// Derived sync counters, shown as the "unsynced" badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub unsynced_tasks: u64,
    pub queued_entries: u64,
}

impl SyncStatusReport {
    pub fn is_settled(&self) -> bool {
        self.unsynced_tasks == 0 && self.queued_entries == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Pending,
}

/// Listing filter with 1-based pagination. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    pub status: StatusFilter,
    pub date: Option<NaiveDate>,
    /// Case-insensitive match on title, id digits or ISO date.
    pub search: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            status: StatusFilter::All,
            date: None,
            search: None,
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TaskQuery {
    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.search = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn effective_per_page(&self) -> u32 {
        if self.per_page == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.per_page
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.effective_page() - 1) * u64::from(self.effective_per_page())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl TaskPage {
    pub fn new(tasks: Vec<Task>, total: u64, query: &TaskQuery) -> Self {
        let per_page = query.effective_per_page();
        let total_pages = total.div_ceil(u64::from(per_page)) as u32;
        Self {
            tasks,
            total,
            page: query.effective_page(),
            per_page,
            total_pages,
        }
    }
}
