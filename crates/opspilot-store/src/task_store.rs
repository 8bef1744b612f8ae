//! SQLite-backed task store — durable CRUD with soft delete, plus the
//! task↔conversation link table.
//!
//! Nested lists (work log, delivery actions) are stored as JSON columns;
//! timestamps as RFC 3339 text.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::types::{
    ConversationLink, CreatedBy, DeliveryAction, SourceType, Task, TaskStatus, TaskType, WorkItem,
};

/// Filters for task listing. Soft-deleted tasks are excluded unless
/// `include_deleted` is set.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub source_type: Option<SourceType>,
    pub recurrence_id: Option<String>,
    pub include_deleted: bool,
}

/// Whitelisted fields for the update operation. `deleted` is not settable
/// here — only the dedicated delete operation may set it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub status: Option<TaskStatus>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Durable task store.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the task database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| OpsPilotError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OpsPilotError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_ref TEXT,
                title TEXT NOT NULL,
                instructions TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                session_id TEXT,
                recurrence_id TEXT,
                occurrence_date TEXT,
                scheduled_for TEXT,
                started_at TEXT,
                completed_at TEXT,
                deleted_at TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                work TEXT NOT NULL DEFAULT '[]',       -- JSON array of work items
                delivery TEXT NOT NULL DEFAULT '[]'    -- JSON array of delivery actions
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_recurrence ON tasks(recurrence_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

            -- Soft many-to-many; no referential integrity by design.
            CREATE TABLE IF NOT EXISTS conversation_links (
                task_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                linked_at TEXT NOT NULL,
                PRIMARY KEY (task_id, conversation_id)
            );
            ",
        )
        .map_err(|e| OpsPilotError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OpsPilotError::Store(e.to_string()))
    }

    /// Insert or replace a task row.
    pub fn save(&self, task: &Task) -> Result<()> {
        let work = serde_json::to_string(&task.work)
            .map_err(|e| OpsPilotError::Store(format!("Serialize work: {e}")))?;
        let delivery = serde_json::to_string(&task.delivery)
            .map_err(|e| OpsPilotError::Store(format!("Serialize delivery: {e}")))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks
             (id, task_type, source_type, source_ref, title, instructions, status,
              session_id, recurrence_id, occurrence_date, scheduled_for, started_at,
              completed_at, deleted_at, created_at, created_by, work, delivery)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            rusqlite::params![
                task.id,
                type_str(task.task_type),
                source_str(task.source_type),
                task.source_ref,
                task.title,
                task.instructions,
                task.status.as_str(),
                task.session_id,
                task.recurrence_id,
                task.occurrence_date,
                task.scheduled_for.map(|t| t.to_rfc3339()),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.deleted_at.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
                created_by_str(task.created_by),
                work,
                delivery,
            ],
        )
        .map_err(|e| OpsPilotError::Store(format!("Save task: {e}")))?;
        Ok(())
    }

    /// Fetch a task by id, including soft-deleted ones.
    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let task = stmt
            .query_row([id], row_to_task)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(OpsPilotError::Store(format!("Get task: {other}"))),
            })?;
        Ok(task)
    }

    /// List tasks matching a filter, newest first.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {COLUMNS} FROM tasks WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(t) = filter.task_type {
            sql.push_str(" AND task_type = ?");
            params.push(Box::new(type_str(t).to_string()));
        }
        if let Some(s) = filter.source_type {
            sql.push_str(" AND source_type = ?");
            params.push(Box::new(source_str(s).to_string()));
        }
        if let Some(rid) = &filter.recurrence_id {
            sql.push_str(" AND recurrence_id = ?");
            params.push(Box::new(rid.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), row_to_task)
            .map_err(|e| OpsPilotError::Store(format!("List tasks: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Apply a whitelisted update. Fails on soft-deleted tasks (they are
    /// immutable except for re-activation) and refuses `deleted` as a status.
    pub fn update(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        if update.status == Some(TaskStatus::Deleted) {
            return Err(OpsPilotError::Validation(
                "status 'deleted' is only settable via the delete operation".into(),
            ));
        }
        let mut task = self
            .get(id)?
            .ok_or_else(|| OpsPilotError::TaskNotFound(id.to_string()))?;
        if task.deleted_at.is_some() {
            return Err(OpsPilotError::Validation(format!(
                "task {id} is deleted and cannot be updated"
            )));
        }
        if let Some(title) = &update.title {
            task.title = title.clone();
        }
        if let Some(instructions) = &update.instructions {
            task.instructions = instructions.clone();
        }
        if let Some(status) = update.status {
            if status != task.status && !task.status.can_transition_to(status) {
                return Err(OpsPilotError::InvalidTransition(format!(
                    "{} -> {}",
                    task.status.as_str(),
                    status.as_str()
                )));
            }
            task.status = status;
        }
        if let Some(scheduled_for) = update.scheduled_for {
            task.scheduled_for = Some(scheduled_for);
        }
        self.save(&task)?;
        Ok(task)
    }

    /// Terminal transition: mark completed.
    pub fn complete(&self, id: &str) -> Result<Task> {
        let mut task = self
            .get(id)?
            .ok_or_else(|| OpsPilotError::TaskNotFound(id.to_string()))?;
        if task.deleted_at.is_some() {
            return Err(OpsPilotError::Validation(format!(
                "task {id} is deleted and cannot be completed"
            )));
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        self.save(&task)?;
        Ok(task)
    }

    /// Soft delete: sets status and deleted_at. The row remains queryable.
    pub fn soft_delete(&self, id: &str) -> Result<Task> {
        let mut task = self
            .get(id)?
            .ok_or_else(|| OpsPilotError::TaskNotFound(id.to_string()))?;
        if task.deleted_at.is_some() {
            return Err(OpsPilotError::Validation(format!(
                "task {id} is already deleted"
            )));
        }
        task.status = TaskStatus::Deleted;
        task.deleted_at = Some(Utc::now());
        self.save(&task)?;
        Ok(task)
    }

    /// Re-activate a soft-deleted task back to pending.
    pub fn restore(&self, id: &str) -> Result<Task> {
        let mut task = self
            .get(id)?
            .ok_or_else(|| OpsPilotError::TaskNotFound(id.to_string()))?;
        task.status = TaskStatus::Pending;
        task.deleted_at = None;
        self.save(&task)?;
        Ok(task)
    }

    /// First occurrence of a recurrence (oldest created), if any. Used to
    /// propagate the shared session id onto subsequent occurrences.
    pub fn first_of_recurrence(&self, recurrence_id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM tasks WHERE recurrence_id = ?1
                 ORDER BY created_at ASC LIMIT 1"
            ))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let task = stmt
            .query_row([recurrence_id], row_to_task)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(OpsPilotError::Store(format!("Recurrence lookup: {other}"))),
            })?;
        Ok(task)
    }

    /// The most recent finished runs of a recurrence, oldest first, bounded
    /// by `limit`. Feeds the executor's prompt context window.
    pub fn recent_history(&self, recurrence_id: &str, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM tasks
                 WHERE recurrence_id = ?1 AND deleted_at IS NULL
                   AND status IN ('completed', 'failed', 'needs_review')
                 ORDER BY created_at DESC LIMIT ?2"
            ))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![recurrence_id, limit as i64], row_to_task)
            .map_err(|e| OpsPilotError::Store(format!("History: {e}")))?;
        let mut tasks: Vec<Task> = rows.filter_map(|r| r.ok()).collect();
        tasks.reverse();
        Ok(tasks)
    }

    // ─── Conversation links ──────────────────────────────────

    /// Link a task to a conversation. Idempotent; only called from write
    /// operations, never from reads.
    pub fn link_conversation(&self, task_id: &str, conversation_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO conversation_links (task_id, conversation_id, linked_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![task_id, conversation_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| OpsPilotError::Store(format!("Link: {e}")))?;
        Ok(())
    }

    /// Conversations linked to a task.
    pub fn conversations_for_task(&self, task_id: &str) -> Result<Vec<ConversationLink>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT task_id, conversation_id, linked_at FROM conversation_links
                 WHERE task_id = ?1 ORDER BY linked_at",
            )
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([task_id], row_to_link)
            .map_err(|e| OpsPilotError::Store(format!("Links: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Tasks linked to a conversation. Orphaned links (task row gone or
    /// soft-deleted) are filtered here rather than enforced at write time.
    pub fn tasks_for_conversation(&self, conversation_id: &str) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS_T} FROM conversation_links l
                 JOIN tasks t ON t.id = l.task_id
                 WHERE l.conversation_id = ?1 AND t.deleted_at IS NULL
                 ORDER BY l.linked_at"
            ))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        let rows = stmt
            .query_map([conversation_id], row_to_task)
            .map_err(|e| OpsPilotError::Store(format!("Linked tasks: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Total row count, deleted included. Mostly for diagnostics.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        Ok(n as usize)
    }
}

const COLUMNS: &str = "id, task_type, source_type, source_ref, title, instructions, status, \
     session_id, recurrence_id, occurrence_date, scheduled_for, started_at, completed_at, \
     deleted_at, created_at, created_by, work, delivery";

const COLUMNS_T: &str = "t.id, t.task_type, t.source_type, t.source_ref, t.title, t.instructions, \
     t.status, t.session_id, t.recurrence_id, t.occurrence_date, t.scheduled_for, t.started_at, \
     t.completed_at, t.deleted_at, t.created_at, t.created_by, t.work, t.delivery";

fn type_str(t: TaskType) -> &'static str {
    match t {
        TaskType::Scheduled => "scheduled",
        TaskType::Immediate => "immediate",
    }
}

fn source_str(s: SourceType) -> &'static str {
    match s {
        SourceType::ExternalTrigger => "external_trigger",
        SourceType::Conversation => "conversation",
        SourceType::Webhook => "webhook",
        SourceType::Manual => "manual",
    }
}

fn created_by_str(c: CreatedBy) -> &'static str {
    match c {
        CreatedBy::Scheduler => "scheduler",
        CreatedBy::User => "user",
        CreatedBy::Agent => "agent",
    }
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let task_type: String = row.get(1)?;
    let source_type: String = row.get(2)?;
    let status: String = row.get(6)?;
    let created_by: String = row.get(15)?;
    let work: String = row.get(16)?;
    let delivery: String = row.get(17)?;
    let created_at: String = row.get(14)?;

    Ok(Task {
        id: row.get(0)?,
        task_type: match task_type.as_str() {
            "scheduled" => TaskType::Scheduled,
            _ => TaskType::Immediate,
        },
        source_type: match source_type.as_str() {
            "external_trigger" => SourceType::ExternalTrigger,
            "conversation" => SourceType::Conversation,
            "webhook" => SourceType::Webhook,
            _ => SourceType::Manual,
        },
        source_ref: row.get(3)?,
        title: row.get(4)?,
        instructions: row.get(5)?,
        status: status.parse().unwrap_or(TaskStatus::Pending),
        session_id: row.get(7)?,
        recurrence_id: row.get(8)?,
        occurrence_date: row.get(9)?,
        scheduled_for: parse_ts(row.get(10)?),
        started_at: parse_ts(row.get(11)?),
        completed_at: parse_ts(row.get(12)?),
        deleted_at: parse_ts(row.get(13)?),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        created_by: match created_by.as_str() {
            "scheduler" => CreatedBy::Scheduler,
            "agent" => CreatedBy::Agent,
            _ => CreatedBy::User,
        },
        work: serde_json::from_str::<Vec<WorkItem>>(&work).unwrap_or_default(),
        delivery: serde_json::from_str::<Vec<DeliveryAction>>(&delivery).unwrap_or_default(),
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationLink> {
    let linked_at: String = row.get(2)?;
    Ok(ConversationLink {
        task_id: row.get(0)?,
        conversation_id: row.get(1)?,
        linked_at: DateTime::parse_from_rfc3339(&linked_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
