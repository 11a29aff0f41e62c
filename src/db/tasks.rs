//! Task CRUD operations.

use crate::error::DatabaseError;
use crate::types::{Task, TaskId, TaskStatus, TaskUpdate};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, TaskRow, TaskStore};

const TASK_COLUMNS: &str = "id, url, quality, title, author, status, progress, error, \
     output_path, strategy, created_at, updated_at";

#[async_trait]
impl TaskStore for Database {
    async fn insert(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, url, quality, title, author, status, progress, error,
                output_path, strategy, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.url)
        .bind(task.quality.as_str())
        .bind(&task.title)
        .bind(&task.author)
        .bind(task.status.to_i32())
        .bind(f64::from(task.progress))
        .bind(task.error.clone())
        .bind(
            task.output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(task.strategy.clone())
        .bind(task.created_at.timestamp_millis())
        .bind(task.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task {}: {}",
                task.id, e
            )))
        })?;

        Ok(())
    }

    async fn update(&self, id: TaskId, update: &TaskUpdate) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
        query.push_bind(now);

        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.to_i32());
        }
        if let Some(progress) = update.progress {
            query.push(", progress = ").push_bind(f64::from(progress));
        }
        if let Some(error) = &update.error {
            query.push(", error = ").push_bind(error.clone());
        }
        if let Some(path) = &update.output_path {
            query
                .push(", output_path = ")
                .push_bind(path.to_string_lossy().into_owned());
        }
        if let Some(strategy) = &update.strategy {
            query.push(", strategy = ").push_bind(strategy.clone());
        }

        query.push(" WHERE id = ").push_bind(id.to_string());

        let result = query.build().execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update task {}: {}",
                id, e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "task {}",
                id
            ))));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task {}: {}",
                id, e
            )))
        })?;

        row.map(Task::try_from).transpose()
    }

    async fn find_unfinished(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN (?, ?, ?) ORDER BY created_at ASC"
        ))
        .bind(TaskStatus::Pending.to_i32())
        .bind(TaskStatus::Downloading.to_i32())
        .bind(TaskStatus::Processing.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list unfinished tasks: {}",
                e
            )))
        })?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            match Task::try_from(row) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }

    async fn set_clean_start(&self) -> Result<()> {
        Database::set_clean_start(self).await
    }

    async fn set_clean_shutdown(&self) -> Result<()> {
        Database::set_clean_shutdown(self).await
    }

    async fn was_unclean_shutdown(&self) -> Result<bool> {
        Database::was_unclean_shutdown(self).await
    }
}
