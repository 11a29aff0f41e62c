use crate::db::*;
use crate::types::{AudioQuality, Metadata, Task, TaskStatus, TaskUpdate};
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn sample_task(url: &str) -> Task {
    Task::new(
        url,
        AudioQuality::High,
        &Metadata {
            title: Some("Never Gonna Give You Up".into()),
            author: Some("Rick Astley".into()),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_insert_and_find_task() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let task = sample_task("https://youtu.be/dQw4w9WgXcQ");
    db.insert(&task).await.unwrap();

    let loaded = db.find_by_id(task.id).await.unwrap().expect("task should exist");
    assert_eq!(loaded.id, task.id);
    assert_eq!(loaded.url, task.url);
    assert_eq!(loaded.quality, AudioQuality::High);
    assert_eq!(loaded.title, "Never Gonna Give You Up");
    assert_eq!(loaded.author, "Rick Astley");
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.progress, 0.0);
    assert!(loaded.output_path.is_none());
    assert_eq!(
        loaded.created_at.timestamp_millis(),
        task.created_at.timestamp_millis()
    );

    db.close().await;
}

#[tokio::test]
async fn test_find_missing_task_returns_none() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let missing = db.find_by_id(crate::types::TaskId::new()).await.unwrap();
    assert!(missing.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_update_writes_only_provided_fields() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let task = sample_task("https://youtu.be/a");
    db.insert(&task).await.unwrap();

    db.update(
        task.id,
        &TaskUpdate::status(TaskStatus::Downloading)
            .with_progress(37.5)
            .with_strategy("yt-dlp"),
    )
    .await
    .unwrap();

    let loaded = db.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Downloading);
    assert_eq!(loaded.progress, 37.5);
    assert_eq!(loaded.strategy.as_deref(), Some("yt-dlp"));
    assert_eq!(loaded.title, task.title, "untouched fields keep their values");
    assert!(loaded.error.is_none());

    db.update(
        task.id,
        &TaskUpdate::status(TaskStatus::Complete)
            .with_progress(100.0)
            .with_output(PathBuf::from("/downloads/a.mp3")),
    )
    .await
    .unwrap();

    let loaded = db.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Complete);
    assert_eq!(loaded.output_path, Some(PathBuf::from("/downloads/a.mp3")));
    assert_eq!(loaded.strategy.as_deref(), Some("yt-dlp"));
    assert!(loaded.updated_at >= loaded.created_at);

    db.close().await;
}

#[tokio::test]
async fn test_update_unknown_task_is_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db
        .update(
            crate::types::TaskId::new(),
            &TaskUpdate::status(TaskStatus::Error),
        )
        .await;

    assert!(
        matches!(
            result,
            Err(crate::Error::Database(crate::error::DatabaseError::NotFound(_)))
        ),
        "updating a missing row must fail loudly, got {result:?}"
    );

    db.close().await;
}

#[tokio::test]
async fn test_find_unfinished_excludes_terminal_tasks_in_creation_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mut tasks = Vec::new();
    for (i, status) in [
        TaskStatus::Pending,
        TaskStatus::Complete,
        TaskStatus::Downloading,
        TaskStatus::Error,
        TaskStatus::Processing,
        TaskStatus::Cancelled,
    ]
    .into_iter()
    .enumerate()
    {
        let mut task = sample_task(&format!("https://youtu.be/{i}"));
        task.created_at += chrono::Duration::seconds(i as i64);
        task.status = status;
        db.insert(&task).await.unwrap();
        tasks.push(task);
    }

    let unfinished = db.find_unfinished().await.unwrap();
    let ids: Vec<_> = unfinished.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![tasks[0].id, tasks[2].id, tasks[4].id]);

    db.close().await;
}
