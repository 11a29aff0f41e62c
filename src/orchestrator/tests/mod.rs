
use crate::error::{Error, TaskError};
use crate::hub::Connection;
use crate::strategy::{Platform, Strategy};
use crate::test_helpers::{Harness, RecordingConnection, ScriptedStrategy, Step};
use crate::types::{
    AudioQuality, HubMessage, Metadata, ProgressEvent, Task, TaskId, TaskStatus, TaskUpdate,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Semaphore;

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

fn shared(strategy: ScriptedStrategy) -> Arc<ScriptedStrategy> {
    Arc::new(strategy)
}

fn as_dyn(strategies: &[&Arc<ScriptedStrategy>]) -> Vec<Arc<dyn Strategy>> {
    strategies
        .iter()
        .map(|s| Arc::clone(*s) as Arc<dyn Strategy>)
        .collect()
}

/// Script that blocks on `gate` before emitting progress and writing output
fn gated_script(gate: &Arc<Semaphore>) -> Vec<Step> {
    vec![
        Step::Wait(Arc::clone(gate)),
        Step::Emit(ProgressEvent::downloading(10.0)),
        Step::Emit(ProgressEvent::downloading(50.0)),
        Step::WriteOutput(b"audio bytes".to_vec()),
        Step::Emit(ProgressEvent::complete()),
    ]
}

/// Poll the store until `id` has `status`
async fn wait_for_status(harness: &Harness, id: TaskId, status: TaskStatus) -> Task {
    for _ in 0..500 {
        if let Some(task) = harness.store.get(id)
            && task.status == status
        {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {status}: {:?}", harness.store.get(id));
}

/// Poll until `condition` holds
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn observe(harness: &Harness, id: TaskId) -> Arc<RecordingConnection> {
    let conn = RecordingConnection::new();
    assert!(
        harness
            .hub
            .register(Arc::clone(&conn) as Arc<dyn Connection>, id)
            .await
    );
    conn
}
