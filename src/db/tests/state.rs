use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_fresh_database_reports_unclean_shutdown() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "no recorded shutdown counts as unclean"
    );

    db.close().await;
}

#[tokio::test]
async fn test_clean_start_then_shutdown_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.set_clean_shutdown().await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_crash_is_detected_on_next_session() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_clean_start().await.unwrap();
        // No set_clean_shutdown(): simulated crash
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn test_trait_methods_delegate_to_database() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let store: &dyn TaskStore = &db;

    store.set_clean_start().await.unwrap();
    store.set_clean_shutdown().await.unwrap();
    assert!(!store.was_unclean_shutdown().await.unwrap());

    db.close().await;
}
