#![cfg(feature = "integration-tests")]

use chrono::Utc;
use common::domain::{
    DomainError, EnvelopeSource, ProcessedLogKey, ProcessedLogRepository, ProcessingRecord,
    ProcessingStatus,
};
use common::postgres::{PostgresClient, PostgresConfig, PostgresProcessedLogRepository};
use goose::MigrationRunner;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresProcessedLogRepository) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let config = PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
        migrations_dir: format!("{}/../../migrations/postgres", env!("CARGO_MANIFEST_DIR")),
        goose_binary_path: "goose".to_string(),
    };

    MigrationRunner::new(
        config.goose_binary_path.clone(),
        config.migrations_dir.clone(),
        "postgres",
        config.goose_dsn(),
    )
    .run_migrations()
    .await
    .expect("migrations failed");

    let client = PostgresClient::new(&config).expect("failed to create client");
    (postgres, PostgresProcessedLogRepository::new(client))
}

fn record(tenant_id: &str, log_id: &str, text: &str) -> ProcessingRecord {
    ProcessingRecord {
        tenant_id: tenant_id.to_string(),
        log_id: log_id.to_string(),
        text: text.to_string(),
        source: EnvelopeSource::TextUpload,
        received_at: Utc::now(),
        modified_text: text.to_uppercase(),
        char_count: text.chars().count() as i64,
        processed_at: Utc::now(),
        status: ProcessingStatus::Ok,
    }
}

#[tokio::test]
async fn test_create_and_get_processed_log() {
    let (_container, repo) = setup_test_db().await;

    repo.create_processed_log(&record("acme", "t-1", "hello"))
        .await
        .unwrap();

    let stored = repo
        .get_processed_log(&ProcessedLogKey::new("acme", "t-1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.text, "hello");
    assert_eq!(stored.modified_text, "HELLO");
    assert_eq!(stored.char_count, 5);
    assert_eq!(stored.source, EnvelopeSource::TextUpload);
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let (_container, repo) = setup_test_db().await;

    let stored = repo
        .get_processed_log(&ProcessedLogKey::new("acme", "missing"))
        .await
        .unwrap();

    assert!(stored.is_none());
}

#[tokio::test]
async fn test_duplicate_create_reports_already_exists() {
    let (_container, repo) = setup_test_db().await;

    repo.create_processed_log(&record("acme", "t-1", "hello"))
        .await
        .unwrap();
    let result = repo
        .create_processed_log(&record("acme", "t-1", "other"))
        .await;

    assert!(matches!(
        result,
        Err(DomainError::ProcessedLogAlreadyExists(path)) if path == "tenants/acme/processed_logs/t-1"
    ));

    let stored = repo
        .get_processed_log(&ProcessedLogKey::new("acme", "t-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.text, "hello");
}

#[tokio::test]
async fn test_same_log_id_across_tenants_is_independent() {
    let (_container, repo) = setup_test_db().await;

    repo.create_processed_log(&record("acme", "t-1", "a"))
        .await
        .unwrap();
    repo.create_processed_log(&record("beta", "t-1", "b"))
        .await
        .unwrap();

    let beta = repo
        .get_processed_log(&ProcessedLogKey::new("beta", "t-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(beta.text, "b");
}

#[tokio::test]
async fn test_concurrent_creates_commit_once() {
    let (_container, repo) = setup_test_db().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.create_processed_log(&record("acme", "race", "x")).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_text_the_store_cannot_hold_is_a_permanent_defect() {
    let (_container, repo) = setup_test_db().await;

    let result = repo
        .create_processed_log(&record("acme", "t-nul", "bad\0byte"))
        .await;

    assert!(matches!(result, Err(DomainError::PermanentProcessingDefect(_))));
    assert!(result.unwrap_err().is_permanent());

    let stored = repo
        .get_processed_log(&ProcessedLogKey::new("acme", "t-nul"))
        .await
        .unwrap();
    assert!(stored.is_none());
}
