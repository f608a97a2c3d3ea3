//! Postgres document store behaviour against a live database.
//!
//! These tests only run when `TEST_DATABASE_URL` points at a disposable database;
//! without it they return immediately. Each test writes to its own collection.

use futures::StreamExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;
use survey_sync_core::domain::{
    CollectionPath, DocumentChange, ProjectPayload, Row, SubjectId,
};
use survey_sync_core::ports::{ChangeStream, DocumentStore, PortError};
use sync_server_lib::adapters::PgDocumentStore;
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

async fn store_with_pool(max_connections: u32, application_name: &str) -> Option<PgDocumentStore> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping Postgres store test");
        return None;
    };
    let options = url
        .parse::<PgConnectOptions>()
        .expect("TEST_DATABASE_URL is not a valid Postgres URL")
        .application_name(application_name);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
        .expect("failed to connect to the test database");
    let store = PgDocumentStore::new(pool);
    store.run_migrations().await.expect("migrations failed");
    Some(store)
}

async fn store() -> Option<PgDocumentStore> {
    store_with_pool(5, "survey-sync-tests").await
}

fn fresh_collection() -> CollectionPath {
    CollectionPath::projects(&format!("pg-test-{}", Uuid::new_v4().simple()))
}

fn payload(title: &str, author: &str) -> ProjectPayload {
    ProjectPayload {
        tema_central: title.to_string(),
        acesso_rows: vec![Row {
            id: 1,
            variavel: "cpf".to_string(),
            problema: String::new(),
            detalhe: "mascarado".to_string(),
        }],
        qualidade_rows: vec![],
        author: SubjectId::new(author),
    }
}

async fn next_batch(changes: &mut ChangeStream) -> Vec<DocumentChange> {
    timeout(WAIT, changes.next())
        .await
        .expect("timed out waiting for a change batch")
        .expect("change stream ended")
        .expect("change stream failed")
}

#[tokio::test]
async fn many_subscribers_share_one_listener() {
    // Fewer pooled connections than subscribers.
    let Some(store) = store_with_pool(3, "survey-sync-tests").await else {
        return;
    };
    let collection = fresh_collection();
    let existing = store.create(&collection, &payload("Censo", "a")).await.unwrap();

    let mut subscribers = Vec::new();
    for _ in 0..8 {
        let mut changes = store.subscribe(&collection).await.unwrap();
        let initial = next_batch(&mut changes).await;
        assert!(matches!(
            initial.as_slice(),
            [DocumentChange::Upserted(project)] if project.id == existing
        ));
        subscribers.push(changes);
    }

    let created = store.create(&collection, &payload("Saúde", "b")).await.unwrap();
    for changes in subscribers.iter_mut() {
        let batch = next_batch(changes).await;
        assert!(matches!(
            batch.as_slice(),
            [DocumentChange::Upserted(project)] if project.id == created && project.tema_central == "Saúde"
        ));
    }
}

#[tokio::test]
async fn replace_and_delete_round_trip() {
    let Some(store) = store().await else {
        return;
    };
    let collection = fresh_collection();
    let id = store.create(&collection, &payload("ERP", "a")).await.unwrap();
    let created = store.get(&collection, &id).await.unwrap();

    store
        .replace(&collection, &id, &payload("ERP MIGRATION V2", "b"))
        .await
        .unwrap();
    let replaced = store.get(&collection, &id).await.unwrap();
    assert_eq!(replaced.tema_central, "ERP MIGRATION V2");
    assert_eq!(replaced.author, SubjectId::new("b"));
    assert!(replaced.updated_at >= created.updated_at);

    store.delete(&collection, &id).await.unwrap();
    assert!(matches!(store.get(&collection, &id).await, Err(PortError::NotFound(_))));
    // Deleting again is not an error.
    store.delete(&collection, &id).await.unwrap();

    // A replace after a delete writes the document back under the same id.
    store.replace(&collection, &id, &payload("ERP", "c")).await.unwrap();
    assert_eq!(store.get(&collection, &id).await.unwrap().author, SubjectId::new("c"));
}

#[tokio::test]
async fn replace_cannot_move_a_project_between_collections() {
    let Some(store) = store().await else {
        return;
    };
    let home = fresh_collection();
    let other = fresh_collection();
    let id = store.create(&home, &payload("Censo", "a")).await.unwrap();

    assert!(matches!(
        store.replace(&other, &id, &payload("Hijack", "b")).await,
        Err(PortError::Unauthorized)
    ));
    assert_eq!(store.get(&home, &id).await.unwrap().tema_central, "Censo");
}

#[tokio::test]
async fn subscriptions_only_see_their_collection() {
    let Some(store) = store().await else {
        return;
    };
    let watched = fresh_collection();
    let elsewhere = fresh_collection();
    let mut changes = store.subscribe(&watched).await.unwrap();
    assert!(next_batch(&mut changes).await.is_empty());

    store.create(&elsewhere, &payload("Outro", "a")).await.unwrap();
    let mine = store.create(&watched, &payload("Meu", "a")).await.unwrap();
    let batch = next_batch(&mut changes).await;
    assert!(matches!(
        batch.as_slice(),
        [DocumentChange::Upserted(project)] if project.id == mine
    ));

    store.delete(&watched, &mine).await.unwrap();
    let batch = next_batch(&mut changes).await;
    assert_eq!(batch, vec![DocumentChange::Removed(mine)]);
}

#[tokio::test]
async fn lost_listener_interrupts_subscribers_and_restarts() {
    let application_name = format!("survey-sync-relay-{}", Uuid::new_v4().simple());
    let Some(store) = store_with_pool(4, &application_name).await else {
        return;
    };
    let collection = fresh_collection();
    let mut changes = store.subscribe(&collection).await.unwrap();
    next_batch(&mut changes).await;

    let admin = sqlx::PgPool::connect(&std::env::var("TEST_DATABASE_URL").unwrap())
        .await
        .unwrap();
    let terminated: Vec<bool> = sqlx::query_scalar(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE application_name = $1 AND query LIKE 'LISTEN%'",
    )
    .bind(&application_name)
    .fetch_all(&admin)
    .await
    .unwrap();
    assert_eq!(terminated, vec![true]);

    let outcome = timeout(WAIT, changes.next())
        .await
        .expect("timed out waiting for the interruption");
    assert!(matches!(outcome, Some(Err(PortError::Unexpected(_)))));
    assert!(timeout(WAIT, changes.next()).await.unwrap().is_none());

    // The next subscription starts a new relay and sees new writes.
    let mut changes = store.subscribe(&collection).await.unwrap();
    next_batch(&mut changes).await;
    let id = store.create(&collection, &payload("Depois", "a")).await.unwrap();
    let batch = next_batch(&mut changes).await;
    assert!(matches!(
        batch.as_slice(),
        [DocumentChange::Upserted(project)] if project.id == id
    ));
}
