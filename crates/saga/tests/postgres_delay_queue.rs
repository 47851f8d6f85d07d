//! PostgreSQL delay queue tests.
//!
//! ```bash
//! cargo test -p saga --test postgres_delay_queue -- --test-threads=1
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::AggregateId;
use event_store::Version;
use messaging::Message;
use saga::{DelayScheduler, DelayedEntry, PostgresDelayQueue};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_test_pool() -> PgPool {
    let info = CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/004_create_delayed_messages_table.sql"
            ))
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE delayed_messages")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

fn entry(offset_secs: i64) -> DelayedEntry {
    let cart_id = AggregateId::new();
    DelayedEntry {
        topic: "cart-abandonment-check".to_string(),
        key: cart_id.to_string(),
        message: Message::new(
            "CheckCartAbandonmentCommand",
            serde_json::json!({"cart_id": cart_id}),
            cart_id,
            Version::new(2),
        ),
        execute_at: Utc::now() + Duration::seconds(offset_secs),
    }
}

#[tokio::test]
async fn due_entries_are_taken_once_in_order() {
    let queue = PostgresDelayQueue::new(get_test_pool().await);
    let late = entry(3600);
    let first = entry(-20);
    let second = entry(-10);
    for e in [late.clone(), second.clone(), first.clone()] {
        queue.schedule(e).await.unwrap();
    }
    assert_eq!(queue.pending_count().await.unwrap(), 3);

    let due = queue.take_due(Utc::now(), 10).await.unwrap();
    let ids: Vec<_> = due.iter().map(|e| e.message.id).collect();
    assert_eq!(ids, vec![first.message.id, second.message.id]);
    assert_eq!(due[0].message, first.message);
    assert_eq!(due[0].key, first.key);

    assert!(queue.take_due(Utc::now(), 10).await.unwrap().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_message_ids_are_ignored() {
    let queue = PostgresDelayQueue::new(get_test_pool().await);
    let e = entry(-1);
    assert!(queue.schedule(e.clone()).await.unwrap());
    assert!(!queue.schedule(e).await.unwrap());
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn taken_entries_stay_until_completed() {
    let queue = PostgresDelayQueue::new(get_test_pool().await)
        .with_lease(std::time::Duration::from_millis(200));
    let e = entry(-1);
    queue.schedule(e.clone()).await.unwrap();

    assert_eq!(queue.take_due(Utc::now(), 10).await.unwrap().len(), 1);
    assert!(queue.take_due(Utc::now(), 10).await.unwrap().is_empty());
    // Still queued while leased, so the id cannot be scheduled twice.
    assert!(!queue.schedule(e.clone()).await.unwrap());

    // A sweeper that never completes loses its lease.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let again = queue.take_due(Utc::now(), 10).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].message.id, e.message.id);

    queue.complete(e.message.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(queue.take_due(Utc::now(), 10).await.unwrap().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_at_releases_the_lease() {
    let queue = PostgresDelayQueue::new(get_test_pool().await);
    let e = entry(-1);
    queue.schedule(e.clone()).await.unwrap();
    queue.take_due(Utc::now(), 10).await.unwrap();
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    let retry = Utc::now() + Duration::seconds(60);
    queue.retry_at(e.message.id, retry).await.unwrap();
    assert_eq!(queue.pending_count().await.unwrap(), 1);
    assert!(queue.take_due(Utc::now(), 10).await.unwrap().is_empty());

    let due = queue
        .take_due(retry + Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].message.id, e.message.id);
}

#[tokio::test]
async fn concurrent_sweepers_never_share_entries() {
    let pool = get_test_pool().await;
    let queue = PostgresDelayQueue::new(pool);
    for _ in 0..50 {
        queue.schedule(entry(-1)).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue.take_due(Utc::now(), 20).await.unwrap()
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for e in task.await.unwrap() {
            total += 1;
            seen.insert(e.message.id);
        }
    }
    assert_eq!(total, 50);
    assert_eq!(seen.len(), 50);
}
