//! Postgres backing store. Needs `DATABASE_URL`; run with `--ignored`.

use serde_json::json;
use sqlx::PgPool;
use stockdesk::application::repos::{ProviderCacheRepo, UpsertCacheRowParams};
use stockdesk::infra::db::PostgresRepositories;
use time::OffsetDateTime;
use time::macros::datetime;

fn params<'a>(
    data_type: &'a str,
    key: &'a str,
    payload: serde_json::Value,
    updated_at: OffsetDateTime,
    max_expires_at: OffsetDateTime,
) -> UpsertCacheRowParams<'a> {
    UpsertCacheRowParams {
        data_type,
        key,
        payload,
        updated_at,
        max_expires_at,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres database"]
async fn upsert_is_last_write_wins(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    repos
        .upsert_row(params(
            "quote",
            "AAPL",
            json!({ "price": 1.0 }),
            datetime!(2024-01-08 15:00 UTC),
            datetime!(2024-01-08 15:06 UTC),
        ))
        .await
        .expect("first write");
    repos
        .upsert_row(params(
            "quote",
            "AAPL",
            json!({ "price": 2.0 }),
            datetime!(2024-01-08 15:01 UTC),
            datetime!(2024-01-08 15:07 UTC),
        ))
        .await
        .expect("second write");

    let row = repos
        .get_row("quote", "AAPL")
        .await
        .expect("read")
        .expect("row present");
    assert_eq!(row.payload, json!({ "price": 2.0 }));
    assert_eq!(row.updated_at, datetime!(2024-01-08 15:01 UTC));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres database"]
async fn late_older_write_keeps_newer_row(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    repos
        .upsert_row(params(
            "quote",
            "AAPL",
            json!({ "v": "new" }),
            datetime!(2024-01-08 15:05 UTC),
            datetime!(2024-01-08 15:11 UTC),
        ))
        .await
        .expect("newer write");
    repos
        .upsert_row(params(
            "quote",
            "AAPL",
            json!({ "v": "old" }),
            datetime!(2024-01-08 15:00 UTC),
            datetime!(2024-01-08 15:06 UTC),
        ))
        .await
        .expect("older write is ignored without error");

    let row = repos
        .get_row("quote", "AAPL")
        .await
        .expect("read")
        .expect("row present");
    assert_eq!(row.payload, json!({ "v": "new" }));
    assert_eq!(row.updated_at, datetime!(2024-01-08 15:05 UTC));

    let purged = repos
        .purge_expired(datetime!(2024-01-08 15:08 UTC))
        .await
        .expect("purge");
    assert_eq!(purged, 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres database"]
async fn rows_are_keyed_by_data_type_and_key(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    repos
        .upsert_row(params(
            "quote",
            "AAPL",
            json!({}),
            datetime!(2024-01-08 15:00 UTC),
            datetime!(2024-01-08 15:06 UTC),
        ))
        .await
        .expect("write");

    assert!(repos.get_row("profile", "AAPL").await.expect("read").is_none());
    assert!(repos.get_row("quote", "MSFT").await.expect("read").is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres database"]
async fn delete_and_purge(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    for (key, expires) in [
        ("AAPL", datetime!(2024-01-08 15:06 UTC)),
        ("MSFT", datetime!(2024-01-08 21:00 UTC)),
        ("TSLA", datetime!(2024-01-08 21:00 UTC)),
    ] {
        repos
            .upsert_row(params(
                "quote",
                key,
                json!({ "symbol": key }),
                datetime!(2024-01-08 15:00 UTC),
                expires,
            ))
            .await
            .expect("write");
    }

    repos.delete_row("quote", "TSLA").await.expect("delete");
    repos
        .delete_row("quote", "TSLA")
        .await
        .expect("deleting an absent row is ok");

    let purged = repos
        .purge_expired(datetime!(2024-01-08 16:00 UTC))
        .await
        .expect("purge");
    assert_eq!(purged, 1);
    assert!(repos.get_row("quote", "AAPL").await.expect("read").is_none());
    assert!(repos.get_row("quote", "MSFT").await.expect("read").is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres database"]
async fn health_check_succeeds(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    repos.health_check().await.expect("database reachable");
}
