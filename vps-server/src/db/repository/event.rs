//! Order Event Repository

use super::RepoResult;
use shared::models::OrderEvent;
use sqlx::SqliteExecutor;

/// Append an event with the next per-order sequence number
pub async fn append<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    event_type: &str,
    data_json: &str,
    now: i64,
) -> RepoResult<OrderEvent> {
    let row = sqlx::query_as::<_, OrderEvent>(
        "INSERT INTO order_event (order_id, seq, event_type, data_json, created_at) \
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM order_event WHERE order_id = ?1), ?2, ?3, ?4) \
         RETURNING id, order_id, seq, event_type, data_json, created_at",
    )
    .bind(order_id)
    .bind(event_type)
    .bind(data_json)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(row)
}

pub async fn list_by_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    after_seq: i64,
) -> RepoResult<Vec<OrderEvent>> {
    let rows = sqlx::query_as::<_, OrderEvent>(
        "SELECT id, order_id, seq, event_type, data_json, created_at FROM order_event WHERE order_id = ? AND seq > ? ORDER BY seq",
    )
    .bind(order_id)
    .bind(after_seq)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}
