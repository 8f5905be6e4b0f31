//! Wallet Repository (balance + append-only ledger)

use super::RepoResult;
use shared::models::{TransactionType, Wallet, WalletTransaction};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Result of a ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// Balance moved and a ledger row was written
    Applied { balance: i64 },
    /// A ledger row with the same `(user, ref_type, ref_id)` already exists
    AlreadyApplied { balance: i64 },
    /// Debit would take the balance below zero; nothing written
    Insufficient { balance: i64 },
}

pub async fn find<'e>(ex: impl SqliteExecutor<'e>, user_id: i64) -> RepoResult<Option<Wallet>> {
    let row = sqlx::query_as::<_, Wallet>("SELECT user_id, balance, updated_at FROM wallet WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn balance<'e>(ex: impl SqliteExecutor<'e>, user_id: i64) -> RepoResult<i64> {
    let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM wallet WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(ex)
        .await?;
    Ok(balance.unwrap_or(0))
}

pub async fn count_transactions<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    ref_type: &str,
    ref_id: i64,
) -> RepoResult<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM wallet_transaction WHERE user_id = ? AND ref_type = ? AND ref_id = ?",
    )
    .bind(user_id)
    .bind(ref_type)
    .bind(ref_id)
    .fetch_one(ex)
    .await?;
    Ok(n)
}

pub async fn list_transactions<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<WalletTransaction>> {
    let rows = sqlx::query_as::<_, WalletTransaction>(
        "SELECT id, user_id, amount, tx_type, ref_type, ref_id, note, created_at FROM wallet_transaction WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

/// Next free `ref_id` for ledger refs that have no natural key (admin adjustments)
pub async fn next_ref_id<'e>(ex: impl SqliteExecutor<'e>, user_id: i64, ref_type: &str) -> RepoResult<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(ref_id), 0) + 1 FROM wallet_transaction WHERE user_id = ? AND ref_type = ?",
    )
    .bind(user_id)
    .bind(ref_type)
    .fetch_one(ex)
    .await?;
    Ok(n)
}

/// Apply a signed amount to the balance and append the ledger row.
///
/// Must run inside a transaction. The ledger row is claimed first so a
/// concurrent writer with the same `(user, ref_type, ref_id)` sees
/// `AlreadyApplied` instead of a unique-key error.
#[allow(clippy::too_many_arguments)]
pub async fn adjust(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: i64,
    tx_type: TransactionType,
    ref_type: &str,
    ref_id: i64,
    note: &str,
    now: i64,
) -> RepoResult<AdjustOutcome> {
    let claimed = sqlx::query(
        "INSERT INTO wallet_transaction (user_id, amount, tx_type, ref_type, ref_id, note, created_at) VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, ref_type, ref_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(amount)
    .bind(tx_type)
    .bind(ref_type)
    .bind(ref_id)
    .bind(note)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    if claimed.rows_affected() == 0 {
        let balance = balance(&mut *conn, user_id).await?;
        return Ok(AdjustOutcome::AlreadyApplied { balance });
    }

    sqlx::query("INSERT OR IGNORE INTO wallet (user_id, balance, updated_at) VALUES (?, 0, ?)")
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let rows = sqlx::query(
        "UPDATE wallet SET balance = balance + ?1, updated_at = ?2 WHERE user_id = ?3 AND balance + ?1 >= 0",
    )
    .bind(amount)
    .bind(now)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    if rows.rows_affected() == 0 {
        sqlx::query("DELETE FROM wallet_transaction WHERE user_id = ? AND ref_type = ? AND ref_id = ?")
            .bind(user_id)
            .bind(ref_type)
            .bind(ref_id)
            .execute(&mut *conn)
            .await?;
        let balance = balance(&mut *conn, user_id).await?;
        return Ok(AdjustOutcome::Insufficient { balance });
    }

    let balance = balance(&mut *conn, user_id).await?;
    Ok(AdjustOutcome::Applied { balance })
}
