//! 钱包路由 (用户端)
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/v1/wallet | GET | 余额 |
//! | /api/v1/wallet/transactions | GET | 流水 |
//! | /api/v1/wallet/orders | GET | 钱包单 |
//! | /api/v1/wallet/recharge | POST | 充值申请 |
//! | /api/v1/wallet/withdraw | POST | 提现申请 |
//! | /api/v1/wallet/refund | POST | 按实例退款 |

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use shared::AppResult;
use shared::models::{WalletOrder, WalletTransaction};

use super::PageQuery;
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::orders::service::page;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/v1", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/wallet", get(balance))
        .route("/wallet/transactions", get(transactions))
        .route("/wallet/orders", get(orders))
        .route("/wallet/recharge", post(recharge))
        .route("/wallet/withdraw", post(withdraw))
        .route("/wallet/refund", post(refund))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub vps_id: i64,
    #[serde(default)]
    pub reason: String,
}

async fn balance(State(state): State<ServerState>, user: CurrentUser) -> AppResult<Json<BalanceResponse>> {
    let balance = state.wallet.balance(user.id).await?;
    Ok(Json(BalanceResponse {
        user_id: user.id,
        balance,
    }))
}

async fn transactions(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<WalletTransaction>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.wallet.transactions(user.id, limit, offset).await?))
}

async fn orders(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<WalletOrder>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.wallet.user_orders(user.id, limit, offset).await?))
}

async fn recharge(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<AmountRequest>,
) -> AppResult<Json<WalletOrder>> {
    Ok(Json(state.wallet.request_recharge(user.id, req.amount, req.note.as_deref()).await?))
}

async fn withdraw(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<AmountRequest>,
) -> AppResult<Json<WalletOrder>> {
    Ok(Json(state.wallet.request_withdraw(user.id, req.amount, req.note.as_deref()).await?))
}

async fn refund(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<RefundRequest>,
) -> AppResult<Json<WalletOrder>> {
    Ok(Json(state.wallet.request_refund(user.id, req.vps_id, &req.reason).await?))
}
