//! 订单路由 (用户端)
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/v1/cart | GET/POST | 购物车 |
//! | /api/v1/cart/{id} | DELETE | 移除购物车条目 |
//! | /api/v1/orders | GET/POST | 订单列表 / 从购物车下单 |
//! | /api/v1/orders/items | POST | 直接下单 |
//! | /api/v1/orders/{id} | GET | 订单详情 |
//! | /api/v1/orders/{id}/events | GET | 订单事件 |
//! | /api/v1/orders/{id}/cancel | POST | 取消 |
//! | /api/v1/orders/{id}/refresh | POST | 手动同步上游状态 |
//! | /api/v1/orders/renew | POST | 续费 |
//! | /api/v1/orders/emergency-renew | POST | 紧急续费 |
//! | /api/v1/orders/resize/quote | POST | 变配报价 |
//! | /api/v1/orders/resize | POST | 变配 |
//! | /api/v1/orders/refund | POST | 退款 |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
};
use serde::Deserialize;
use shared::AppResult;
use shared::models::{CartItem, Order, OrderDetail, OrderEvent};

use super::{PageQuery, idempotency_key};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::orders::builder::OrderLine;
use crate::orders::service::page;
use crate::orders::{ResizeQuote, ResizeRequest};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/v1", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/cart", get(cart).post(add_to_cart))
        .route("/cart/{id}", delete(remove_from_cart))
        .route("/orders", get(list).post(create_from_cart))
        .route("/orders/items", post(create_from_items))
        .route("/orders/renew", post(renew))
        .route("/orders/emergency-renew", post(emergency_renew))
        .route("/orders/resize/quote", post(resize_quote))
        .route("/orders/resize", post(resize))
        .route("/orders/refund", post(refund))
        .route("/orders/{id}", get(detail))
        .route("/orders/{id}/events", get(events))
        .route("/orders/{id}/cancel", post(cancel))
        .route("/orders/{id}/refresh", post(refresh))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderRequest {
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemsRequest {
    pub items: Vec<OrderLine>,
    pub currency: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub vps_id: i64,
    pub renew_days: Option<i64>,
    pub duration_months: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct VpsRequest {
    pub vps_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub vps_id: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after_seq: i64,
}

async fn cart(State(state): State<ServerState>, user: CurrentUser) -> AppResult<Json<Vec<CartItem>>> {
    Ok(Json(state.orders.cart(user.id).await?))
}

async fn add_to_cart(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(line): Json<OrderLine>,
) -> AppResult<Json<Vec<CartItem>>> {
    Ok(Json(state.orders.add_to_cart(user.id, &line).await?))
}

async fn remove_from_cart(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.orders.remove_from_cart(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.orders.list_user_orders(user.id, limit, offset).await?))
}

async fn create_from_cart(
    State(state): State<ServerState>,
    user: CurrentUser,
    headers: HeaderMap,
    body: Option<Json<CreateOrderRequest>>,
) -> AppResult<Json<OrderDetail>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let key = idempotency_key(&headers, req.idempotency_key.as_deref());
    let detail = state
        .orders
        .create_from_cart(user.id, req.currency.as_deref(), key.as_deref())
        .await?;
    Ok(Json(detail))
}

async fn create_from_items(
    State(state): State<ServerState>,
    user: CurrentUser,
    headers: HeaderMap,
    Json(req): Json<CreateItemsRequest>,
) -> AppResult<Json<OrderDetail>> {
    let key = idempotency_key(&headers, req.idempotency_key.as_deref());
    let detail = state
        .orders
        .create_from_items(user.id, &req.items, req.currency.as_deref(), key.as_deref())
        .await?;
    Ok(Json(detail))
}

async fn detail(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.user_order(user.id, id).await?))
}

async fn events(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Query(q): Query<EventsQuery>,
) -> AppResult<Json<Vec<OrderEvent>>> {
    Ok(Json(state.orders.user_events(user.id, id, q.after_seq).await?))
}

async fn cancel(State(state): State<ServerState>, user: CurrentUser, Path(id): Path<i64>) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.cancel_order(user.id, id).await?))
}

async fn refresh(State(state): State<ServerState>, user: CurrentUser, Path(id): Path<i64>) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.refresh_order(user.id, id).await?))
}

async fn renew(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<RenewRequest>,
) -> AppResult<Json<Order>> {
    let order = state
        .orders
        .create_renew_order(user.id, req.vps_id, req.renew_days, req.duration_months)
        .await?;
    Ok(Json(order))
}

async fn emergency_renew(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<VpsRequest>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.create_emergency_renew_order(user.id, req.vps_id).await?))
}

async fn resize_quote(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<ResizeRequest>,
) -> AppResult<Json<ResizeQuote>> {
    Ok(Json(state.orders.quote_resize_order(user.id, &req).await?))
}

async fn resize(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<ResizeRequest>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.create_resize_order(user.id, &req).await?))
}

async fn refund(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(req): Json<RefundRequest>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.create_refund_order(user.id, req.vps_id, &req.reason).await?))
}
