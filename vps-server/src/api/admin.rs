//! 管理端路由
//!
//! 所有接口需要 [`AdminUser`]；变更类接口再按权限细分
//! (`orders:approve`, `orders:manage`, `wallet:manage`, `settings:manage`)。
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/v1/admin/orders | GET | 订单列表 |
//! | /api/v1/admin/orders/{id} | GET | 订单详情 |
//! | /api/v1/admin/orders/{id}/approve | POST | 审批通过 |
//! | /api/v1/admin/orders/{id}/reject | POST | 驳回 |
//! | /api/v1/admin/orders/{id}/mark-paid | POST | 标记已付款 |
//! | /api/v1/admin/orders/{id}/retry | POST | 重试开通 |
//! | /api/v1/admin/wallet-orders | GET | 钱包单 |
//! | /api/v1/admin/wallet-orders/{id}/approve | POST | 钱包单通过 |
//! | /api/v1/admin/wallet-orders/{id}/reject | POST | 钱包单驳回 |
//! | /api/v1/admin/wallets/{user_id}/adjust | POST | 调整余额 |
//! | /api/v1/admin/payment-providers | GET | 支付渠道 |
//! | /api/v1/admin/payment-providers/{key} | PUT | 更新支付渠道 |
//! | /api/v1/admin/settings | GET | 设置 |
//! | /api/v1/admin/settings/{key} | GET/PUT | 单项设置 |
//! | /api/v1/admin/audit-logs | GET | 审计日志 |
//! | /api/v1/admin/automation-logs | GET | 自动化调用日志 |
//! | /api/v1/admin/provision/run | POST | 立即执行一次 watchdog |
//! | /api/v1/admin/tasks/{key}/runs | GET | 定时任务历史 |
//! | /api/v1/admin/vps/{id} | DELETE | 删除实例 |
//! | /api/v1/admin/vps/{id}/admin-status | POST | 锁定 / 解锁实例 |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::models::{
    AdminAuditLog, AdminStatus, AutomationLog, Order, OrderDetail, OrderStatus, ScheduledTaskRun, Setting,
    VpsInstance, WalletOrder, WalletOrderStatus,
};
use shared::{AppError, AppResult};

use crate::audit::action;
use crate::auth::AdminUser;
use crate::core::ServerState;
use crate::db::repository::automation_log;
use crate::orders::service::page;
use crate::orders::{ApprovedBy, WatchdogReport};
use crate::payment::ProviderInfo;
use crate::scheduler::TaskKey;

const SETTING_KEY_MAX: usize = 128;
const SETTING_VALUE_MAX: usize = 64 * 1024;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/v1/admin", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/{id}", get(order_detail))
        .route("/orders/{id}/approve", post(approve_order))
        .route("/orders/{id}/reject", post(reject_order))
        .route("/orders/{id}/mark-paid", post(mark_paid))
        .route("/orders/{id}/retry", post(retry_order))
        .route("/wallet-orders", get(list_wallet_orders))
        .route("/wallet-orders/{id}/approve", post(approve_wallet_order))
        .route("/wallet-orders/{id}/reject", post(reject_wallet_order))
        .route("/wallets/{user_id}/adjust", post(adjust_wallet))
        .route("/payment-providers", get(list_providers))
        .route("/payment-providers/{key}", put(update_provider))
        .route("/settings", get(list_settings))
        .route("/settings/{key}", get(get_setting).put(put_setting))
        .route("/audit-logs", get(audit_logs))
        .route("/automation-logs", get(automation_logs))
        .route("/provision/run", post(run_watchdog))
        .route("/tasks/{key}/runs", get(task_runs))
        .route("/vps/{id}", delete(delete_vps))
        .route("/vps/{id}/admin-status", post(set_admin_status))
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletOrderListQuery {
    pub status: Option<WalletOrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub amount: i64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub user_id: i64,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct ProviderUpdate {
    pub enabled: bool,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Deserialize)]
pub struct SettingUpdate {
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutomationLogQuery {
    pub order_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdminStatusRequest {
    pub status: AdminStatus,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteVpsResponse {
    pub vps_id: i64,
    pub refund: Option<WalletOrder>,
}

// ========== Orders ==========

async fn list_orders(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(q): Query<OrderListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.orders.list_orders(q.status, limit, offset).await?))
}

async fn order_detail(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(state.orders.order_detail(id).await?))
}

async fn approve_order(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Order>> {
    admin.require("orders:approve")?;
    Ok(Json(state.orders.approve_order(id, ApprovedBy::Admin(admin.id())).await?))
}

async fn reject_order(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> AppResult<Json<Order>> {
    admin.require("orders:approve")?;
    Ok(Json(state.orders.reject_order(admin.id(), id, req.reason.trim()).await?))
}

async fn mark_paid(State(state): State<ServerState>, admin: AdminUser, Path(id): Path<i64>) -> AppResult<Json<Order>> {
    admin.require("orders:approve")?;
    Ok(Json(state.orders.mark_paid(admin.id(), id).await?))
}

async fn retry_order(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Order>> {
    admin.require("orders:manage")?;
    Ok(Json(state.orders.retry_provision(admin.id(), id).await?))
}

async fn run_watchdog(State(state): State<ServerState>, admin: AdminUser) -> AppResult<Json<WatchdogReport>> {
    admin.require("orders:manage")?;
    Ok(Json(state.orders.run_watchdog_once().await?))
}

async fn delete_vps(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<DeleteVpsResponse>> {
    admin.require("orders:manage")?;
    let refund = state.orders.admin_delete_instance(admin.id(), id).await?;
    Ok(Json(DeleteVpsResponse { vps_id: id, refund }))
}

async fn set_admin_status(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<AdminStatusRequest>,
) -> AppResult<Json<VpsInstance>> {
    admin.require("orders:manage")?;
    let vps = state.orders.set_admin_status(admin.id(), id, req.status, &req.reason).await?;
    Ok(Json(vps))
}

// ========== Wallet ==========

async fn list_wallet_orders(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(q): Query<WalletOrderListQuery>,
) -> AppResult<Json<Vec<WalletOrder>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.wallet.list_orders(q.status, limit, offset).await?))
}

async fn approve_wallet_order(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<WalletOrder>> {
    admin.require("wallet:manage")?;
    Ok(Json(state.wallet.approve_order(id, ApprovedBy::Admin(admin.id())).await?))
}

async fn reject_wallet_order(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> AppResult<Json<WalletOrder>> {
    admin.require("wallet:manage")?;
    Ok(Json(state.wallet.reject_order(id, admin.id(), &req.reason).await?))
}

async fn adjust_wallet(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(user_id): Path<i64>,
    Json(req): Json<AdjustRequest>,
) -> AppResult<Json<AdjustResponse>> {
    admin.require("wallet:manage")?;
    let balance = state.wallet.admin_adjust(admin.id(), user_id, req.amount, &req.note).await?;
    Ok(Json(AdjustResponse { user_id, balance }))
}

// ========== Payment providers ==========

async fn list_providers(State(state): State<ServerState>, _admin: AdminUser) -> AppResult<Json<Vec<ProviderInfo>>> {
    Ok(Json(state.payments.registry().list_providers().await?))
}

async fn update_provider(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(key): Path<String>,
    Json(req): Json<ProviderUpdate>,
) -> AppResult<Json<ProviderInfo>> {
    admin.require("settings:manage")?;
    let config = if req.config.is_null() { json!({}) } else { req.config };
    let info = state
        .payments
        .registry()
        .update_provider(admin.id(), &key, req.enabled, config)
        .await?;
    Ok(Json(info))
}

// ========== Settings ==========

async fn list_settings(State(state): State<ServerState>, _admin: AdminUser) -> AppResult<Json<Vec<Setting>>> {
    Ok(Json(state.ctx.settings.list().await?))
}

async fn get_setting(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Path(key): Path<String>,
) -> AppResult<Json<Value>> {
    let value = state
        .ctx
        .settings
        .raw(&key)
        .await
        .ok_or_else(|| AppError::not_found(format!("setting {key}")))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

async fn put_setting(
    State(state): State<ServerState>,
    admin: AdminUser,
    Path(key): Path<String>,
    Json(req): Json<SettingUpdate>,
) -> AppResult<Json<Value>> {
    admin.require("settings:manage")?;
    let key = key.trim().to_string();
    if key.is_empty() || key.len() > SETTING_KEY_MAX {
        return Err(AppError::validation("invalid setting key"));
    }
    if req.value.len() > SETTING_VALUE_MAX {
        return Err(AppError::validation("setting value too long"));
    }
    let before = state.ctx.settings.raw(&key).await;
    state.ctx.settings.set(&key, &req.value, state.ctx.now()).await?;
    state
        .ctx
        .audit
        .record(
            admin.id(),
            action::SETTING_UPDATE,
            "setting",
            &key,
            json!({ "before": before, "after": req.value }),
        )
        .await;
    Ok(Json(json!({ "key": key, "value": req.value })))
}

// ========== Logs ==========

async fn audit_logs(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(q): Query<AuditQuery>,
) -> AppResult<Json<Vec<AdminAuditLog>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(state.ctx.audit.list(q.action.as_deref(), limit, offset).await?))
}

async fn automation_logs(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(q): Query<AutomationLogQuery>,
) -> AppResult<Json<Vec<AutomationLog>>> {
    let (limit, offset) = page(q.limit, q.offset);
    Ok(Json(automation_log::list(&state.ctx.pool, q.order_id, limit, offset).await?))
}

async fn task_runs(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Path(key): Path<String>,
    Query(q): Query<RunsQuery>,
) -> AppResult<Json<Vec<ScheduledTaskRun>>> {
    let key = TaskKey::parse(&key).ok_or_else(|| AppError::not_found(format!("task {key}")))?;
    let (limit, _) = page(q.limit, None);
    Ok(Json(state.scheduler.history(key, limit).await?))
}
