//! 支付路由
//!
//! | 路径 | 方法 | 说明 | 认证 |
//! |------|------|------|------|
//! | /api/v1/payments/methods | GET | 可用支付方式 | 用户 |
//! | /api/v1/orders/{id}/payments | POST | 提交支付（余额/网关/凭证） | 用户 |
//! | /api/v1/orders/{id}/pay | POST | 选择支付方式 | 用户 |
//! | /api/v1/payments/notify/{provider} | GET/POST | 支付回调（签名校验） | 无 |

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::{get, post},
};
use serde::Deserialize;
use shared::{AppError, AppResult};
use std::collections::HashMap;

use super::idempotency_key;
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::payment::{PaymentOutcome, RawNotify, SubmitPayment, UserMethod};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/v1", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/payments/methods", get(methods))
        .route("/payments/notify/{provider}", get(notify).post(notify))
        .route("/orders/{id}/payments", post(submit))
        .route("/orders/{id}/pay", post(select))
}

#[derive(Debug, Deserialize)]
pub struct SelectPaymentRequest {
    pub method: String,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub idempotency_key: Option<String>,
}

async fn methods(State(state): State<ServerState>, user: CurrentUser) -> AppResult<Json<Vec<UserMethod>>> {
    Ok(Json(state.payments.user_methods(user.id).await?))
}

async fn submit(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SubmitPayment>,
) -> AppResult<Json<PaymentOutcome>> {
    let key = idempotency_key(&headers, None);
    Ok(Json(state.payments.submit_payment(user.id, id, &req, key.as_deref()).await?))
}

async fn select(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SelectPaymentRequest>,
) -> AppResult<Json<PaymentOutcome>> {
    let key = idempotency_key(&headers, req.idempotency_key.as_deref());
    let outcome = state
        .payments
        .select_payment(
            user.id,
            id,
            &req.method,
            req.return_url.as_deref(),
            req.notify_url.as_deref(),
            key.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

/// Raw body and query go to the provider untouched for signature checks
async fn notify(
    State(state): State<ServerState>,
    Path(provider): Path<String>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, String)> {
    let body = String::from_utf8(body.to_vec())
        .map_err(|_| AppError::invalid_request("notify body is not UTF-8"))?;
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let raw = RawNotify {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: query.unwrap_or_default(),
        headers,
        body,
    };
    let ack = state.payments.handle_notify(&provider, &raw).await?;
    Ok((StatusCode::OK, ack))
}
