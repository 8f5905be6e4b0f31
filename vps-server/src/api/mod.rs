//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`orders`] - 购物车、订单、续费、变配、退款
//! - [`payments`] - 支付方式、支付提交、支付回调
//! - [`wallet`] - 钱包余额、流水、充值/提现/退款申请
//! - [`admin`] - 管理端（审批、钱包单、支付渠道、设置、审计）

pub mod admin;
pub mod health;
pub mod orders;
pub mod payments;
pub mod wallet;

use crate::core::ServerState;
use axum::Router;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const REQUEST_ID: &str = "x-request-id";
const IDEMPOTENCY_KEY: &str = "idempotency-key";
/// 并发限制：最多同时处理的请求数
const MAX_CONCURRENT_REQUESTS: usize = 256;

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Pagination query shared by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `Idempotency-Key` header, falling back to the body field
pub(crate) fn idempotency_key(headers: &HeaderMap, body: Option<&str>) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| body.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

/// All routes, no middleware
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(orders::router())
        .merge(payments::router())
        .merge(wallet::router())
        .merge(admin::router())
}

/// Routes with tower-http middleware and state applied
pub fn build_app(state: ServerState) -> Router {
    build_router()
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID)))
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID), XRequestId))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_static(" k-header "));
        assert_eq!(idempotency_key(&headers, Some("k-body")).as_deref(), Some("k-header"));
        assert_eq!(idempotency_key(&HeaderMap::new(), Some("k-body")).as_deref(), Some("k-body"));
        assert_eq!(idempotency_key(&HeaderMap::new(), Some("  ")), None);
    }
}
