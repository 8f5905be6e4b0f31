//! HTTP 层：路由、认证与管理员权限

mod common;

use axum::body::Body;
use common::*;
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use vps_server::api::build_app;

fn token(env: &TestEnv, user_id: i64, role: &str, permissions: &[&str]) -> String {
    let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
    env.state
        .jwt
        .generate_token(user_id, "tester", role, &permissions)
        .unwrap()
}

async fn call(env: &TestEnv, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = build_app(env.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let env = TestEnv::new().await;
    let (status, _) = call(&env, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_user_routes_require_token() {
    let env = TestEnv::new().await;
    let (status, _) = call(&env, "GET", "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&env, "GET", "/api/v1/orders", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = token(&env, USER, "user", &[]);
    let (status, _) = call(&env, "GET", "/api/v1/orders", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let env = TestEnv::new().await;
    let user = token(&env, USER, "user", &[]);
    let (status, _) = call(&env, "GET", "/api/v1/admin/orders", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = token(&env, ADMIN, "admin", &[]);
    let (status, _) = call(&env, "GET", "/api/v1/admin/orders", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    // Read-only operator may list but not approve
    let viewer = token(&env, ADMIN + 1, "operator", &["orders:view"]);
    let (status, _) = call(&env, "GET", "/api/v1/admin/orders", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&env, "POST", "/api/v1/admin/orders/1/approve", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_order_created_over_http_shows_in_admin_list() {
    let env = TestEnv::new().await;
    let user = token(&env, USER, "user", &[]);
    let body = serde_json::json!({
        "items": [{ "package_id": PKG_BASIC, "system_id": SYSTEM, "qty": 2 }]
    });
    let (status, _) = call(&env, "POST", "/api/v1/orders/items", Some(&user), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let orders = env.state.orders.list_user_orders(USER, 10, 0).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total_amount, 20_000);

    let admin = token(&env, ADMIN, "admin", &[]);
    let (status, _) = call(
        &env,
        "GET",
        "/api/v1/admin/orders?status=pending_payment",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_locks_and_unlocks_instance() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let uri = format!("/api/v1/admin/vps/{}/admin-status", vps.id);

    let viewer = token(&env, ADMIN + 1, "operator", &["orders:view"]);
    let body = serde_json::json!({ "status": "abuse", "reason": "spam" });
    let (status, _) = call(&env, "POST", &uri, Some(&viewer), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(env.automation.calls("lock_host"), 0);

    let admin = token(&env, ADMIN, "admin", &[]);
    let (status, json) = call(&env, "POST", &uri, Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["admin_status"], "abuse");
    assert_eq!(env.automation.calls("lock_host"), 1);

    let body = serde_json::json!({ "status": "normal" });
    let (status, json) = call(&env, "POST", &uri, Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["admin_status"], "normal");
    assert_eq!(env.automation.calls("unlock_host"), 1);

    let (status, logs) = call(&env, "GET", "/api/v1/admin/audit-logs?action=vps.admin_status", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().map(|a| a.len()), Some(2));
}
