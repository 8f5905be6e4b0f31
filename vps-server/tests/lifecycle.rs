//! 实例生命周期：退款销毁、升降配、紧急续费、网关回调去重

mod common;

use async_trait::async_trait;
use common::*;
use serde_json::json;
use shared::models::{
    AdminStatus, Order, OrderStatus, ResizeTaskStatus, VpsStatus, WalletOrderStatus, WalletOrderType,
};
use shared::util::{DAY_MS, HOUR_MS, MINUTE_MS};
use shared::{AppResult, ErrorCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vps_server::ServerState;
use vps_server::core::state::SIGNED_GATEWAY_KEY;
use vps_server::db::repository::{order_item, resize_task, wallet as wallet_repo};
use vps_server::orders::{ApprovedBy, OrderApprover, OrderLine, OrderService, ResizeRequest};
use vps_server::payment::signed_gateway::sign;
use vps_server::payment::{METHOD_BALANCE, PaymentOutcome, PaymentService, RawNotify, SubmitPayment};
use vps_server::scheduler::TaskKey;
use vps_server::wallet::ref_type;

#[tokio::test]
async fn test_refund_follows_curve_and_destroys_instance() {
    let env = TestEnv::new().await;
    env.set("refund_requires_approval", "false").await;
    env.set("refund_curve_json", r#"[{"percent":0,"ratio":1.0},{"percent":100,"ratio":0.5}]"#)
        .await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    assert_eq!(env.balance(USER).await, 40_000);

    // Half of a 31-day January
    env.clock.advance(15 * DAY_MS + 12 * HOUR_MS);
    assert_eq!(env.state.wallet.refund_quote(&vps).await.unwrap(), 7_500);

    let order = env.state.wallet.request_refund(USER, vps.id, "no longer needed").await.unwrap();
    assert_eq!(order.status, WalletOrderStatus::Approved);
    assert_eq!(order.amount, 7_500);
    assert_eq!(env.balance(USER).await, 47_500);
    assert_eq!(env.automation.calls("delete_host"), 1);
    assert!(env.instances(USER).await.is_empty());

    let credits = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::WALLET_ORDER, order.id)
        .await
        .unwrap();
    assert_eq!(credits, 1);
}

#[tokio::test]
async fn test_refund_order_settles_through_one_wallet_order() {
    let env = TestEnv::new().await;
    env.set("refund_requires_approval", "false").await;
    env.set("refund_curve_json", r#"[{"percent":0,"ratio":1.0},{"percent":100,"ratio":0.5}]"#)
        .await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    // Money moves on the first run, then the host delete fails
    env.automation.fail("delete_host", "connection reset");
    let order = env.state.orders.create_refund_order(USER, vps.id, "moving").await.unwrap();
    assert_eq!(order.total_amount, -10_000);
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Failed);
    assert_eq!(env.balance(USER).await, 50_000);
    assert_eq!(env.instances(USER).await.len(), 1);

    env.automation.clear_failures();
    env.state.orders.retry_provision(ADMIN, order.id).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert!(env.instances(USER).await.is_empty());

    let refunds: Vec<_> = env
        .state
        .wallet
        .user_orders(USER, 50, 0)
        .await
        .unwrap()
        .into_iter()
        .filter(|w| w.order_type == WalletOrderType::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, WalletOrderStatus::Approved);
    assert_eq!(refunds[0].amount, 10_000);
    assert_eq!(refunds[0].reviewed_by, None);

    let credits = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::VPS_REFUND, order.id)
        .await
        .unwrap();
    assert_eq!(credits, 1);
    assert_eq!(env.balance(USER).await, 50_000);
}

#[tokio::test]
async fn test_refund_order_waits_for_review_then_settles() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    let order = env.state.orders.create_refund_order(USER, vps.id, "").await.unwrap();
    assert_eq!(order.status, OrderStatus::PendingReview);
    let err = env.state.orders.create_refund_order(USER, vps.id, "again").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(env.state.wallet.user_orders(USER, 50, 0).await.unwrap().is_empty());

    env.state.orders.approve_order(order.id, ApprovedBy::Admin(ADMIN)).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.automation.calls("delete_host"), 1);
    assert_eq!(env.state.wallet.user_orders(USER, 50, 0).await.unwrap().len(), 1);
    assert!(env.balance(USER).await > 40_000);
}

#[tokio::test]
async fn test_admin_delete_tolerates_host_already_gone() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, first) = env.buy(USER, PKG_BASIC).await;
    let (_, second) = env.buy(USER, PKG_BASIC).await;

    env.automation.fail("delete_host", "connection refused");
    let err = env.state.orders.admin_delete_instance(ADMIN, first.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AutomationFailed);
    assert_eq!(env.instances(USER).await.len(), 2);

    env.automation.fail("delete_host", "host not found");
    env.state.orders.admin_delete_instance(ADMIN, second.id).await.unwrap();
    let left = env.instances(USER).await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, first.id);
}

#[tokio::test]
async fn test_refund_waits_for_review_by_default() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    let order = env.state.wallet.request_refund(USER, vps.id, "").await.unwrap();
    assert_eq!(order.status, WalletOrderStatus::PendingReview);
    assert_eq!(env.balance(USER).await, 40_000);

    let err = env.state.wallet.request_refund(USER, vps.id, "again").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    let rejected = env.state.wallet.reject_order(order.id, ADMIN, "still in use").await.unwrap();
    assert_eq!(rejected.status, WalletOrderStatus::Rejected);
    assert_eq!(env.automation.calls("delete_host"), 0);
    assert_eq!(env.instances(USER).await.len(), 1);
}

#[tokio::test]
async fn test_downgrade_refunds_difference_and_resizes() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_PRO).await;
    assert_eq!(env.balance(USER).await, 30_000);

    let req = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_BASIC),
        ..Default::default()
    };
    let quote = env.state.orders.quote_resize_order(USER, &req).await.unwrap();
    assert_eq!(quote.charge, -10_000);
    assert_eq!(quote.refund_amount, 10_000);
    assert!(quote.refund_to_wallet);

    let order = env.state.orders.create_resize_order(USER, &req).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);

    let updates = env.automation.elastic_updates();
    assert_eq!(updates.len(), 1);
    let update = &updates[0];
    assert_eq!(update.cpu, Some(1));
    assert_eq!(update.memory_gb, Some(2));
    assert_eq!(update.disk_gb, None);
    assert_eq!(update.bandwidth, Some(10));
    assert_eq!(update.port_num, None);

    let credits = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::RESIZE_REFUND, order.id)
        .await
        .unwrap();
    assert_eq!(credits, 1);
    assert_eq!(env.balance(USER).await, 40_000);

    let resized = &env.instances(USER).await[0];
    assert_eq!((resized.cpu, resized.memory_gb, resized.bandwidth_mbps), (1, 2, 10));
    assert_eq!(resized.package_id, Some(PKG_BASIC));
}

#[tokio::test]
async fn test_disk_shrink_rejected_before_automation() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let calls = env.automation.total_calls();

    let req = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_MINI),
        ..Default::default()
    };
    let err = env.state.orders.create_resize_order(USER, &req).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);
    assert_eq!(env.automation.total_calls(), calls);
}

async fn pay_from_wallet(env: &TestEnv, order: &Order) {
    let req = SubmitPayment {
        method: METHOD_BALANCE.into(),
        amount: order.total_amount,
        ..Default::default()
    };
    env.state.payments.submit_payment(USER, order.id, &req, None).await.unwrap();
    env.state.orders.wait_idle().await;
}

#[tokio::test]
async fn test_paid_renew_extends_expiry() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let expire_before = vps.expire_at.unwrap();

    let order = env.state.orders.create_renew_order(USER, vps.id, None, Some(1)).await.unwrap();
    assert_eq!(order.total_amount, 10_000);
    let err = env.state.orders.create_renew_order(USER, vps.id, Some(30), None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    pay_from_wallet(&env, &order).await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.balance(USER).await, 30_000);
    assert_eq!(env.automation.calls("renew_host"), 1);
    assert_eq!(env.automation.calls("unlock_host"), 0);

    let renewed = &env.instances(USER).await[0];
    assert_eq!(renewed.expire_at, Some(expire_before + 30 * DAY_MS));
    assert_eq!(renewed.status, VpsStatus::Running);
}

#[tokio::test]
async fn test_renew_lifts_admin_lock() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    let locked = env
        .state
        .orders
        .set_admin_status(ADMIN, vps.id, AdminStatus::Locked, "chargeback")
        .await
        .unwrap();
    assert_eq!(locked.admin_status, AdminStatus::Locked);
    assert_eq!(env.automation.calls("lock_host"), 1);

    let order = env.state.orders.create_renew_order(USER, vps.id, None, Some(1)).await.unwrap();
    pay_from_wallet(&env, &order).await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.automation.calls("unlock_host"), 1);
    assert_eq!(env.instances(USER).await[0].admin_status, AdminStatus::Normal);
}

#[tokio::test]
async fn test_admin_status_change_needs_upstream_ack() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    env.automation.fail("lock_host", "upstream busy");
    let err = env
        .state
        .orders
        .set_admin_status(ADMIN, vps.id, AdminStatus::Abuse, "spam")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AutomationFailed);
    assert_eq!(env.instances(USER).await[0].admin_status, AdminStatus::Normal);

    let err = env
        .state
        .orders
        .set_admin_status(ADMIN, vps.id + 100, AdminStatus::Abuse, "spam")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::VpsNotFound);
}

#[tokio::test]
async fn test_expired_instance_locked_then_renewed() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let expire_at = vps.expire_at.unwrap();

    // Not yet expired
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireLock).await.unwrap();
    assert!(outcome.is_idle());

    env.clock.set(expire_at + HOUR_MS);
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireLock).await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(env.automation.calls("lock_host"), 1);
    assert_eq!(env.instances(USER).await[0].status, VpsStatus::ExpiredLocked);

    // Already locked instances are left alone
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireLock).await.unwrap();
    assert!(outcome.is_idle());

    let order = env.state.orders.create_renew_order(USER, vps.id, None, Some(1)).await.unwrap();
    pay_from_wallet(&env, &order).await;
    assert_eq!(env.automation.calls("unlock_host"), 1);
    let renewed = &env.instances(USER).await[0];
    assert_eq!(renewed.status, VpsStatus::Running);
    assert_eq!(renewed.expire_at, Some(expire_at + HOUR_MS + 30 * DAY_MS));
}

#[tokio::test]
async fn test_cleanup_deletes_long_expired_instances() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let expire_at = vps.expire_at.unwrap();

    env.clock.set(expire_at + 8 * DAY_MS);
    // Disabled by default
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireCleanup).await.unwrap();
    assert!(outcome.is_idle());
    assert_eq!(env.instances(USER).await.len(), 1);

    env.set("auto_delete_enabled", "true").await;
    env.set("auto_delete_days", "10").await;
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireCleanup).await.unwrap();
    assert!(outcome.is_idle());

    env.set("auto_delete_days", "7").await;
    let outcome = env.state.scheduler.run_task(TaskKey::ExpireCleanup).await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(env.automation.calls("delete_host"), 1);
    assert!(env.instances(USER).await.is_empty());
}

#[tokio::test]
async fn test_scheduled_resize_waits_for_its_time() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_PRO).await;

    let at = START + 2 * DAY_MS;
    let req = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_BASIC),
        scheduled_at: Some(at),
        ..Default::default()
    };
    let order = env.state.orders.create_resize_order(USER, &req).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Approved);

    // One resize at a time per instance
    let again = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_BASIC),
        ..Default::default()
    };
    let err = env.state.orders.create_resize_order(USER, &again).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResizeInProgress);

    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 0);
    assert!(env.automation.elastic_updates().is_empty());

    env.clock.set(at);
    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 1);
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.automation.elastic_updates().len(), 1);
    assert_eq!(env.instances(USER).await[0].package_id, Some(PKG_BASIC));
}

#[tokio::test]
async fn test_panicking_resize_task_fails_alone() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_PRO).await;

    let at = START + DAY_MS;
    let req = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_BASIC),
        scheduled_at: Some(at),
        ..Default::default()
    };
    let order = env.state.orders.create_resize_order(USER, &req).await.unwrap();
    env.state.orders.wait_idle().await;

    env.automation.panic_on("elastic_update");
    env.clock.set(at);
    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 1);

    let items = order_item::list_by_order(&env.ctx().pool, order.id).await.unwrap();
    let task = resize_task::find_by_item(&env.ctx().pool, items[0].id).await.unwrap().unwrap();
    assert_eq!(task.status, ResizeTaskStatus::Failed);
    assert_eq!(items[0].status, OrderStatus::Failed);
    assert_eq!(env.order_status(order.id).await, OrderStatus::Failed);

    // The runner keeps working
    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_emergency_renew_cooldown() {
    let env = TestEnv::new().await;
    env.set("emergency_renew_window_days", "0").await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;
    let expire_before = vps.expire_at.unwrap();

    let order = env.state.orders.create_emergency_renew_order(USER, vps.id).await.unwrap();
    assert_eq!(order.total_amount, 0);
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.automation.calls("renew_host"), 1);

    let renewed = &env.instances(USER).await[0];
    assert_eq!(renewed.expire_at, Some(expire_before + DAY_MS));
    assert!(renewed.last_emergency_renew_at.is_some());

    env.clock.advance(30 * MINUTE_MS);
    let err = env.state.orders.create_emergency_renew_order(USER, vps.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(env.automation.calls("renew_host"), 1);
    assert_eq!(env.balance(USER).await, 40_000);
}

#[tokio::test]
async fn test_emergency_renew_outside_window_forbidden() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_BASIC).await;

    // 31 days left, window is the last 7
    let err = env.state.orders.create_emergency_renew_order(USER, vps.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert_eq!(env.automation.calls("renew_host"), 0);
}

/// 统计审批次数的包装
struct CountingApprover {
    inner: OrderService,
    count: AtomicUsize,
}

#[async_trait]
impl OrderApprover for CountingApprover {
    async fn approve_order(&self, order_id: i64, by: ApprovedBy) -> AppResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        OrderApprover::approve_order(&self.inner, order_id, by).await
    }
}

const GATEWAY_SECRET: &str = "notify-secret";

/// Payment service with the signed gateway enabled and a counting approver
async fn gateway_payments(env: &TestEnv) -> (PaymentService, Arc<CountingApprover>) {
    let ctx = env.ctx().clone();
    let registry = Arc::new(ServerState::default_registry(&ctx));
    registry
        .update_provider(
            ADMIN,
            SIGNED_GATEWAY_KEY,
            true,
            json!({ "gateway_url": "https://pay.example.com/checkout", "secret": GATEWAY_SECRET }),
        )
        .await
        .unwrap();
    let approver = Arc::new(CountingApprover {
        inner: env.state.orders.clone(),
        count: AtomicUsize::new(0),
    });
    let payments = PaymentService::new(
        ctx,
        env.state.wallet.clone(),
        registry,
        approver.clone(),
        String::from("http://localhost:9625"),
    );
    (payments, approver)
}

/// Unpaid basic order with a gateway payment started
async fn gateway_order(env: &TestEnv, payments: &PaymentService) -> Order {
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    let req = SubmitPayment {
        method: SIGNED_GATEWAY_KEY.into(),
        amount: detail.order.total_amount,
        ..Default::default()
    };
    let outcome = payments.submit_payment(USER, detail.order.id, &req, None).await.unwrap();
    assert!(matches!(outcome, PaymentOutcome::Redirect { .. }));
    detail.order
}

fn signed_notify(order_no: &str, trade_no: &str, amount: i64) -> RawNotify {
    let mut params = BTreeMap::new();
    params.insert("order_no".to_string(), order_no.to_string());
    params.insert("trade_no".to_string(), trade_no.to_string());
    params.insert("amount".to_string(), amount.to_string());
    params.insert("status".to_string(), "paid".to_string());
    let signature = sign(GATEWAY_SECRET, &params).unwrap();
    params.insert("sign".to_string(), signature);
    let body = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    RawNotify {
        method: "POST".into(),
        path: format!("/api/v1/payments/notify/{SIGNED_GATEWAY_KEY}"),
        body,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_duplicate_gateway_notify_approves_once() {
    let env = TestEnv::new().await;
    let (payments, approver) = gateway_payments(&env).await;
    let order = gateway_order(&env, &payments).await;
    let raw = signed_notify(&order.order_no, "TN-A", order.total_amount);

    assert_eq!(payments.handle_notify(SIGNED_GATEWAY_KEY, &raw).await.unwrap(), "success");
    assert_eq!(payments.handle_notify(SIGNED_GATEWAY_KEY, &raw).await.unwrap(), "success");
    assert_eq!(approver.count.load(Ordering::SeqCst), 1);

    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.instances(USER).await.len(), 1);

    // Tampered amount fails verification
    let mut forged = raw.clone();
    forged.body = forged.body.replace("amount=10000", "amount=1");
    let err = payments.handle_notify(SIGNED_GATEWAY_KEY, &forged).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PaymentVerifyFailed);
}

#[tokio::test]
async fn test_gateway_notify_with_foreign_trade_no_is_rejected() {
    let env = TestEnv::new().await;
    let (payments, approver) = gateway_payments(&env).await;
    let first = gateway_order(&env, &payments).await;
    let second = gateway_order(&env, &payments).await;

    let raw = signed_notify(&first.order_no, "TN-SHARED", first.total_amount);
    payments.handle_notify(SIGNED_GATEWAY_KEY, &raw).await.unwrap();

    let raw = signed_notify(&second.order_no, "TN-SHARED", second.total_amount);
    let err = payments.handle_notify(SIGNED_GATEWAY_KEY, &raw).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(approver.count.load(Ordering::SeqCst), 1);

    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(first.id).await, OrderStatus::Active);
    assert_eq!(env.order_status(second.id).await, OrderStatus::PendingPayment);
}
