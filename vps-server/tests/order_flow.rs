//! 订单端到端流程：下单、付款、开通、watchdog、幂等

mod common;

use common::*;
use serde_json::Value;
use shared::ErrorCode;
use shared::models::{ItemAction, OrderStatus, PaymentStatus, ProvisionJobStatus, ResizeTaskStatus, VpsStatus};
use shared::util::{DAY_MS, MINUTE_MS, add_months_millis};
use vps_server::db::repository::{order as order_repo, order_item, provision_job, resize_task, wallet as wallet_repo};
use vps_server::orders::{ApprovedBy, OrderLine, ResizeRequest};
use vps_server::payment::{METHOD_APPROVAL, METHOD_BALANCE, PaymentOutcome, SubmitPayment};
use vps_server::wallet::ref_type;

#[tokio::test]
async fn test_buy_with_balance_provisions_instance() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;

    let (order_id, vps) = env.buy(USER, PKG_BASIC).await;

    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);
    assert_eq!(env.balance(USER).await, 40_000);
    assert_eq!(vps.status, VpsStatus::Running);
    assert_eq!(vps.monthly_price, 10_000);
    assert_eq!((vps.cpu, vps.memory_gb, vps.disk_gb), (1, 2, 40));

    let spec: Value = serde_json::from_str(&vps.spec_json).unwrap();
    let period_end = add_months_millis(vps.created_at, 1).unwrap();
    assert_eq!(spec["current_period_end"].as_i64(), Some(period_end));
    assert_eq!(vps.expire_at, Some(period_end));

    let debits = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::ORDER, order_id)
        .await
        .unwrap();
    assert_eq!(debits, 1);
    assert_eq!(env.automation.calls("create_host"), 1);

    let access: Value = serde_json::from_str(&vps.access_info_json).unwrap();
    assert_eq!(access["remote_ip"], "10.0.0.8");
}

#[tokio::test]
async fn test_balance_payment_rejected_when_insufficient() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 5_000).await;
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    let req = vps_server::payment::SubmitPayment {
        method: METHOD_BALANCE.into(),
        amount: 10_000,
        ..Default::default()
    };
    let err = env
        .state
        .payments
        .submit_payment(USER, detail.order.id, &req, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientBalance);
    assert_eq!(env.order_status(detail.order.id).await, OrderStatus::PendingPayment);
    assert_eq!(env.balance(USER).await, 5_000);
    assert_eq!(env.automation.total_calls(), 0);
}

#[tokio::test]
async fn test_qty_expands_into_items() {
    let env = TestEnv::new().await;
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 3,
    };
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    assert_eq!(detail.order.total_amount, 30_000);
    assert_eq!(detail.items.len(), 3);
    assert!(detail.items.iter().all(|i| i.action == ItemAction::Create && i.amount == 10_000));
}

#[tokio::test]
async fn test_cart_order_is_idempotent() {
    let env = TestEnv::new().await;
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    env.state.orders.add_to_cart(USER, &line).await.unwrap();

    let first = env.state.orders.create_from_cart(USER, None, Some("key-1")).await.unwrap();
    assert!(env.state.orders.cart(USER).await.unwrap().is_empty());

    let second = env.state.orders.create_from_cart(USER, None, Some("key-1")).await.unwrap();
    assert_eq!(first.order.id, second.order.id);
    assert_eq!(env.state.orders.list_user_orders(USER, 50, 0).await.unwrap().len(), 1);

    // A fresh key against the now-empty cart is a validation error
    let err = env.state.orders.create_from_cart(USER, None, Some("key-2")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);
}

#[tokio::test]
async fn test_invalid_addon_step_rejected() {
    let env = TestEnv::new().await;
    let mut line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    line.spec.add_disk_gb = 15;
    let err = env.state.orders.create_from_items(USER, &[line.clone()], None, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);

    line.spec.add_disk_gb = 20;
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    assert_eq!(detail.order.total_amount, 10_000 + 20 * 100);
}

#[tokio::test]
async fn test_watchdog_fails_host_that_never_becomes_ready() {
    let env = TestEnv::with_automation(FakeAutomation::new(STATE_CREATING)).await;
    env.seed_wallet(USER, 50_000).await;

    let (order_id, vps) = env.buy(USER, PKG_BASIC).await;
    assert_eq!(env.order_status(order_id).await, OrderStatus::Provisioning);
    assert_eq!(vps.status, VpsStatus::Provisioning);

    env.clock.advance(MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!((report.scanned, report.retried), (1, 1));
    assert_eq!(env.instances(USER).await[0].status, VpsStatus::Provisioning);

    env.clock.advance(20 * MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!(report.failed, 1);

    assert_eq!(env.order_status(order_id).await, OrderStatus::Failed);
    let items = order_item::list_by_order(&env.ctx().pool, order_id).await.unwrap();
    assert_eq!(items[0].status, OrderStatus::Failed);
    assert_ne!(env.instances(USER).await[0].status, VpsStatus::Provisioning);

    // The job is closed; later passes find nothing
    env.clock.advance(MINUTE_MS);
    assert!(env.state.orders.run_watchdog_once().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_watchdog_completes_late_host() {
    let env = TestEnv::with_automation(FakeAutomation::new(STATE_CREATING)).await;
    env.seed_wallet(USER, 50_000).await;
    let (order_id, _) = env.buy(USER, PKG_BASIC).await;

    env.automation.set_state(STATE_RUNNING);
    env.clock.advance(MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!(report.completed, 1);

    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);
    let vps = &env.instances(USER).await[0];
    assert_eq!(vps.status, VpsStatus::Running);
    assert!(vps.expire_at.is_some());
}

#[tokio::test]
async fn test_wallet_adjustment_applies_once() {
    let env = TestEnv::new().await;
    for _ in 0..3 {
        let balance = env.state.wallet.adjust(USER, 500, ref_type::ORDER, 42, "once").await.unwrap();
        assert_eq!(balance, 500);
    }
    let n = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::ORDER, 42).await.unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn test_concurrent_adjustments_with_same_key_apply_once() {
    let env = TestEnv::new().await;
    let calls = (0..6).map(|_| env.state.wallet.adjust(USER, 700, ref_type::ORDER, 77, "race"));
    let results = futures::future::join_all(calls).await;
    for r in results {
        assert_eq!(r.unwrap(), 700);
    }
    assert_eq!(env.balance(USER).await, 700);
    let n = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::ORDER, 77).await.unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn test_insufficient_debit_leaves_no_ledger_row() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 100).await;
    let err = env.state.wallet.adjust(USER, -500, ref_type::ORDER, 78, "short").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientBalance);
    let n = wallet_repo::count_transactions(&env.ctx().pool, USER, ref_type::ORDER, 78).await.unwrap();
    assert_eq!(n, 0);
    // Same key can still be used once funds arrive
    env.state.wallet.adjust(USER, 1_000, ref_type::ADMIN_ADJUST, 2, "top up").await.unwrap();
    env.state.wallet.adjust(USER, -500, ref_type::ORDER, 78, "short").await.unwrap();
}

#[tokio::test]
async fn test_cancel_only_before_approval() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    let canceled = env.state.orders.cancel_order(USER, detail.order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);

    let (order_id, _) = env.buy(USER, PKG_BASIC).await;
    let err = env.state.orders.cancel_order(USER, order_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    // Someone else's order looks missing
    let err = env.state.orders.cancel_order(USER + 1, order_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OrderNotFound);
}

#[tokio::test]
async fn test_reject_then_approve_and_audit() {
    let env = TestEnv::new().await;
    let line = OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    };
    let detail = env.state.orders.create_from_items(USER, &[line], None, None).await.unwrap();
    let order_id = detail.order.id;

    let err = env.state.orders.reject_order(ADMIN, order_id, "  ").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationFailed);

    let rejected = env.state.orders.reject_order(ADMIN, order_id, "no proof").await.unwrap();
    assert_eq!(rejected.status, OrderStatus::Rejected);
    assert_eq!(rejected.rejected_reason.as_deref(), Some("no proof"));

    let approved = env
        .state
        .orders
        .approve_order(order_id, vps_server::orders::ApprovedBy::Admin(ADMIN))
        .await
        .unwrap();
    assert_eq!(approved.approved_by, Some(ADMIN));
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);

    let audit = env.ctx().audit.list(None, 50, 0).await.unwrap();
    let actions: Vec<&str> = audit.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"order.reject"));
    assert!(actions.contains(&"order.approve"));

    let events = env.state.orders.user_events(USER, order_id, 0).await.unwrap();
    let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    assert!(events.iter().any(|e| e.event_type == "order.completed"));
}

fn basic_line() -> OrderLine {
    OrderLine {
        package_id: PKG_BASIC,
        system_id: SYSTEM,
        spec: Default::default(),
        qty: 1,
    }
}

#[tokio::test]
async fn test_watchdog_survives_panicking_job() {
    let env = TestEnv::with_automation(FakeAutomation::new(STATE_CREATING)).await;
    env.seed_wallet(USER, 50_000).await;
    let (order_id, _) = env.buy(USER, PKG_BASIC).await;

    env.automation.panic_on("get_host_info");
    env.clock.advance(MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!((report.scanned, report.retried), (1, 1));

    let items = order_item::list_by_order(&env.ctx().pool, order_id).await.unwrap();
    let job = provision_job::find_by_item(&env.ctx().pool, items[0].id).await.unwrap().unwrap();
    assert_eq!(job.status, ProvisionJobStatus::Retry);
    assert!(job.last_error.unwrap_or_default().contains("panicked"));

    env.automation.clear_failures();
    env.automation.set_state(STATE_RUNNING);
    env.clock.advance(MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);
}

#[tokio::test]
async fn test_restart_requeues_claimed_watchdog_job() {
    let env = TestEnv::with_automation(FakeAutomation::new(STATE_CREATING)).await;
    env.seed_wallet(USER, 50_000).await;
    let (order_id, _) = env.buy(USER, PKG_BASIC).await;
    let pool = &env.ctx().pool;
    let items = order_item::list_by_order(pool, order_id).await.unwrap();
    let job = provision_job::find_by_item(pool, items[0].id).await.unwrap().unwrap();

    // Claimed by a process that stopped mid-pass
    assert!(provision_job::claim(pool, job.id, env.ctx().now()).await.unwrap().is_some());
    env.clock.advance(MINUTE_MS);
    assert!(env.state.orders.run_watchdog_once().await.unwrap().is_idle());

    env.state.orders.resume_interrupted().await.unwrap();
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!((report.scanned, report.retried), (1, 1));

    env.clock.advance(65 * MINUTE_MS);
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(env.order_status(order_id).await, OrderStatus::Failed);
}

#[tokio::test]
async fn test_restart_rewatches_or_fails_provisioning_creates() {
    let env = TestEnv::new().await;
    let pool = &env.ctx().pool;
    let now = env.ctx().now();

    // Two orders stopped mid-create: one after the host was created, one before
    let mut stuck = Vec::new();
    for host in ["731", ""] {
        let detail = env.state.orders.create_from_items(USER, &[basic_line()], None, None).await.unwrap();
        let item = &detail.items[0];
        order_repo::transition(pool, detail.order.id, &[OrderStatus::PendingPayment], OrderStatus::Provisioning, now)
            .await
            .unwrap();
        order_item::set_status(pool, item.id, OrderStatus::Provisioning, now).await.unwrap();
        if !host.is_empty() {
            order_item::set_automation_instance(pool, item.id, host, now).await.unwrap();
        }
        stuck.push((detail.order.id, item.id));
    }

    env.state.orders.resume_interrupted().await.unwrap();

    let (with_host, with_host_item) = stuck[0];
    let job = provision_job::find_by_item(pool, with_host_item).await.unwrap().unwrap();
    assert_eq!(job.host_id, 731);
    assert_eq!(job.status, ProvisionJobStatus::Pending);
    let (hostless, _) = stuck[1];
    assert_eq!(env.order_status(hostless).await, OrderStatus::Failed);

    // The watchdog now owns the first one
    let report = env.state.orders.run_watchdog_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(env.order_status(with_host).await, OrderStatus::Active);

    // A second resume finds nothing left to fix
    assert_eq!(env.state.orders.resume_interrupted().await.unwrap(), 0);
    assert!(env.state.orders.run_watchdog_once().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_restart_requeues_running_resize_task() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    let (_, vps) = env.buy(USER, PKG_PRO).await;
    let pool = &env.ctx().pool;

    let at = START + DAY_MS;
    let req = ResizeRequest {
        vps_id: vps.id,
        package_id: Some(PKG_BASIC),
        scheduled_at: Some(at),
        ..Default::default()
    };
    let order = env.state.orders.create_resize_order(USER, &req).await.unwrap();
    env.state.orders.wait_idle().await;
    env.clock.set(at);

    // A runner claimed the task and stopped before the upstream call
    let item = order_item::list_by_order(pool, order.id).await.unwrap().remove(0);
    let task = resize_task::find_by_item(pool, item.id).await.unwrap().unwrap();
    assert!(resize_task::claim(pool, task.id, at).await.unwrap());
    order_item::set_status(pool, item.id, OrderStatus::Provisioning, at).await.unwrap();
    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 0);

    env.state.orders.resume_interrupted().await.unwrap();
    let task = resize_task::find_by_id(pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, ResizeTaskStatus::Pending);

    assert_eq!(env.state.orders.run_resize_tasks_once().await.unwrap(), 1);
    assert_eq!(env.order_status(order.id).await, OrderStatus::Active);
    assert_eq!(env.automation.elastic_updates().len(), 1);
}

#[tokio::test]
async fn test_manual_proof_waits_for_admin() {
    let env = TestEnv::new().await;
    let detail = env.state.orders.create_from_items(USER, &[basic_line()], None, None).await.unwrap();
    let order_id = detail.order.id;
    let req = SubmitPayment {
        method: METHOD_APPROVAL.into(),
        amount: detail.order.total_amount,
        trade_no: Some("BANK-778".into()),
        screenshot_url: Some("https://img.example.com/receipt.png".into()),
        ..Default::default()
    };

    let outcome = env.state.payments.submit_payment(USER, order_id, &req, None).await.unwrap();
    let PaymentOutcome::Submitted { payment } = outcome else {
        panic!("proof should wait for review");
    };
    assert_eq!(payment.status, PaymentStatus::PendingReview);
    assert_eq!(payment.trade_no.as_deref(), Some("BANK-778"));
    assert_eq!(env.order_status(order_id).await, OrderStatus::PendingReview);
    assert_eq!(env.automation.total_calls(), 0);

    // Resubmitting replays; the same reference on another order conflicts
    let again = env.state.payments.submit_payment(USER, order_id, &req, None).await.unwrap();
    assert!(matches!(again, PaymentOutcome::Submitted { .. }));
    let other = env.state.orders.create_from_items(USER, &[basic_line()], None, None).await.unwrap();
    let err = env.state.payments.submit_payment(USER, other.order.id, &req, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    env.state.orders.approve_order(order_id, ApprovedBy::Admin(ADMIN)).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);
    assert_eq!(env.instances(USER).await.len(), 1);
    assert_eq!(env.balance(USER).await, 0);
}

#[tokio::test]
async fn test_retry_provision_after_failed_create() {
    let env = TestEnv::new().await;
    env.seed_wallet(USER, 50_000).await;
    env.automation.fail("create_host", "no capacity");
    let detail = env.state.orders.create_from_items(USER, &[basic_line()], None, None).await.unwrap();
    let order_id = detail.order.id;
    let req = SubmitPayment {
        method: METHOD_BALANCE.into(),
        amount: detail.order.total_amount,
        ..Default::default()
    };
    env.state.payments.submit_payment(USER, order_id, &req, None).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order_id).await, OrderStatus::Failed);
    assert!(env.instances(USER).await.is_empty());

    // Active orders cannot be retried; failed ones can, once
    env.automation.clear_failures();
    env.state.orders.retry_provision(ADMIN, order_id).await.unwrap();
    env.state.orders.wait_idle().await;
    assert_eq!(env.order_status(order_id).await, OrderStatus::Active);
    assert_eq!(env.instances(USER).await.len(), 1);
    assert_eq!(env.automation.calls("create_host"), 2);
    assert_eq!(env.balance(USER).await, 40_000);

    let err = env.state.orders.retry_provision(ADMIN, order_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}
