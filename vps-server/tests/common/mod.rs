//! 集成测试公共设施
//!
//! 每个测试一个临时 SQLite 文件、一个手动时钟和一个脚本化的自动化后端。

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{AppError, AppResult};
use std::collections::HashMap;
use shared::models::{OrderStatus, VpsInstance};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vps_server::automation::{
    AutomationClient, AutomationResolver, CreateHostRequest, CreateHostResult, ElasticUpdateRequest, HostInfo,
    HostSimple,
};
use vps_server::core::{Clock, Config, CoreContext, ManualClock};
use vps_server::db::DbService;
use vps_server::db::repository::vps as vps_repo;
use vps_server::orders::OrderLine;
use vps_server::payment::{METHOD_BALANCE, PaymentRegistry, SubmitPayment};
use vps_server::wallet::ref_type;
use vps_server::ServerState;

/// 2025-01-01T00:00:00Z
pub const START: i64 = 1_735_689_600_000;

pub const USER: i64 = 1;
pub const ADMIN: i64 = 900;

pub const PKG_BASIC: i64 = 10;
pub const PKG_PRO: i64 = 20;
pub const PKG_MINI: i64 = 30;
pub const SYSTEM: i64 = 1;

/// Upstream state codes
pub const STATE_CREATING: i64 = 0;
pub const STATE_RUNNING: i64 = 2;

/// 脚本化的自动化后端：所有主机报告同一个状态，记录每次调用
pub struct FakeAutomation {
    next_host: AtomicI64,
    state: AtomicI64,
    calls: Mutex<Vec<String>>,
    elastic: Mutex<Vec<ElasticUpdateRequest>>,
    failures: Mutex<HashMap<String, String>>,
    panics: Mutex<Vec<String>>,
}

impl FakeAutomation {
    pub fn new(state: i64) -> Arc<Self> {
        Arc::new(Self {
            next_host: AtomicI64::new(500),
            state: AtomicI64::new(state),
            calls: Mutex::new(Vec::new()),
            elastic: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(Vec::new()),
        })
    }

    pub fn set_state(&self, state: i64) {
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn elastic_updates(&self) -> Vec<ElasticUpdateRequest> {
        self.elastic.lock().clone()
    }

    /// Make every later `op` call fail with `message`
    pub fn fail(&self, op: &str, message: &str) {
        self.failures.lock().insert(op.to_string(), message.to_string());
    }

    /// Make every later `op` call panic
    pub fn panic_on(&self, op: &str) {
        self.panics.lock().push(op.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
        self.panics.lock().clear();
    }

    /// Record the call, then apply any scripted failure
    fn record(&self, op: &str) -> AppResult<()> {
        self.calls.lock().push(op.to_string());
        let panics = self.panics.lock().iter().any(|p| p == op);
        if panics {
            panic!("scripted panic in {op}");
        }
        match self.failures.lock().get(op) {
            Some(message) => Err(AppError::automation(format!("{op} failed: {message}"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AutomationClient for FakeAutomation {
    async fn create_host(&self, _req: &CreateHostRequest) -> AppResult<CreateHostResult> {
        self.record("create_host")?;
        let host_id = self.next_host.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreateHostResult {
            host_id,
            raw: serde_json::Value::Null,
        })
    }

    async fn get_host_info(&self, host_id: i64) -> AppResult<HostInfo> {
        self.record("get_host_info")?;
        Ok(HostInfo {
            host_id,
            host_name: format!("host-{host_id}"),
            state: self.state.load(Ordering::SeqCst),
            remote_ip: "10.0.0.8".into(),
            os_password: "os-secret".into(),
            ..Default::default()
        })
    }

    async fn list_host_simple(&self, _search_tag: &str) -> AppResult<Vec<HostSimple>> {
        self.record("list_host_simple")?;
        Ok(Vec::new())
    }

    async fn elastic_update(&self, req: &ElasticUpdateRequest) -> AppResult<()> {
        self.record("elastic_update")?;
        self.elastic.lock().push(req.clone());
        Ok(())
    }

    async fn renew_host(&self, _host_id: i64, _next_due: i64) -> AppResult<()> {
        self.record("renew_host")?;
        Ok(())
    }

    async fn lock_host(&self, _host_id: i64) -> AppResult<()> {
        self.record("lock_host")?;
        Ok(())
    }

    async fn unlock_host(&self, _host_id: i64) -> AppResult<()> {
        self.record("unlock_host")?;
        Ok(())
    }

    async fn delete_host(&self, _host_id: i64) -> AppResult<()> {
        self.record("delete_host")?;
        Ok(())
    }
}

pub struct TestEnv {
    pub state: ServerState,
    pub clock: Arc<ManualClock>,
    pub automation: Arc<FakeAutomation>,
    _dir: TempDir,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.provision.poll_attempts = 1;
    config.provision.poll_interval = Duration::from_millis(1);
    config
}

impl TestEnv {
    /// Hosts come up ready on the first poll
    pub async fn new() -> Self {
        Self::with_automation(FakeAutomation::new(STATE_RUNNING)).await
    }

    pub async fn with_automation(automation: Arc<FakeAutomation>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vps.db");
        let db = DbService::new(path.to_str().expect("utf-8 path")).await.expect("open db");
        seed_catalog(&db.pool).await;

        let config = test_config();
        let clock = Arc::new(ManualClock::new(START));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let resolver = Arc::new(AutomationResolver::single(automation.clone()));
        let ctx = Arc::new(CoreContext::new(db.pool, dyn_clock, resolver, config.provision.clone()));
        let registry: Arc<PaymentRegistry> = Arc::new(ServerState::default_registry(&ctx));
        let state = ServerState::build(config, ctx, registry, CancellationToken::new());
        Self {
            state,
            clock,
            automation,
            _dir: dir,
        }
    }

    pub fn ctx(&self) -> &Arc<CoreContext> {
        &self.state.ctx
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.state
            .ctx
            .settings
            .set(key, value, self.clock.now_millis())
            .await
            .expect("write setting");
    }

    /// Credit the wallet outside any order
    pub async fn seed_wallet(&self, user_id: i64, amount: i64) {
        self.state
            .wallet
            .adjust(user_id, amount, ref_type::ADMIN_ADJUST, 1, "seed")
            .await
            .expect("seed wallet");
    }

    pub async fn balance(&self, user_id: i64) -> i64 {
        self.state.wallet.balance(user_id).await.expect("balance")
    }

    pub async fn order_status(&self, order_id: i64) -> OrderStatus {
        self.state
            .orders
            .order_detail(order_id)
            .await
            .expect("order detail")
            .order
            .status
    }

    pub async fn instances(&self, user_id: i64) -> Vec<VpsInstance> {
        vps_repo::list_by_user(&self.state.ctx.pool, user_id)
            .await
            .expect("list instances")
    }

    /// Buy one instance with the wallet and wait for provisioning.
    /// Returns `(order_id, instance)`.
    pub async fn buy(&self, user_id: i64, package_id: i64) -> (i64, VpsInstance) {
        let line = OrderLine {
            package_id,
            system_id: SYSTEM,
            spec: Default::default(),
            qty: 1,
        };
        let detail = self
            .state
            .orders
            .create_from_items(user_id, &[line], None, None)
            .await
            .expect("create order");
        let order_id = detail.order.id;
        let req = SubmitPayment {
            method: METHOD_BALANCE.into(),
            amount: detail.order.total_amount,
            ..Default::default()
        };
        self.state
            .payments
            .submit_payment(user_id, order_id, &req, None)
            .await
            .expect("pay with balance");
        self.state.orders.wait_idle().await;

        let vps = self
            .instances(user_id)
            .await
            .into_iter()
            .max_by_key(|v| v.id)
            .expect("instance provisioned");
        (order_id, vps)
    }
}

async fn seed_catalog(pool: &sqlx::SqlitePool) {
    let statements = [
        "INSERT INTO region (id, code, name) VALUES (1, 'hk', 'Hong Kong')",
        "INSERT INTO plan_group (id, region_id, name, line_id, goods_type_id, unit_disk, add_disk_min, add_disk_max, add_disk_step) \
         VALUES (1, 1, 'Standard', 5, 1, 100, 0, 200, 10)",
        "INSERT INTO package (id, plan_group_id, name, cores, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price) \
         VALUES (10, 1, 'basic', 1, 2, 40, 10, 30, 10000)",
        "INSERT INTO package (id, plan_group_id, name, cores, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price) \
         VALUES (20, 1, 'pro', 2, 4, 40, 20, 30, 20000)",
        "INSERT INTO package (id, plan_group_id, name, cores, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price) \
         VALUES (30, 1, 'mini', 1, 1, 20, 5, 30, 5000)",
        "INSERT INTO system_image (id, image_id, name) VALUES (1, 101, 'debian-12')",
    ];
    for sql in statements {
        sqlx::query(sql).execute(pool).await.expect("seed catalog");
    }
}
