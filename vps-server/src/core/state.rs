//! 服务器状态
//!
//! [`ServerState`] 被每个 handler 以 `State<ServerState>` 的方式获取，
//! 内部全部是 `Arc` 或可廉价 clone 的服务句柄。

use crate::auth::JwtService;
use crate::automation::AutomationResolver;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::Config;
use crate::core::context::CoreContext;
use crate::core::tasks::{BackgroundTasks, TaskPool};
use crate::db::DbService;
use crate::orders::{OrderApprover, OrderService};
use crate::payment::{ApprovalProvider, BalanceProvider, PaymentRegistry, PaymentService, SignedGatewayProvider};
use crate::scheduler::Scheduler;
use crate::wallet::WalletService;
use shared::AppResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Key of the built-in HMAC gateway
pub const SIGNED_GATEWAY_KEY: &str = "signed_gateway";

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub jwt: Arc<JwtService>,
    pub ctx: Arc<CoreContext>,
    pub wallet: WalletService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub scheduler: Arc<Scheduler>,
}

impl ServerState {
    /// Open the database and wire every service (production path)
    pub async fn initialize(config: &Config, shutdown: CancellationToken) -> AppResult<Self> {
        let db = DbService::new(&config.database_path).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let automation = Arc::new(AutomationResolver::from_config(config.automation.clone()));
        let ctx = Arc::new(CoreContext::new(db.pool, clock, automation, config.provision.clone()));

        let registry = Arc::new(Self::default_registry(&ctx));
        registry.load_configs().await?;
        Ok(Self::build(config.clone(), ctx, registry, shutdown))
    }

    /// Registry with the built-in providers
    pub fn default_registry(ctx: &CoreContext) -> PaymentRegistry {
        let registry = PaymentRegistry::new(ctx.pool.clone(), ctx.clock.clone(), ctx.audit.clone());
        registry.register(Arc::new(BalanceProvider));
        registry.register(Arc::new(ApprovalProvider::default()));
        registry.register(Arc::new(SignedGatewayProvider::new(SIGNED_GATEWAY_KEY, "Signed gateway")));
        registry
    }

    /// Wire services on top of an existing context (tests inject their own)
    pub fn build(
        config: Config,
        ctx: Arc<CoreContext>,
        registry: Arc<PaymentRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let wallet = WalletService::new(ctx.clone());
        let orders = OrderService::new(
            ctx.clone(),
            wallet.clone(),
            TaskPool::new(config.provision.concurrency, shutdown),
        );
        let approver: Arc<dyn OrderApprover> = Arc::new(orders.clone());
        let payments = PaymentService::new(
            ctx.clone(),
            wallet.clone(),
            registry,
            approver,
            config.public_base_url.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(
            orders.clone(),
            config.scheduler_tick,
            config.watchdog_tick,
            config.resize_runner_tick,
        ));

        Self {
            jwt: Arc::new(JwtService::with_config(config.jwt.clone())),
            config: Arc::new(config),
            ctx,
            wallet,
            orders,
            payments,
            scheduler,
        }
    }

    /// Resume interrupted provisioning and start the scheduled loops
    pub async fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        match self.orders.resume_interrupted().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(orders = n, "Resumed interrupted provisioning"),
            Err(e) => tracing::error!(error = %e, "Failed to resume interrupted provisioning"),
        }
        self.scheduler.clone().spawn_all(tasks);
        tasks.log_summary();
    }
}
