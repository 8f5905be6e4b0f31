//! VPS Server - VPS 转售平台的订单与开通核心
//!
//! # 模块结构
//!
//! ```text
//! vps-server/src/
//! ├── core/          # 配置、状态、时钟、后台任务
//! ├── auth/          # JWT 认证、管理端权限
//! ├── api/           # HTTP 路由和处理器
//! ├── db/            # SQLite 连接池与 repository
//! ├── orders/        # 定价、下单、审批、开通、watchdog、resize
//! ├── payment/       # 支付渠道注册表与支付捕获
//! ├── wallet/        # 钱包、钱包单、退款策略
//! ├── scheduler/     # 定时任务（刷新、到期提醒、锁定、清理）
//! ├── automation/    # 上游自动化插件客户端
//! ├── events/        # 订单事件流
//! ├── settings/      # 运行时策略（settings 表）
//! ├── audit/         # 管理操作审计
//! ├── notify/        # 通知
//! ├── realname/      # 实名认证检查
//! └── utils/         # 日志等工具
//! ```

pub mod api;
pub mod audit;
pub mod auth;
pub mod automation;
pub mod core;
pub mod db;
pub mod events;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod realname;
pub mod scheduler;
pub mod settings;
pub mod utils;
pub mod wallet;

// Re-export 公共类型
pub use auth::{CurrentUser, JwtService};
pub use core::{Config, CoreContext, Server, ServerState};
pub use orders::OrderService;
pub use payment::PaymentService;
pub use wallet::WalletService;
pub use shared::{AppError, AppResult};
pub use utils::init_logger;
