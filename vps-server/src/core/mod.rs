//! 核心模块 - 配置、状态、时钟和后台任务
//!
//! - [`Config`] - 服务器配置
//! - [`ServerState`] - 服务器状态（handler 共享）
//! - [`Server`] - HTTP 服务器
//! - [`CoreContext`] - 订单核心的共享依赖
//! - [`BackgroundTasks`] / [`TaskPool`] - 后台任务管理

pub mod clock;
pub mod config;
pub mod context;
pub mod server;
pub mod state;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::CoreContext;
pub use server::Server;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind, TaskPool};
