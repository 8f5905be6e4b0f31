use crate::auth::JwtConfig;
use shared::AppError;
use std::time::Duration;

/// 服务器配置
///
/// 业务策略（续费窗口、退款曲线、resize 定价等）不在这里，
/// 它们存放在 `settings` 表中，每次使用时读取。
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | DATABASE_PATH | ./data/vps.db | SQLite 文件 |
/// | HTTP_PORT | 8080 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (unset) | 日志目录，存在时写入按天滚动文件 |
/// | LOG_JSON | false | JSON 日志 |
/// | JWT_SECRET | dev key | 非 development 环境必须设置 |
/// | JWT_ISSUER | vps-server | 令牌签发者 |
/// | JWT_AUDIENCE | vps-clients | 令牌受众 |
/// | AUTOMATION_BASE_URL | http://127.0.0.1:9000 | 自动化插件地址 |
/// | AUTOMATION_API_KEY | (empty) | 自动化插件密钥 |
/// | AUTOMATION_TIMEOUT_MS | 15000 | 单次自动化调用超时 |
/// | PROVISION_POLL_ATTEMPTS | 5 | 开通后轮询次数 |
/// | PROVISION_POLL_INTERVAL_MS | 6000 | 轮询间隔 |
/// | WATCHDOG_TICK_SECS | 5 | watchdog tick |
/// | RESIZE_RUNNER_TICK_SECS | 15 | resize runner tick |
/// | SCHEDULER_TICK_SECS | 30 | scheduled-task supervisor tick |
/// | PROVISION_CONCURRENCY | 8 | 并发开通任务上限 |
/// | PUBLIC_BASE_URL | http://localhost:8080 | 支付回调/返回地址前缀 |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub http_port: u16,
    /// development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub log_json: bool,
    pub jwt: JwtConfig,
    pub automation: AutomationConfig,
    pub provision: ProvisionConfig,
    pub watchdog_tick: Duration,
    pub resize_runner_tick: Duration,
    pub scheduler_tick: Duration,
    pub public_base_url: String,
    pub shutdown_timeout: Duration,
}

/// 自动化插件连接配置
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// 开通执行器参数
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub concurrency: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn require_secret(name: &str, environment: &str) -> Result<String, AppError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(AppError::config(format!(
                        "{name} must be set in {environment} environment"
                    )));
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.trim().is_empty() && environment != "development" {
            return Err(AppError::config(format!(
                "{name} must not be empty in {environment} environment"
            )));
        }
        Ok(val)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, AppError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let jwt = JwtConfig {
            secret: Self::require_secret("JWT_SECRET", &environment)?,
            expiration_minutes: env_or("JWT_EXPIRATION_MINUTES", 1440),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "vps-server".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "vps-clients".into()),
        };

        Ok(Self {
            database_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/vps.db".into()),
            http_port: env_or("HTTP_PORT", 8080),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty()),
            log_json: env_or("LOG_JSON", false),
            jwt,
            automation: AutomationConfig {
                base_url: std::env::var("AUTOMATION_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:9000".into()),
                api_key: std::env::var("AUTOMATION_API_KEY").unwrap_or_default(),
                timeout: Duration::from_millis(env_or("AUTOMATION_TIMEOUT_MS", 15_000)),
            },
            provision: ProvisionConfig {
                poll_attempts: env_or("PROVISION_POLL_ATTEMPTS", 5),
                poll_interval: Duration::from_millis(env_or("PROVISION_POLL_INTERVAL_MS", 6_000)),
                concurrency: env_or("PROVISION_CONCURRENCY", 8),
            },
            watchdog_tick: Duration::from_secs(env_or("WATCHDOG_TICK_SECS", 5)),
            resize_runner_tick: Duration::from_secs(env_or("RESIZE_RUNNER_TICK_SECS", 15)),
            scheduler_tick: Duration::from_secs(env_or("SCHEDULER_TICK_SECS", 30)),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            shutdown_timeout: Duration::from_millis(env_or("SHUTDOWN_TIMEOUT_MS", 10_000)),
            environment,
        })
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    /// Development defaults without touching the environment (used by tests)
    fn default() -> Self {
        Self {
            database_path: "sqlite::memory:".into(),
            http_port: 8080,
            environment: "development".into(),
            log_level: "info".into(),
            log_dir: None,
            log_json: false,
            jwt: JwtConfig {
                secret: "dev-JWT_SECRET-not-for-production".into(),
                expiration_minutes: 60,
                issuer: "vps-server".into(),
                audience: "vps-clients".into(),
            },
            automation: AutomationConfig {
                base_url: "http://127.0.0.1:9000".into(),
                api_key: String::new(),
                timeout: Duration::from_secs(15),
            },
            provision: ProvisionConfig {
                poll_attempts: 5,
                poll_interval: Duration::from_secs(6),
                concurrency: 8,
            },
            watchdog_tick: Duration::from_secs(5),
            resize_runner_tick: Duration::from_secs(15),
            scheduler_tick: Duration::from_secs(30),
            public_base_url: "http://localhost:8080".into(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}
