//! 日志初始化与 Access / Error / Security 分类事件。

use std::fmt::Display;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing 日志订阅与默认过滤规则。
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 日志分类；文件句柄、轮转与保留由订阅端负责。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Access,
    Error,
    Security,
}

impl LogCategory {
    pub fn log(self, message: impl Display) {
        match self {
            LogCategory::Access => info!(target: "nas_dav::access", "{message}"),
            LogCategory::Error => error!(target: "nas_dav::error", "{message}"),
            LogCategory::Security => warn!(target: "nas_dav::security", "{message}"),
        }
    }
}
