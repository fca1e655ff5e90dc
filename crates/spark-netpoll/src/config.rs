use std::time::Duration;

use serde::Deserialize;
use spark_buffer::BufferConfig;
use thiserror::Error;

/// socket 读预订的初始大小。
pub const DEFAULT_BOOK_SIZE: usize = 4 * 1024;
/// socket 读预订的上限；一次读满预订区后预订大小翻倍，直到该上限。
pub const MAX_BOOK_SIZE: usize = 8 * 1024 * 1024;

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse netpoll config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid netpoll config `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 引擎配置。
///
/// # 契约（What）
/// - 所有字段都有默认值，TOML 中只需覆盖关心的项；未知字段视为错误，避免拼写错误被静默忽略；
/// - 时间以毫秒表示，`None` 表示不设超时；
/// - 加载后须通过 [`NetpollConfig::validate`]，[`NetpollConfig::from_toml_str`] 已内置校验。
///
/// ```toml
/// pollers = 2
/// max_workers = 256
/// read_timeout_ms = 3000
///
/// [buffer]
/// segment_size = 8192
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetpollConfig {
    /// 轮询线程数，每个线程独占一个多路复用实例。
    pub pollers: usize,
    /// 常驻工作线程数。
    pub min_workers: usize,
    /// 工作线程上限。
    pub max_workers: usize,
    /// 超出常驻数的工作线程空闲多久后退出。
    pub worker_keep_alive_ms: u64,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub initial_book_size: usize,
    pub max_book_size: usize,
    pub buffer: BufferConfig,
}

impl Default for NetpollConfig {
    fn default() -> Self {
        Self {
            pollers: 1,
            min_workers: 1,
            max_workers: 1024,
            worker_keep_alive_ms: 10_000,
            read_timeout_ms: None,
            write_timeout_ms: None,
            initial_book_size: DEFAULT_BOOK_SIZE,
            max_book_size: MAX_BOOK_SIZE,
            buffer: BufferConfig::default(),
        }
    }
}

impl NetpollConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pollers == 0 {
            return Err(invalid("pollers", "must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(invalid("min_workers", "must not exceed max_workers"));
        }
        if self.initial_book_size == 0 {
            return Err(invalid("initial_book_size", "must be positive"));
        }
        if self.max_book_size < self.initial_book_size {
            return Err(invalid(
                "max_book_size",
                "must not be smaller than initial_book_size",
            ));
        }
        if self.buffer.validate().is_err() {
            return Err(invalid("buffer", "segment sizes and thresholds must be positive"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_millis(self.worker_keep_alive_ms)
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
