//! 缓冲层错误定义。
//!
//! 所有错误都携带稳定错误码（`spark.buffer.*`），上层在日志与指标中按码聚合，
//! 不依赖 `Display` 文案。

use thiserror::Error;

/// 缓冲层统一的 `Result` 别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

/// 稳定错误码。
pub mod codes {
    pub const INSUFFICIENT_DATA: &str = "spark.buffer.insufficient_data";
    pub const EXCEEDS_RESERVED: &str = "spark.buffer.exceeds_reserved";
    pub const INVALID_ARGUMENT: &str = "spark.buffer.invalid_argument";
}

/// 链式缓冲的错误。
///
/// # 契约（What）
/// - `InsufficientData`：可读字节不足，`available` 为调用瞬间的可读长度；
///   非阻塞读取在此返回，调用方可等待更多数据后重试；
/// - `ExceedsReserved`：确认长度超过了已预留（未提交）的字节数；
/// - `InvalidArgument`：参数违反前置条件，附带静态描述。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("insufficient data: requested {requested} bytes but only {available} readable")]
    InsufficientData { requested: usize, available: usize },
    #[error("acknowledged {requested} bytes but only {reserved} reserved")]
    ExceedsReserved { requested: usize, reserved: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl BufferError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => codes::INSUFFICIENT_DATA,
            Self::ExceedsReserved { .. } => codes::EXCEEDS_RESERVED,
            Self::InvalidArgument(_) => codes::INVALID_ARGUMENT,
        }
    }

    pub(crate) fn insufficient(requested: usize, available: usize) -> Self {
        Self::InsufficientData {
            requested,
            available,
        }
    }
}
