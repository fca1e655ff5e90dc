use std::io;

use spark_buffer::BufferError;
use thiserror::Error;

use crate::config::ConfigError;

/// 描述一次操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const READ: OperationKind = OperationKind {
    code: "spark.netpoll.read_timeout",
    message: "read",
};
pub const FLUSH: OperationKind = OperationKind {
    code: "spark.netpoll.flush_timeout",
    message: "flush",
};
pub const REGISTER: OperationKind = OperationKind {
    code: "spark.netpoll.register_failed",
    message: "register",
};
pub const CONTROL: OperationKind = OperationKind {
    code: "spark.netpoll.control_failed",
    message: "control",
};
pub const DIAL: OperationKind = OperationKind {
    code: "spark.netpoll.dial_failed",
    message: "dial",
};
pub const LISTEN: OperationKind = OperationKind {
    code: "spark.netpoll.listen_failed",
    message: "listen",
};
pub const POLLER: OperationKind = OperationKind {
    code: "spark.netpoll.poller_failed",
    message: "poller",
};

/// 稳定错误码。
pub mod codes {
    pub const INSUFFICIENT_DATA: &str = "spark.netpoll.insufficient_data";
    pub const CLOSED_LOCAL: &str = "spark.netpoll.closed_local";
    pub const CLOSED_PEER: &str = "spark.netpoll.closed_peer";
    pub const CALLBACK_PANIC: &str = "spark.netpoll.callback_panic";
    pub const INVALID_STATE: &str = "spark.netpoll.invalid_state";
    pub const BUFFER: &str = "spark.netpoll.buffer";
    pub const CONFIG: &str = "spark.netpoll.config";
}

/// 连接关闭的发起方。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// 应用调用了 `close`。
    Local,
    /// 对端关闭或连接出错，由轮询线程发现。
    Peer,
}

/// 引擎对外的统一错误。
///
/// # 契约（What）
/// - 连接上的读写从不暴露原始 OS 错误：对端关闭、`EPIPE` 等一律归为 `ConnectionClosed`；
/// - `Timeout` 仅在设置了读/写超时或截止时间时出现，连接仍保持活跃，可重试；
/// - `Registration` 表示多路复用器拒绝了 fd 的登记或关注变更，对该连接是致命的；
/// - `Io` 只出现在建立阶段（监听、拨号、创建轮询器），携带具体操作。
#[derive(Debug, Error)]
pub enum NetpollError {
    #[error("insufficient data: requested {requested} bytes but only {available} readable")]
    InsufficientData { requested: usize, available: usize },
    #[error("{} timed out", .operation.message)]
    Timeout { operation: OperationKind },
    #[error("connection closed ({reason:?})")]
    ConnectionClosed { reason: CloseReason },
    #[error("{} rejected by multiplexer: {source}", .operation.message)]
    Registration {
        operation: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", .operation.message)]
    Io {
        operation: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("callback panicked: {message}")]
    CallbackPanic { message: String },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Buffer(BufferError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl NetpollError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => codes::INSUFFICIENT_DATA,
            Self::Timeout { operation }
            | Self::Registration { operation, .. }
            | Self::Io { operation, .. } => operation.code,
            Self::ConnectionClosed {
                reason: CloseReason::Local,
            } => codes::CLOSED_LOCAL,
            Self::ConnectionClosed {
                reason: CloseReason::Peer,
            } => codes::CLOSED_PEER,
            Self::CallbackPanic { .. } => codes::CALLBACK_PANIC,
            Self::InvalidState(_) => codes::INVALID_STATE,
            Self::Buffer(_) => codes::BUFFER,
            Self::Config(_) => codes::CONFIG,
        }
    }

    /// 连接是否已不可用。超时与数据不足可以重试，关闭与回调异常不行。
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. } | Self::CallbackPanic { .. }
        )
    }

    pub(crate) fn closed(reason: CloseReason) -> Self {
        Self::ConnectionClosed { reason }
    }

    pub(crate) fn timeout(operation: OperationKind) -> Self {
        Self::Timeout { operation }
    }

    pub(crate) fn io(operation: OperationKind, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    pub(crate) fn registration(operation: OperationKind, source: io::Error) -> Self {
        Self::Registration { operation, source }
    }
}

impl From<BufferError> for NetpollError {
    fn from(error: BufferError) -> Self {
        match error {
            BufferError::InsufficientData {
                requested,
                available,
            } => Self::InsufficientData {
                requested,
                available,
            },
            other => Self::Buffer(other),
        }
    }
}

/// 从 `catch_unwind` 的载荷中提取可读文案。
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
