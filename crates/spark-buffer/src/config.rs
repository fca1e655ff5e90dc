use serde::Deserialize;

use crate::error::{BufferError, Result};

/// 默认段长：4 KiB，与常见页大小一致。
pub const DEFAULT_SEGMENT_SIZE: usize = 4 * 1024;
/// 默认零拷贝阈值：超过该长度的外部字节以共享段挂接，不再复制。
pub const DEFAULT_NOCOPY_THRESHOLD: usize = 4 * 1024;
/// 默认尾段切换阈值：提交后若写段容量超过该值则换新段，使大块内存随读取尽快释放。
pub const DEFAULT_MAX_TAIL_CAPACITY: usize = 8 * 1024;

/// 链式缓冲的可调参数。
///
/// # 契约（What）
/// - 三个字段均须大于 0，由 [`BufferConfig::validate`] 校验；
/// - 反序列化时缺省字段取默认值，便于在上层配置文件中只覆盖关心的项。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    pub segment_size: usize,
    pub nocopy_threshold: usize,
    pub max_tail_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            nocopy_threshold: DEFAULT_NOCOPY_THRESHOLD,
            max_tail_capacity: DEFAULT_MAX_TAIL_CAPACITY,
        }
    }
}

impl BufferConfig {
    /// 以指定段长构造配置，其余取默认值。测试中常用较小段长制造跨段场景。
    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            segment_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(BufferError::InvalidArgument("segment_size must be positive"));
        }
        if self.nocopy_threshold == 0 {
            return Err(BufferError::InvalidArgument(
                "nocopy_threshold must be positive",
            ));
        }
        if self.max_tail_capacity == 0 {
            return Err(BufferError::InvalidArgument(
                "max_tail_capacity must be positive",
            ));
        }
        Ok(())
    }
}
