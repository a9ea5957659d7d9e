//! 转换错误类型

use thiserror::Error;

/// 转换过程中的所有错误
///
/// 任何错误都会中止整个转换，不产生部分输出。
#[derive(Debug, Error)]
pub enum ConvertError {
    /// 容器或 NBT 数据损坏 / 不受支持
    #[error("格式错误: {0}")]
    Format(String),

    /// 调色板之前的旧版存档格式
    #[error("不支持的存档版本: {0}")]
    UnsupportedVersion(String),

    /// 一个或多个无效的替换目标（汇总后一次性报告）
    #[error("替换规则无效:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    /// 结构尺寸超过 250x250
    #[error("结构过大 ({width}x{length})，单个 McStructure 最大 {limit}x{limit}")]
    SizeLimit { width: u32, length: u32, limit: u32 },

    /// 没有生成任何操作
    #[error("结果为空: {0}")]
    EmptyResult(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("压缩包错误: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl ConvertError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ConvertError::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
