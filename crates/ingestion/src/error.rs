//! Ingestion 错误类型

use contracts::{ContractError, SensorKind};
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestionError {
    /// 原始载荷无法解码
    #[error("failed to decode {sensor} payload: {message}")]
    PayloadDecode { sensor: SensorKind, message: String },

    /// 帧流重复交付或时间戳不递增
    #[error("{sensor} stream desynchronized at simulator frame {frame}: {message}")]
    FrameDesync {
        sensor: SensorKind,
        /// 仿真器帧号
        frame: u64,
        message: String,
    },
}

impl IngestionError {
    pub fn decode(sensor: SensorKind, message: impl Into<String>) -> Self {
        Self::PayloadDecode {
            sensor,
            message: message.into(),
        }
    }

    pub fn desync(sensor: SensorKind, frame: u64, message: impl Into<String>) -> Self {
        Self::FrameDesync {
            sensor,
            frame,
            message: message.into(),
        }
    }

    /// 转换为共享错误，`tick` 为录制阶段的 tick 序号
    pub fn into_contract(self, tick: u64) -> ContractError {
        match self {
            Self::PayloadDecode { sensor, message } => ContractError::payload_decode(sensor, message),
            Self::FrameDesync {
                sensor,
                frame,
                message,
            } => ContractError::frame_desync(sensor, tick, format!("frame {frame}: {message}")),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
