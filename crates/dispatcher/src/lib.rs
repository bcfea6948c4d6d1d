//! # Dispatcher
//!
//! 序列输出模块。
//!
//! 负责：
//! - 将冻结的 `Sequence` 序列化为压缩归档 (`.npz` 风格的 ZIP + `.npy` 成员)
//! - 临时文件 + fsync + 原子重命名，失败时不留残留
//! - 完成账本 (`metadata.csv`) 的追加与断点续跑判断

pub mod archive;
pub mod error;
pub mod ledger;
pub mod npy;

pub use archive::{ArchiveLayout, ArchiveReader, ArchiveWriter, FORMAT_VERSION};
pub use contracts::{ArchiveSummary, SequenceSink};
pub use error::DispatcherError;
pub use ledger::{CompletionLedger, LedgerRow, METADATA_FILE, MOCK_MARKER};
pub use npy::NpyArray;
