//! # Dataset CLI
//!
//! `generate_dataset` 的库部分：参数定义、命令实现与作业编排。
//!
//! 提供：
//! - 种子表 → 序列计划 → 录制 → 归档 → 账本 的完整作业
//! - 断点续跑 (已存在的归档直接跳过)
//! - Ctrl-C / SIGTERM 协作取消

pub mod cli;
pub mod commands;
pub mod pipeline;

pub use pipeline::{DatasetDriver, JobStats};
