//! # sdpcm：SDIO 链路协议引擎
//!
//! 在一条半双工、可断电的 SDIO 总线上收发 SDPCM 帧：
//!
//! | 模块 | 说明 |
//! |------|------|
//! | codec | 帧头编解码（长度 + 反码、序号、通道、data_offset、流控位、下一帧长度提示、窗口） |
//! | credit | 发送序号与对端窗口、按优先级的流控位 |
//! | txq | 多优先级发送队列、水位背压、发送路径（单帧/合并写、失败重试） |
//! | rx / glom | 接收泵：长度提示/探测读、通道分发、失败重同步；聚合帧读取与校验 |
//! | power | Off / BusClockOnly / Pending / FullClockAvailable 与睡眠握手 |
//! | dpc | 中断、DPC、看门狗 |
//! | ctrl | 控制请求与响应匹配 |
//! | bootstrap / nvram | 固件与参数下载、总线初始化 |
//!
//! 协议状态由一把锁保护，只有 DPC（以及持锁的下载/初始化/时钟请求）会访问总线。

#![no_std]

extern crate alloc;

mod bootstrap;
pub mod codec;
mod config;
mod credit;
mod ctrl;
mod dpc;
mod engine;
mod error;
mod glom;
mod link;
pub mod nvram;
mod os;
mod power;
mod rx;
mod stats;
mod txq;

pub use codec::{Channel, Frame, SdpcmHeader, SDPCM_HDRLEN};
pub use config::SdpcmConfig;
pub use credit::CreditController;
pub use ctrl::CTRL_ID_LEN;
pub use engine::{LinkConsumer, Sdpcm};
pub use error::{FrameError, SdpcmError};
pub use glom::parse_descriptor;
pub use link::{BusState, LinkSnapshot};
pub use os::{Deadline, OsServices};
pub use power::ClockState;
pub use rx::FIRST_READ;
pub use stats::SdpcmStats;
pub use txq::{prio_to_prec, TxFrame, TxQueue};
