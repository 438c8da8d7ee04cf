//! StarryOS wireless crate
//!
//! 无线协处理器的 SDIO 链路：
//! - `skb`: 包缓冲与多优先级队列
//! - `sdio_bus`: 总线传输契约与寄存器定义
//! - `sdpcm`: SDPCM 链路协议引擎
//!
//! [`LinkDriver`] 把下载、总线初始化、起线程串成一次上电流程。

#![no_std]

extern crate alloc;

use alloc::sync::Arc;

use axerrno::AxResult;

pub use sdio_bus;
pub use sdpcm;
pub use skb;

use sdio_bus::SdioBus;
use sdpcm::{LinkConsumer, OsServices, Sdpcm, SdpcmConfig};

/// 链路驱动上下文
///
/// 平台初始化时用具体的总线与平台服务创建，上电后把 [`LinkDriver::engine`] 交给上层收发。
pub struct LinkDriver<B: SdioBus + 'static, O: OsServices> {
    engine: Arc<Sdpcm<B, O>>,
}

impl<B: SdioBus + 'static, O: OsServices> LinkDriver<B, O> {
    pub fn new(bus: B, os: O, cfg: SdpcmConfig, consumer: Arc<dyn LinkConsumer>) -> AxResult<Self> {
        let engine = Sdpcm::new(bus, os, cfg, consumer)?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<Sdpcm<B, O>> {
        &self.engine
    }

    /// 上电：下载固件与参数 → 总线初始化 → 起 DPC 与看门狗。
    pub fn power_on(&self, firmware: &[u8], nvram: &[u8]) -> AxResult<()> {
        log::info!(target: "wireless", "power_on: firmware {} bytes, nvram {} bytes", firmware.len(), nvram.len());
        self.engine.download(firmware, nvram)?;
        self.engine.bus_init()?;
        self.engine.start()?;
        log::info!(target: "wireless", "power_on: link up");
        Ok(())
    }

    /// 断电：停线程、关中断与时钟。
    pub fn power_off(&self) -> AxResult<()> {
        self.engine.bus_stop()?;
        log::info!(target: "wireless", "power_off: link down");
        Ok(())
    }
}
