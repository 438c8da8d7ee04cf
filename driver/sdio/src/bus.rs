//! SdioBus：引擎消费的总线接口
//!
//! 帧数据走 Function 2 FIFO（`F2_FIFO_ADDR`，地址不递增）；固件下载走 Function 1 背板窗口（地址递增）。
//! 寄存器用一个 u32 偏移空间统一编址，见 [`crate::reg`]。

use alloc::boxed::Box;
use core::ops::BitOr;

use crate::error::{BusError, BusResult};
use crate::reg;

/// 默认 F2 块大小
pub const SDIO_FUNC_BLOCKSIZE: usize = 512;

/// F2 帧 FIFO 地址
pub const F2_FIFO_ADDR: u32 = 0;

/// 块传输标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XferFlags(u32);

impl XferFlags {
    /// F2 帧 FIFO（固定地址）
    pub const FIFO: Self = Self(1 << 0);
    /// F1 背板内存（递增地址）
    pub const BACKPLANE: Self = Self(1 << 1);
    /// 同步等待完成
    pub const SYNC: Self = Self(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for XferFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 中断回调。在中断上下文调用，不得阻塞或访问总线。
pub type IrqHandler = Box<dyn Fn() + Send + Sync>;

/// 总线传输接口。实现方负责 CMD52/CMD53 细节、背板窗口切换与块/字节模式选择。
pub trait SdioBus: Send {
    /// 从 `addr` 读满 `buf`。
    fn read(&mut self, addr: u32, buf: &mut [u8], flags: XferFlags) -> BusResult<()>;

    /// 把 `buf` 写到 `addr`。
    fn write(&mut self, addr: u32, buf: &[u8], flags: XferFlags) -> BusResult<()>;

    /// 分散读：一次传输依次填满 `bufs` 中每个切片。
    fn read_sg(&mut self, _addr: u32, _bufs: &mut [&mut [u8]], _flags: XferFlags) -> BusResult<()> {
        Err(BusError::Unsupported)
    }

    /// 是否支持 [`SdioBus::read_sg`]。
    fn supports_sg(&self) -> bool {
        false
    }

    /// 读寄存器。
    fn read_register(&mut self, offset: u32) -> BusResult<u32>;

    /// 写寄存器。
    fn write_register(&mut self, offset: u32, value: u32) -> BusResult<()>;

    /// 登记或注销中断回调。
    fn set_interrupt_handler(&mut self, handler: Option<IrqHandler>);

    /// 中止 F2 上正在进行的传输（写 CCCR IOABORT）。
    fn abort(&mut self) -> BusResult<()> {
        self.write_register(reg::CCCR_IOABORT, reg::IOABORT_F2)
    }

    /// F2 块大小。
    fn block_size(&self) -> usize {
        SDIO_FUNC_BLOCKSIZE
    }

    /// 打开/关闭 SD 总线时钟；没有独立门控的传输层直接返回成功。
    fn set_bus_clock(&mut self, _on: bool) -> BusResult<()> {
        Ok(())
    }
}
