//! # sdio-bus：SDIO 总线传输契约
//!
//! SDPCM 引擎只通过本 crate 的 [`SdioBus`] 访问设备：
//!
//! | 模块 | 说明 |
//! |------|------|
//! | bus  | `SdioBus`：FIFO/背板的块读写、寄存器读写、中断回调登记、中止 |
//! | reg  | 寄存器偏移与位定义（中断状态、邮箱、时钟控制、帧控制） |
//! | error | `BusError` 与到 `AxError` 的映射 |
//!
//! 所有调用都是同步的；调用线程可能在其中阻塞，但引擎保证同一时刻只有一个上下文在用总线。

#![no_std]

extern crate alloc;

mod bus;
mod error;
pub mod reg;

pub use bus::{IrqHandler, SdioBus, XferFlags, F2_FIFO_ADDR, SDIO_FUNC_BLOCKSIZE};
pub use error::{BusError, BusResult};
