//! 错误分类
//!
//! 只有总线失效（`BusDown`）与控制请求超时（`Timeout`）会出现在上层调用的返回值里；
//! 帧完整性与瞬时总线错误在引擎内部处理，只体现在统计计数上。

use core::fmt;

use axerrno::AxError;
use sdio_bus::BusError;

/// 帧编解码错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// 缓冲不足，至少需要 `needed` 字节
    Incomplete { needed: usize },
    /// 长度与其反码不匹配
    Checksum { len: u16, check: u16 },
    /// 声明长度小于头长度
    TooShort(u16),
    /// 帧超过编码上限
    TooLong(usize),
    /// data_offset 不在 [头长度, 帧长度] 内
    BadOffset { offset: u8, len: u16 },
    /// 未定义的通道号
    UnknownChannel(u8),
    /// 当前位置不允许出现的通道
    UnexpectedChannel(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Incomplete { needed } => write!(f, "incomplete frame, need {} bytes", needed),
            FrameError::Checksum { len, check } => {
                write!(f, "frame tag mismatch len=0x{:04x} check=0x{:04x}", len, check)
            }
            FrameError::TooShort(len) => write!(f, "frame length {} below header size", len),
            FrameError::TooLong(len) => write!(f, "frame length {} exceeds u16", len),
            FrameError::BadOffset { offset, len } => {
                write!(f, "data offset {} out of range for length {}", offset, len)
            }
            FrameError::UnknownChannel(c) => write!(f, "unknown channel {}", c),
            FrameError::UnexpectedChannel(c) => write!(f, "unexpected channel {}", c),
        }
    }
}

/// 引擎错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpcmError {
    /// 发送队列已满，帧未入队
    QueueFull,
    /// 控制帧槽位或等待槽位被占用，或睡眠条件不满足
    Busy,
    /// 总线已失效，需外部复位
    BusDown,
    /// 链路尚未 bus_init
    NotReady,
    /// 等待超时
    Timeout,
    /// 分配失败
    NoMemory,
    /// 参数非法
    InvalidInput,
    /// 总线传输错误
    Bus(BusError),
    /// 帧格式错误
    Frame(FrameError),
}

impl fmt::Display for SdpcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpcmError::QueueFull => write!(f, "transmit queue full"),
            SdpcmError::Busy => write!(f, "resource busy"),
            SdpcmError::BusDown => write!(f, "bus down"),
            SdpcmError::NotReady => write!(f, "link not initialised"),
            SdpcmError::Timeout => write!(f, "timed out"),
            SdpcmError::NoMemory => write!(f, "out of memory"),
            SdpcmError::InvalidInput => write!(f, "invalid input"),
            SdpcmError::Bus(e) => write!(f, "{}", e),
            SdpcmError::Frame(e) => write!(f, "{}", e),
        }
    }
}

impl From<BusError> for SdpcmError {
    fn from(e: BusError) -> Self {
        SdpcmError::Bus(e)
    }
}

impl From<FrameError> for SdpcmError {
    fn from(e: FrameError) -> Self {
        SdpcmError::Frame(e)
    }
}

impl From<SdpcmError> for AxError {
    fn from(e: SdpcmError) -> Self {
        match e {
            SdpcmError::QueueFull | SdpcmError::Busy => AxError::WouldBlock,
            SdpcmError::BusDown | SdpcmError::NotReady => AxError::BadState,
            SdpcmError::NoMemory => AxError::NoMemory,
            SdpcmError::InvalidInput | SdpcmError::Frame(_) => AxError::InvalidInput,
            SdpcmError::Bus(b) => b.into(),
            SdpcmError::Timeout => AxError::Io,
        }
    }
}
