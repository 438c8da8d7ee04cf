//! 总线错误

use core::fmt;

use axerrno::AxError;

/// 总线传输错误。`Timeout`、`Nak`、`Crc` 属于可重试的瞬时错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// 命令或数据阶段超时
    Timeout,
    /// 设备拒绝本次传输
    Nak,
    /// 数据 CRC 校验失败
    Crc,
    /// 卡不在或功能未使能
    NoDevice,
    /// 传输层不支持该操作（如分散读）
    Unsupported,
    /// 其它 I/O 错误，携带负 errno
    Io(i32),
}

pub type BusResult<T> = Result<T, BusError>;

impl BusError {
    /// 是否值得原样重试。
    pub fn is_transient(self) -> bool {
        matches!(self, BusError::Timeout | BusError::Nak | BusError::Crc)
    }

    /// 对应的负 errno。
    pub fn errno(self) -> i32 {
        match self {
            BusError::Timeout => -110, // ETIMEDOUT
            BusError::Nak => -11,      // EAGAIN
            BusError::Crc => -84,      // EILSEQ
            BusError::NoDevice => -19, // ENODEV
            BusError::Unsupported => -95,
            BusError::Io(e) => e,
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Timeout => write!(f, "bus timeout"),
            BusError::Nak => write!(f, "device NAK"),
            BusError::Crc => write!(f, "data CRC error"),
            BusError::NoDevice => write!(f, "no device"),
            BusError::Unsupported => write!(f, "operation not supported by transport"),
            BusError::Io(e) => write!(f, "bus I/O error {}", e),
        }
    }
}

impl From<BusError> for AxError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::NoDevice => AxError::BadState,
            BusError::Unsupported => AxError::Unsupported,
            _ => AxError::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BusError::Timeout.is_transient());
        assert!(BusError::Crc.is_transient());
        assert!(!BusError::NoDevice.is_transient());
        assert_eq!(BusError::Io(-5).errno(), -5);
        assert_eq!(AxError::from(BusError::NoDevice), AxError::BadState);
    }
}
