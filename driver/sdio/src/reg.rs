//! 寄存器偏移与位定义
//!
//! 偏移空间：
//! - `0x0000_00xx`：SDIO core 寄存器（经 F1 背板访问，32 位）
//! - `0x0001_00xx`：F1 配置寄存器（8 位，读回值放在低字节）
//! - `0x0002_00xx`：F0 CCCR（8 位）
//! - `0x1810_xxxx`：处理器核 wrapper

/// SDIO core：中断状态（写 1 清零）
pub const INTSTATUS: u32 = 0x20;
/// SDIO core：主机中断屏蔽
pub const HOSTINTMASK: u32 = 0x24;
/// SDIO core：主机到设备邮箱
pub const TOSBMAILBOX: u32 = 0x40;
/// SDIO core：主机到设备邮箱数据
pub const TOSBMAILBOXDATA: u32 = 0x48;
/// SDIO core：设备到主机邮箱数据
pub const TOHOSTMAILBOXDATA: u32 = 0x4C;

/// F1：帧控制
pub const FRAMECTRL: u32 = 0x1_000D;
/// F1：芯片时钟控制/状态
pub const CHIPCLKCSR: u32 = 0x1_000E;
/// F1：写帧剩余字节数高/低
pub const WFRAMEBCHI: u32 = 0x1_0019;
pub const WFRAMEBCLO: u32 = 0x1_001A;
/// F1：读帧剩余字节数高/低
pub const RFRAMEBCHI: u32 = 0x1_001B;
pub const RFRAMEBCLO: u32 = 0x1_001C;

/// F0 CCCR：中断挂起
pub const CCCR_INTPEND: u32 = 0x2_0005;
/// F0 CCCR：I/O 中止
pub const CCCR_IOABORT: u32 = 0x2_0006;
/// IOABORT 写入值：中止 F2
pub const IOABORT_F2: u32 = 2;
/// INTPEND 位：F1/F2 有中断
pub const INTPEND_F1: u32 = 1 << 1;
pub const INTPEND_F2: u32 = 1 << 2;

/// 处理器核 wrapper 复位控制；写 1 保持复位，写 0 释放
pub const CPU_RESETCTRL: u32 = 0x1810_3800;
pub const CPU_IN_RESET: u32 = 1;

/// INTSTATUS / HOSTINTMASK 位
pub mod intr {
    /// 设备侧流控状态
    pub const HMB_FC_STATE: u32 = 1 << 4;
    /// 设备侧流控状态变化
    pub const HMB_FC_CHANGE: u32 = 1 << 5;
    /// 有帧可读
    pub const HMB_FRAME_IND: u32 = 1 << 6;
    /// 邮箱杂项中断，详情见 TOHOSTMAILBOXDATA
    pub const HMB_HOST_INT: u32 = 1 << 7;
    /// 写帧失步
    pub const WR_OOSYNC: u32 = 1 << 8;
    /// 读帧失步
    pub const RD_OOSYNC: u32 = 1 << 9;
    /// 芯片已激活（高速时钟可用）
    pub const CHIPACTIVE: u32 = 1 << 29;

    /// 正常运行时打开的中断
    pub const HOSTINTMASK: u32 = HMB_FC_CHANGE | HMB_FRAME_IND | HMB_HOST_INT;
}

/// TOSBMAILBOX 位
pub mod smb {
    /// 请求重传当前帧
    pub const NAK: u32 = 1 << 0;
    /// 中断应答
    pub const INT_ACK: u32 = 1 << 1;
    /// 让设备改用带外唤醒（进入睡眠）
    pub const USE_OOB: u32 = 1 << 2;
    /// 杂项中断，配合 TOSBMAILBOXDATA
    pub const DEV_INT: u32 = 1 << 3;
}

/// TOHOSTMAILBOXDATA 位
pub mod hmb {
    /// 设备已处理 NAK
    pub const NAKHANDLED: u32 = 1 << 0;
    /// 设备就绪
    pub const DEVREADY: u32 = 1 << 1;
    /// 流控状态更新
    pub const FC: u32 = 1 << 2;
    /// 固件就绪
    pub const FWREADY: u32 = 1 << 3;
    /// 协议版本
    pub const VERSION_MASK: u32 = 0x00ff_0000;
    pub const VERSION_SHIFT: u32 = 16;
    /// FC 置位时携带的流控位图
    pub const FCDATA_MASK: u32 = 0xff00_0000;
    pub const FCDATA_SHIFT: u32 = 24;
    /// 已定义的全部位
    pub const KNOWN: u32 = NAKHANDLED | DEVREADY | FC | FWREADY | VERSION_MASK | FCDATA_MASK;
}

/// CHIPCLKCSR 位
pub mod clk {
    pub const FORCE_ALP: u32 = 0x01;
    /// 强制高速时钟
    pub const FORCE_HT: u32 = 0x02;
    pub const FORCE_ILP: u32 = 0x04;
    pub const ALP_AVAIL_REQ: u32 = 0x08;
    /// 请求高速时钟
    pub const HT_AVAIL_REQ: u32 = 0x10;
    /// 关闭硬件时钟请求（睡眠时置位）
    pub const FORCE_HW_CLKREQ_OFF: u32 = 0x20;
    pub const ALP_AVAIL: u32 = 0x40;
    /// 高速时钟已可用
    pub const HT_AVAIL: u32 = 0x80;
}

/// FRAMECTRL 位
pub mod framectrl {
    /// 终止当前读帧
    pub const RF_TERM: u32 = 1 << 0;
    /// 终止当前写帧
    pub const WF_TERM: u32 = 1 << 1;
}
