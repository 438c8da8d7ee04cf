//! 链路参数
//!
//! 由嵌入方在代码中构造；`Default` 给出常用取值。

use crate::error::SdpcmError;

/// 每次 DPC 最多接收帧数
pub const DEFAULT_RX_BOUND: usize = 50;
/// 每次 DPC 最多发送帧数
pub const DEFAULT_TX_BOUND: usize = 20;
/// 排队帧数达到该值时合并成一次总线写
pub const DEFAULT_TX_MIN_BATCH: usize = 4;
/// 发送队列总长度
pub const DEFAULT_TXQ_LEN: usize = 2048;
/// 单帧（含头）上限
pub const MAX_RX_DATASZ: usize = 2048;
/// 控制帧（含头）上限
pub const MAX_CTRL_LEN: usize = 2048;
/// 聚合帧总长上限
pub const MAX_GLOM_LEN: usize = 32 * 1024;
/// 控制请求默认超时
pub const CTRL_TIMEOUT_MS: u64 = 2000;
/// 看门狗周期
pub const WATCHDOG_MS: u64 = 10;
/// 高速时钟等待上限
pub const HT_AVAIL_TIMEOUT_MS: u64 = 1000;
/// 合并写的字节上限
pub const TX_BATCH_MAX_BYTES: usize = 16 * 1024;
/// 固件下载块大小
pub const DOWNLOAD_CHUNK: usize = 2048;

#[derive(Debug, Clone)]
pub struct SdpcmConfig {
    pub rx_bound: usize,
    pub tx_bound: usize,
    pub tx_min_batch: usize,
    pub tx_batch_max_bytes: usize,
    /// 发送队列总长度与单优先级长度（0 = 不单独限制）
    pub txq_len: usize,
    pub txq_prec_len: usize,
    /// 高/低水位：达到高水位通知上层暂停，低于低水位恢复
    pub txq_hiwat: usize,
    pub txq_lowat: usize,
    /// 上电后对端许可前可用的发送窗口
    pub initial_tx_window: u8,
    pub max_rx_frame: usize,
    pub max_ctrl_len: usize,
    pub max_glom_len: usize,
    pub ctrl_timeout_ms: u64,
    pub watchdog_ms: u64,
    /// 多久没有看到中断就主动查一次 INTPEND
    pub poll_interval_ms: u64,
    /// 无总线活动多久后降时钟；0 关闭
    pub idle_timeout_ms: u64,
    /// 空闲时进入总线睡眠而不只是降到 BusClockOnly
    pub sleep_on_idle: bool,
    pub ht_avail_timeout_ms: u64,
    /// Pending 状态最长停留时间，超时后看门狗改为阻塞请求
    pub clk_pending_timeout_ms: u64,
    /// 邮箱写入后确认轮询次数
    pub mailbox_retry_limit: u32,
    /// 终止帧后等待字节计数归零的轮询次数
    pub frame_drain_polls: u32,
    /// 寄存器访问的瞬时错误重试次数
    pub reg_retries: u32,
    /// 发送失败重试次数
    pub tx_retries: u32,
    /// 聚合帧读取/校验失败后请求重传的次数
    pub glom_retry_limit: u32,
    /// 连续寄存器失败达到该值即判定总线失效
    pub reg_fail_limit: u32,
    /// 设备内存基址与大小（下载用）
    pub ram_base: u32,
    pub ram_size: u32,
    pub download_chunk: usize,
    pub verify_download: bool,
}

impl Default for SdpcmConfig {
    fn default() -> Self {
        Self {
            rx_bound: DEFAULT_RX_BOUND,
            tx_bound: DEFAULT_TX_BOUND,
            tx_min_batch: DEFAULT_TX_MIN_BATCH,
            tx_batch_max_bytes: TX_BATCH_MAX_BYTES,
            txq_len: DEFAULT_TXQ_LEN,
            txq_prec_len: 0,
            txq_hiwat: DEFAULT_TXQ_LEN - 256,
            txq_lowat: DEFAULT_TXQ_LEN - 512,
            initial_tx_window: 4,
            max_rx_frame: MAX_RX_DATASZ,
            max_ctrl_len: MAX_CTRL_LEN,
            max_glom_len: MAX_GLOM_LEN,
            ctrl_timeout_ms: CTRL_TIMEOUT_MS,
            watchdog_ms: WATCHDOG_MS,
            poll_interval_ms: 10 * WATCHDOG_MS,
            idle_timeout_ms: 5 * WATCHDOG_MS,
            sleep_on_idle: false,
            ht_avail_timeout_ms: HT_AVAIL_TIMEOUT_MS,
            clk_pending_timeout_ms: 200,
            mailbox_retry_limit: 2,
            frame_drain_polls: 64,
            reg_retries: 2,
            tx_retries: 2,
            glom_retry_limit: 3,
            reg_fail_limit: 8,
            ram_base: 0,
            ram_size: 0x8_0000,
            download_chunk: DOWNLOAD_CHUNK,
            verify_download: false,
        }
    }
}

impl SdpcmConfig {
    /// 检查参数之间的约束。
    pub fn validate(&self) -> Result<(), SdpcmError> {
        let ok = self.rx_bound > 0
            && self.tx_bound > 0
            && self.tx_min_batch > 0
            && self.txq_len > 0
            && self.txq_lowat < self.txq_hiwat
            && self.txq_hiwat <= self.txq_len
            && self.initial_tx_window < 0x80
            && self.max_rx_frame >= crate::codec::SDPCM_HDRLEN
            && self.max_rx_frame <= u16::MAX as usize
            && self.max_ctrl_len > crate::codec::SDPCM_HDRLEN
            && self.watchdog_ms > 0
            && self.download_chunk > 0
            && self.download_chunk % 4 == 0
            && self.ram_size >= 8
            && self.ram_size % 4 == 0
            && self.ram_base.checked_add(self.ram_size).is_some();
        if ok {
            Ok(())
        } else {
            log::error!(target: "sdpcm", "invalid link configuration: {:?}", self);
            Err(SdpcmError::InvalidInput)
        }
    }
}
