//! 链路统计
//!
//! 瞬时错误与完整性错误不向上层返回，只在这里计数。

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SdpcmStats {
    /// 发送成功的数据帧
    pub tx_frames: u64,
    /// 合并写次数
    pub tx_batches: u64,
    /// 发送控制帧
    pub tx_ctrl: u64,
    /// 发送失败（重试用尽后丢弃）
    pub tx_errors: u64,
    /// 发送写入错误（含重试）
    pub tx_sderrs: u64,
    /// 队列满而丢弃
    pub tx_qfull: u64,
    /// 因窗口关闭而推迟发送
    pub tx_window_closed: u64,
    /// 交付给上层的帧
    pub rx_frames: u64,
    /// 收到的控制帧
    pub rx_ctrl: u64,
    /// 晚到或无人认领的控制响应
    pub ctrl_late: u64,
    /// 控制请求超时
    pub ctrl_timeouts: u64,
    /// 帧头校验失败
    pub rx_badhdr: u64,
    /// 读头失败
    pub rx_hdrfail: u64,
    /// 帧读失败
    pub rx_readerr: u64,
    /// 序号不连续（已重新同步）
    pub rx_badseq: u64,
    /// 帧过长
    pub rx_toolong: u64,
    /// 预读长度与实际不符
    pub rx_hint_mismatch: u64,
    /// 预读命中
    pub rx_readahead: u64,
    /// 接收缓冲分配失败
    pub rx_nomem: u64,
    /// 终止帧次数
    pub rx_term: u64,
    /// NAK 次数
    pub rxrtx: u64,
    /// 聚合帧成功数与其中子帧数
    pub rx_glom: u64,
    pub rx_glom_frames: u64,
    /// 聚合描述符被拒
    pub rx_glom_baddesc: u64,
    /// 聚合帧整组丢弃
    pub rx_glom_fail: u64,
    /// 对端流控置位/清除/变化次数
    pub fc_xoff: u64,
    pub fc_xon: u64,
    pub fc_rcvd: u64,
    /// 窗口上限不可信而被钳位
    pub window_clamps: u64,
    /// 中断次数、看门狗补查次数
    pub intrcount: u64,
    pub pollcnt: u64,
    /// 读/写失步
    pub rd_oosync: u64,
    pub wr_oosync: u64,
    /// 时钟 Pending 超时
    pub clk_pending_timeouts: u64,
    /// 寄存器访问失败
    pub reg_errors: u64,
    /// 邮箱未确认
    pub mailbox_unacked: u64,
    /// 睡眠/唤醒次数
    pub sleeps: u64,
    pub wakes: u64,
    /// DPC 次数
    pub dpc_runs: u64,
}
