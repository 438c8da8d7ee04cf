//! 协议状态域
//!
//! 所有可变协议状态都在 `Link` 里，由 `Sdpcm` 的一把自旋锁保护；只有持锁的一方能碰总线。
//! 要交给上层的帧和背压事件先攒在 [`Outbox`]，解锁后再派发。

use alloc::vec::Vec;

use sdio_bus::{BusError, SdioBus};
use skb::SkBuff;

use crate::codec::Channel;
use crate::config::SdpcmConfig;
use crate::credit::CreditController;
use crate::ctrl::CtrlState;
use crate::error::SdpcmError;
use crate::power::{ClockState, PowerState};
use crate::rx::RxState;
use crate::stats::SdpcmStats;
use crate::txq::TxQueue;

/// 总线生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// 未初始化，或已失效
    Down,
    /// 固件下载中
    Load,
    /// 可收发
    Up,
}

/// 待派发给上层的事件
#[derive(Default)]
pub(crate) struct Outbox {
    pub frames: Vec<(Channel, SkBuff)>,
    pub backpressure: Vec<bool>,
}

/// 链路状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub bus_state: BusState,
    pub bus_down: bool,
    pub clock: ClockState,
    pub sleeping: bool,
    pub tx_seq: u8,
    pub tx_window: u8,
    pub flow_bits: u8,
    pub rx_seq: u8,
    pub rx_skip: bool,
    pub fcstate: bool,
    pub txq_len: usize,
    pub backpressure: bool,
}

pub(crate) struct Link<B> {
    pub bus: B,
    pub cfg: SdpcmConfig,
    pub state: BusState,
    /// 连续寄存器失败达到上限后锁存
    pub down: bool,
    pub power: PowerState,
    pub credit: CreditController,
    pub txq: TxQueue,
    pub rx: RxState,
    pub ctrl: CtrlState,
    pub stats: SdpcmStats,
    pub hostintmask: u32,
    /// 尚未处理完的中断状态
    pub intstatus: u32,
    /// 设备级流控（FC_STATE）
    pub fcstate: bool,
    pub reg_fails: u32,
    /// 看门狗上次补查时看到的中断计数
    pub lastintrs: u64,
    pub last_poll_ms: u64,
    pub out: Outbox,
}

impl<B: SdioBus> Link<B> {
    pub fn new(bus: B, cfg: SdpcmConfig) -> Self {
        Self {
            bus,
            credit: CreditController::new(cfg.initial_tx_window),
            txq: TxQueue::new(&cfg),
            cfg,
            state: BusState::Down,
            down: false,
            power: PowerState::default(),
            rx: RxState::default(),
            ctrl: CtrlState::new(),
            stats: SdpcmStats::default(),
            hostintmask: 0,
            intstatus: 0,
            fcstate: false,
            reg_fails: 0,
            lastintrs: 0,
            last_poll_ms: 0,
            out: Outbox::default(),
        }
    }

    /// 读寄存器；瞬时错误重试，失败计入总线失效判定。
    pub fn r_reg(&mut self, offset: u32) -> Result<u32, SdpcmError> {
        let mut attempt = 0;
        loop {
            match self.bus.read_register(offset) {
                Ok(v) => {
                    self.reg_fails = 0;
                    return Ok(v);
                }
                Err(e) if e.is_transient() && attempt < self.cfg.reg_retries => attempt += 1,
                Err(e) => return Err(self.reg_failed("read", offset, e)),
            }
        }
    }

    /// 写寄存器，规则同 [`Link::r_reg`]。
    pub fn w_reg(&mut self, offset: u32, value: u32) -> Result<(), SdpcmError> {
        let mut attempt = 0;
        loop {
            match self.bus.write_register(offset, value) {
                Ok(()) => {
                    self.reg_fails = 0;
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.cfg.reg_retries => attempt += 1,
                Err(e) => return Err(self.reg_failed("write", offset, e)),
            }
        }
    }

    fn reg_failed(&mut self, op: &str, offset: u32, e: BusError) -> SdpcmError {
        self.stats.reg_errors += 1;
        self.reg_fails += 1;
        log::warn!(target: "sdpcm", "register {} 0x{:x} failed: {}", op, offset, e);
        if self.reg_fails >= self.cfg.reg_fail_limit && !self.down {
            log::error!(
                target: "sdpcm",
                "{} consecutive register failures, marking bus down",
                self.reg_fails
            );
            self.down = true;
            self.state = BusState::Down;
        }
        SdpcmError::Bus(e)
    }

    pub fn take_outbox(&mut self) -> Outbox {
        core::mem::take(&mut self.out)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            bus_state: self.state,
            bus_down: self.down,
            clock: self.power.clock,
            sleeping: self.power.sleeping,
            tx_seq: self.credit.tx_seq(),
            tx_window: self.credit.window(),
            flow_bits: self.credit.flow_bits(),
            rx_seq: self.rx.seq,
            rx_skip: self.rx.skip,
            fcstate: self.fcstate,
            txq_len: self.txq.len(),
            backpressure: self.txq.is_paused(),
        }
    }
}
