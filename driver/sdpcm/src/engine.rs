//! 链路引擎对外接口
//!
//! `Sdpcm` 持有唯一的协议状态锁与几个原子标志。上层通过 `submit` / `submit_control_and_wait` 发送，
//! 通过 [`LinkConsumer`] 收帧与背压通知；回调总是在释放锁之后调用。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use sdio_bus::SdioBus;
use skb::SkBuff;
use spin::Mutex;

use crate::codec::Channel;
use crate::config::SdpcmConfig;
use crate::ctrl::CtrlState;
use crate::error::SdpcmError;
use crate::link::{BusState, Link, LinkSnapshot, Outbox};
use crate::os::{Deadline, OsServices};
use crate::power::ClockState;
use crate::stats::SdpcmStats;
use crate::txq::TxFrame;

/// 控制请求等待的轮询间隔
const CTRL_POLL_MS: u64 = 1;

/// 上层消费者
pub trait LinkConsumer: Send + Sync {
    /// 收到一帧（已去头）。同一通道按接收顺序调用。
    fn deliver(&self, channel: Channel, payload: SkBuff);

    /// 发送队列越过高水位（true）或回落到低水位（false）。
    fn backpressure(&self, on: bool);
}

/// SDPCM 链路引擎
pub struct Sdpcm<B: SdioBus, O: OsServices> {
    pub(crate) link: Mutex<Link<B>>,
    pub(crate) os: O,
    pub(crate) cfg: SdpcmConfig,
    pub(crate) consumer: Arc<dyn LinkConsumer>,
    /// 中断已到、状态寄存器尚未读取
    pub(crate) ipend: AtomicBool,
    /// DPC 需要再跑一轮
    pub(crate) dpc_sched: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) bus_down: AtomicBool,
    pub(crate) intrcount: AtomicU32,
}

impl<B: SdioBus, O: OsServices> Sdpcm<B, O> {
    pub fn new(bus: B, os: O, cfg: SdpcmConfig, consumer: Arc<dyn LinkConsumer>) -> Result<Self, SdpcmError> {
        cfg.validate()?;
        Ok(Self {
            link: Mutex::new(Link::new(bus, cfg.clone())),
            os,
            cfg,
            consumer,
            ipend: AtomicBool::new(false),
            dpc_sched: AtomicBool::new(false),
            running: AtomicBool::new(false),
            bus_down: AtomicBool::new(false),
            intrcount: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &SdpcmConfig {
        &self.cfg
    }

    pub fn os(&self) -> &O {
        &self.os
    }

    /// 数据/事件帧入队，由 DPC 发出。`payload` 只含负载，帧头由引擎补。
    pub fn submit(&self, payload: SkBuff, channel: Channel, prio: u8) -> Result<(), SdpcmError> {
        if self.bus_down.load(Ordering::Acquire) {
            return Err(SdpcmError::BusDown);
        }
        if channel == Channel::Aggregate {
            return Err(SdpcmError::InvalidInput);
        }
        let bp = {
            let mut link = self.link.lock();
            if link.down {
                return Err(SdpcmError::BusDown);
            }
            if link.state != BusState::Up {
                return Err(SdpcmError::NotReady);
            }
            if channel == Channel::Control {
                if payload.len() + crate::codec::SDPCM_HDRLEN > self.cfg.max_ctrl_len {
                    return Err(SdpcmError::InvalidInput);
                }
                // 无请求号的控制帧，响应不会匹配到任何等待者
                if link.ctrl.stage(0, payload).is_err() {
                    return Err(SdpcmError::Busy);
                }
                None
            } else {
                if let Err(f) = link.txq.enqueue(TxFrame { channel, skb: payload }, prio) {
                    link.stats.tx_qfull += 1;
                    log::debug!(target: "sdpcm::tx", "txq full, dropping {} bytes", f.skb.len());
                    return Err(SdpcmError::QueueFull);
                }
                link.txq.backpressure()
            }
        };
        if let Some(on) = bp {
            self.consumer.backpressure(on);
        }
        self.dpc_sched.store(true, Ordering::Release);
        Ok(())
    }

    /// 发送控制请求并等待响应负载；到期返回 `Timeout`，晚到的响应会被丢弃。
    pub fn submit_control_and_wait(&self, payload: &[u8], timeout_ms: u64) -> Result<SkBuff, SdpcmError> {
        if self.bus_down.load(Ordering::Acquire) {
            return Err(SdpcmError::BusDown);
        }
        if payload.len() + crate::ctrl::CTRL_ID_LEN + crate::codec::SDPCM_HDRLEN > self.cfg.max_ctrl_len {
            return Err(SdpcmError::InvalidInput);
        }
        let token = {
            let mut link = self.link.lock();
            if link.state != BusState::Up {
                return Err(SdpcmError::NotReady);
            }
            let token = link.ctrl.register().ok_or(SdpcmError::Busy)?;
            let req = CtrlState::build_request(token.id(), payload);
            if link.ctrl.stage(token.id(), req).is_err() {
                link.ctrl.cancel(token);
                return Err(SdpcmError::Busy);
            }
            token
        };
        log::debug!(target: "sdpcm::ctrl", "control request id={} len={}", token.id(), payload.len());
        self.dpc_sched.store(true, Ordering::Release);

        let deadline = Deadline::after(&self.os, timeout_ms);
        loop {
            {
                let mut link = self.link.lock();
                if let Some(resp) = link.ctrl.take_response(token) {
                    return Ok(resp);
                }
                if link.down {
                    link.ctrl.cancel(token);
                    return Err(SdpcmError::BusDown);
                }
                if deadline.expired(&self.os) {
                    link.ctrl.cancel(token);
                    link.stats.ctrl_timeouts += 1;
                    log::warn!(
                        target: "sdpcm::ctrl",
                        "control request id={} timed out after {} ms",
                        token.id(),
                        timeout_ms
                    );
                    return Err(SdpcmError::Timeout);
                }
            }
            self.os.sleep_ms(CTRL_POLL_MS);
        }
    }

    /// 用默认超时发送控制请求。
    pub fn control(&self, payload: &[u8]) -> Result<SkBuff, SdpcmError> {
        self.submit_control_and_wait(payload, self.cfg.ctrl_timeout_ms)
    }

    /// 请求时钟状态，返回实际到达的状态（允许挂起时可能是 `Pending`）。
    pub fn request_clock(&self, target: ClockState, pendok: bool) -> Result<ClockState, SdpcmError> {
        let mut link = self.link.lock();
        if link.down {
            return Err(SdpcmError::BusDown);
        }
        if link.power.sleeping && target != ClockState::Off {
            let busy = self.dpc_sched.load(Ordering::Acquire);
            link.bussleep(false, busy, &self.os)?;
        }
        let r = link.clkctl(target, pendok, &self.os);
        self.sync_down(&link);
        r.map(|_| link.power.clock)
    }

    /// 进入或退出总线睡眠。有未完成的工作时返回 `Busy`。
    pub fn bus_sleep(&self, sleep: bool) -> Result<(), SdpcmError> {
        let mut link = self.link.lock();
        if link.down {
            return Err(SdpcmError::BusDown);
        }
        let busy = self.dpc_sched.load(Ordering::Acquire);
        let r = link.bussleep(sleep, busy, &self.os);
        self.sync_down(&link);
        r
    }

    pub fn clock_state(&self) -> ClockState {
        self.link.lock().power.clock
    }

    pub fn stats(&self) -> SdpcmStats {
        let mut s = self.link.lock().stats;
        s.intrcount = self.intrcount.load(Ordering::Relaxed) as u64;
        s
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.link.lock().snapshot()
    }

    pub fn is_bus_down(&self) -> bool {
        self.bus_down.load(Ordering::Acquire)
    }

    /// 锁内发现总线失效后同步到原子标志。
    pub(crate) fn sync_down(&self, link: &Link<B>) {
        if link.down {
            self.bus_down.store(true, Ordering::Release);
        }
    }

    /// 解锁后派发收到的帧与背压事件。
    pub(crate) fn flush(&self, out: Outbox) {
        for on in out.backpressure {
            self.consumer.backpressure(on);
        }
        for (channel, skb) in out.frames {
            self.consumer.deliver(channel, skb);
        }
    }
}
