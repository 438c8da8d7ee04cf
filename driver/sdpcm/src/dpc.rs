//! 中断、DPC 与看门狗
//!
//! - `isr`：只计数并置位 `ipend`/`dpc_sched`，不碰总线、不拿锁。
//! - `dpc`：唯一做总线 I/O 的上下文。一轮内读中断状态、收帧、发帧，返回是否还有活。
//! - `watchdog`：定时补查丢失的中断，处理 Pending 超时与空闲降频。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use axerrno::AxResult;
use sdio_bus::reg::{self, hmb, intr, smb};
use sdio_bus::SdioBus;

use crate::engine::Sdpcm;
use crate::error::SdpcmError;
use crate::link::{BusState, Link};
use crate::os::OsServices;
use crate::power::ClockState;

/// DPC 线程空闲时的轮询间隔
const DPC_IDLE_MS: u64 = 1;

impl<B: SdioBus> Link<B> {
    /// 读取并应答主机邮箱。
    fn hostmail(&mut self) -> Result<u32, SdpcmError> {
        let hmb_data = self.r_reg(reg::TOHOSTMAILBOXDATA)?;
        if hmb_data != 0 {
            self.w_reg(reg::TOSBMAILBOX, smb::INT_ACK)?;
        }
        if hmb_data & hmb::NAKHANDLED != 0 {
            log::debug!(target: "sdpcm::dpc", "device handled NAK, rx resumes");
            self.rx.skip = false;
        }
        if hmb_data & (hmb::DEVREADY | hmb::FWREADY) != 0 {
            log::info!(
                target: "sdpcm::dpc",
                "device ready, protocol version {}",
                (hmb_data & hmb::VERSION_MASK) >> hmb::VERSION_SHIFT
            );
        }
        if hmb_data & hmb::FC != 0 {
            let bits = ((hmb_data & hmb::FCDATA_MASK) >> hmb::FCDATA_SHIFT) as u8;
            self.credit.update_flow(bits, &mut self.stats);
        }
        if hmb_data & !hmb::KNOWN != 0 {
            log::warn!(target: "sdpcm::dpc", "unknown mailbox bits 0x{:08x}", hmb_data & !hmb::KNOWN);
        }
        Ok(hmb_data)
    }

    /// 是否还有可以发出的帧
    fn tx_ready(&self) -> bool {
        if !self.credit.admit() {
            return false;
        }
        self.ctrl.has_pending_tx() || (!self.fcstate && self.txq.len_masked(!self.credit.flow_bits()) > 0)
    }
}

impl<B: SdioBus, O: OsServices> Sdpcm<B, O> {
    /// 中断回调。
    pub fn isr(&self) {
        self.intrcount.fetch_add(1, Ordering::Relaxed);
        if self.bus_down.load(Ordering::Acquire) {
            return;
        }
        self.ipend.store(true, Ordering::Release);
        self.dpc_sched.store(true, Ordering::Release);
    }

    /// 跑一轮 DPC，返回是否需要再跑。
    pub fn dpc(&self) -> bool {
        // 先清调度标志：本轮开始后的新请求会重新置位
        self.dpc_sched.store(false, Ordering::Release);
        let os: &dyn OsServices = &self.os;
        let mut link = self.link.lock();
        if link.down || link.state != BusState::Up {
            return false;
        }
        link.stats.dpc_runs += 1;
        let mut resched = false;

        'clkwait: {
            if link.power.clock == ClockState::Pending {
                match link.check_chip_active(os) {
                    Ok(true) => log::debug!(target: "sdpcm::dpc", "chip active, clock available"),
                    Ok(false) => break 'clkwait,
                    Err(e) => {
                        log::warn!(target: "sdpcm::dpc", "clock status read failed: {}", e);
                        break 'clkwait;
                    }
                }
            }
            if link.power.sleeping {
                if let Err(e) = link.bussleep(false, true, os) {
                    log::warn!(target: "sdpcm::dpc", "wake failed: {}", e);
                    break 'clkwait;
                }
            }
            if let Err(e) = link.clkctl(ClockState::FullClockAvailable, true, os) {
                log::warn!(target: "sdpcm::dpc", "clock request failed: {}", e);
                break 'clkwait;
            }
            if link.power.clock != ClockState::FullClockAvailable {
                break 'clkwait;
            }

            if self.ipend.swap(false, Ordering::AcqRel) {
                match link.r_reg(reg::INTSTATUS) {
                    Ok(status) => {
                        link.fcstate = status & intr::HMB_FC_STATE != 0;
                        let newstatus = status & link.hostintmask;
                        if newstatus != 0 && link.w_reg(reg::INTSTATUS, newstatus).is_err() {
                            log::warn!(target: "sdpcm::dpc", "failed to ack intstatus 0x{:08x}", newstatus);
                        }
                        link.intstatus |= newstatus;
                    }
                    Err(e) => log::warn!(target: "sdpcm::dpc", "intstatus read failed: {}", e),
                }
            }
            let mut intstatus = link.intstatus;
            link.intstatus = 0;

            if intstatus & intr::HMB_FC_CHANGE != 0 {
                intstatus &= !intr::HMB_FC_CHANGE;
                log::debug!(target: "sdpcm::dpc", "device flow control {}", if link.fcstate { "on" } else { "off" });
            }
            if intstatus & intr::HMB_HOST_INT != 0 {
                intstatus &= !intr::HMB_HOST_INT;
                if let Err(e) = link.hostmail() {
                    log::warn!(target: "sdpcm::dpc", "mailbox read failed: {}", e);
                }
            }
            if intstatus & intr::WR_OOSYNC != 0 {
                intstatus &= !intr::WR_OOSYNC;
                link.stats.wr_oosync += 1;
                log::warn!(target: "sdpcm::dpc", "write frame out of sync");
            }
            if intstatus & intr::RD_OOSYNC != 0 {
                intstatus &= !intr::RD_OOSYNC;
                link.stats.rd_oosync += 1;
                log::warn!(target: "sdpcm::dpc", "read frame out of sync");
            }
            intstatus &= !intr::CHIPACTIVE;

            // NAK 未处理前不读，避免与重传赛跑
            if link.rx.skip {
                intstatus &= !intr::HMB_FRAME_IND;
            }
            let mut rxdone = true;
            if intstatus & intr::HMB_FRAME_IND != 0 {
                let (_, finished) = link.readframes(self.cfg.rx_bound, os);
                rxdone = finished;
                if finished || link.rx.skip {
                    intstatus &= !intr::HMB_FRAME_IND;
                }
            }
            link.intstatus |= intstatus;

            if link.ctrl.has_pending_tx() && link.credit.admit() {
                link.send_pending_ctrl(os);
            } else if !link.fcstate && link.tx_ready() {
                let limit = if rxdone {
                    self.cfg.tx_bound
                } else {
                    self.cfg.tx_bound.min(self.cfg.tx_min_batch)
                };
                link.sendfromq(limit, os);
            }

            resched = link.intstatus != 0 || self.ipend.load(Ordering::Acquire) || link.tx_ready();
        }

        if link.down {
            resched = false;
        }
        self.sync_down(&link);
        let out = link.take_outbox();
        drop(link);
        self.flush(out);
        resched
    }

    /// 看门狗一拍。
    pub fn watchdog(&self) {
        if self.bus_down.load(Ordering::Acquire) {
            return;
        }
        let os: &dyn OsServices = &self.os;
        let mut link = self.link.lock();
        if link.down || link.state != BusState::Up || link.power.sleeping {
            return;
        }
        let now = os.now_ms();

        if now.saturating_sub(link.last_poll_ms) >= self.cfg.poll_interval_ms {
            link.last_poll_ms = now;
            let intrs = self.intrcount.load(Ordering::Relaxed) as u64;
            if intrs == link.lastintrs
                && !self.dpc_sched.load(Ordering::Acquire)
                && link.power.clock != ClockState::Off
            {
                if let Ok(pend) = link.r_reg(reg::CCCR_INTPEND) {
                    if pend & (reg::INTPEND_F1 | reg::INTPEND_F2) != 0 {
                        log::debug!(target: "sdpcm::dpc", "watchdog found pending interrupt 0x{:x}", pend);
                        link.stats.pollcnt += 1;
                        self.ipend.store(true, Ordering::Release);
                        self.dpc_sched.store(true, Ordering::Release);
                    }
                }
            }
            link.lastintrs = intrs;
        }

        if link.power.clock == ClockState::Pending
            && now.saturating_sub(link.power.pending_since_ms) >= self.cfg.clk_pending_timeout_ms
        {
            log::warn!(target: "sdpcm::power", "clock pending for {} ms, forcing", self.cfg.clk_pending_timeout_ms);
            link.stats.clk_pending_timeouts += 1;
            if let Err(e) = link.clkctl(ClockState::FullClockAvailable, false, os) {
                log::error!(target: "sdpcm::power", "forced clock request failed: {}", e);
                if let Err(e) = link.clkctl(ClockState::BusClockOnly, false, os) {
                    log::error!(target: "sdpcm::power", "fallback to bus clock failed: {}", e);
                }
            }
        }

        if self.cfg.idle_timeout_ms > 0 && link.power.clock == ClockState::FullClockAvailable {
            if link.power.activity {
                link.power.activity = false;
                link.power.idle_since_ms = now;
            } else if now.saturating_sub(link.power.idle_since_ms) >= self.cfg.idle_timeout_ms {
                let r = if self.cfg.sleep_on_idle {
                    let busy = self.dpc_sched.load(Ordering::Acquire);
                    link.bussleep(true, busy, os)
                } else {
                    link.clkctl(ClockState::BusClockOnly, false, os)
                };
                match r {
                    Ok(()) => log::debug!(target: "sdpcm::power", "idle, clock released"),
                    Err(SdpcmError::Busy) => {}
                    Err(e) => log::warn!(target: "sdpcm::power", "idle transition failed: {}", e),
                }
            }
        }
        self.sync_down(&link);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 停止后台线程并注销中断回调。
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.link.lock().bus.set_interrupt_handler(None);
        log::info!(target: "sdpcm::dpc", "link threads stopping");
    }
}

impl<B: SdioBus + 'static, O: OsServices> Sdpcm<B, O> {
    /// 登记中断回调并起 DPC 与看门狗线程。
    pub fn start(self: &Arc<Self>) -> AxResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let weak = Arc::downgrade(self);
        self.link.lock().bus.set_interrupt_handler(Some(Box::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.isr();
            }
        })));

        let me = Arc::clone(self);
        let spawned = self.os.spawn("sdpcm_dpc", Box::new(move || me.dpc_thread())).and_then(|_| {
            let me = Arc::clone(self);
            self.os.spawn("sdpcm_watchdog", Box::new(move || me.watchdog_thread()))
        });
        if let Err(e) = spawned {
            log::error!(target: "sdpcm::dpc", "failed to start link threads: {:?}", e);
            self.stop();
            return Err(e);
        }
        log::info!(target: "sdpcm::dpc", "link threads started");
        Ok(())
    }

    fn dpc_thread(self: Arc<Self>) {
        while self.running.load(Ordering::Acquire) {
            if !self.bus_down.load(Ordering::Acquire) && self.dpc_sched.load(Ordering::Acquire) {
                if self.dpc() {
                    self.dpc_sched.store(true, Ordering::Release);
                }
            } else {
                self.os.sleep_ms(DPC_IDLE_MS);
            }
        }
        log::debug!(target: "sdpcm::dpc", "dpc thread exit");
    }

    fn watchdog_thread(self: Arc<Self>) {
        while self.running.load(Ordering::Acquire) {
            self.os.sleep_ms(self.cfg.watchdog_ms);
            self.watchdog();
        }
        log::debug!(target: "sdpcm::dpc", "watchdog thread exit");
    }
}
