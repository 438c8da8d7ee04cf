//! 时钟/电源状态机与总线睡眠握手
//!
//! ```text
//! Off <-> BusClockOnly <-> FullClockAvailable
//!               \-> Pending -/        (允许挂起时，高速时钟未就绪先进入 Pending，
//!                                     等 CHIPACTIVE 中断后在 DPC 里转为 FullClockAvailable)
//! ```
//!
//! 睡眠前必须先拉满时钟，并且没有待处理的接收/发送/DPC。

use sdio_bus::reg::{self, clk, intr, smb};
use sdio_bus::SdioBus;

use crate::error::SdpcmError;
use crate::link::Link;
use crate::os::{poll_until, OsServices, PollLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Off,
    BusClockOnly,
    Pending,
    FullClockAvailable,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PowerState {
    pub clock: ClockState,
    pub sleeping: bool,
    pub pending_since_ms: u64,
    /// 自上次看门狗检查以来是否有总线活动
    pub activity: bool,
    pub idle_since_ms: u64,
}

impl Default for PowerState {
    fn default() -> Self {
        Self {
            clock: ClockState::BusClockOnly,
            sleeping: false,
            pending_since_ms: 0,
            activity: false,
            idle_since_ms: 0,
        }
    }
}

/// 高速时钟轮询间隔
const HT_POLL_MS: u64 = 1;

impl<B: SdioBus> Link<B> {
    /// 请求或释放高速时钟。
    fn htclk(&mut self, on: bool, pendok: bool, os: &dyn OsServices) -> Result<(), SdpcmError> {
        if !on {
            self.w_reg(reg::CHIPCLKCSR, 0)?;
            self.power.clock = ClockState::BusClockOnly;
            log::debug!(target: "sdpcm::power", "HT clock released");
            return Ok(());
        }

        self.w_reg(reg::CHIPCLKCSR, clk::HT_AVAIL_REQ | clk::ALP_AVAIL_REQ)?;
        let csr = self.r_reg(reg::CHIPCLKCSR)?;
        if csr & clk::HT_AVAIL != 0 {
            self.clock_available(os);
            return Ok(());
        }

        if pendok {
            if self.hostintmask & intr::CHIPACTIVE == 0 {
                self.hostintmask |= intr::CHIPACTIVE;
                self.w_reg(reg::HOSTINTMASK, self.hostintmask)?;
            }
            self.power.clock = ClockState::Pending;
            self.power.pending_since_ms = os.now_ms();
            log::debug!(target: "sdpcm::power", "HT clock pending (csr=0x{:02x})", csr);
            return Ok(());
        }

        let poll = PollLimits {
            timeout_ms: self.cfg.ht_avail_timeout_ms,
            interval_ms: HT_POLL_MS,
            max_polls: u32::MAX,
        };
        let ready = poll_until(os, poll, || {
            let csr = self.r_reg(reg::CHIPCLKCSR)?;
            Ok::<_, SdpcmError>(if csr & clk::HT_AVAIL != 0 { Some(()) } else { None })
        })?;
        if ready.is_none() {
            log::error!(
                target: "sdpcm::power",
                "HT clock not available after {} ms",
                self.cfg.ht_avail_timeout_ms
            );
            return Err(SdpcmError::Timeout);
        }
        self.clock_available(os);
        Ok(())
    }

    fn clock_available(&mut self, os: &dyn OsServices) {
        if self.power.clock != ClockState::FullClockAvailable {
            log::debug!(target: "sdpcm::power", "HT clock available");
        }
        self.power.clock = ClockState::FullClockAvailable;
        self.power.activity = true;
        self.power.idle_since_ms = os.now_ms();
    }

    /// SD 总线时钟。
    fn sdclk(&mut self, on: bool) -> Result<(), SdpcmError> {
        self.bus.set_bus_clock(on)?;
        self.power.clock = if on { ClockState::BusClockOnly } else { ClockState::Off };
        Ok(())
    }

    /// 切换到目标时钟状态。`Pending` 不能作为目标。
    pub(crate) fn clkctl(&mut self, target: ClockState, pendok: bool, os: &dyn OsServices) -> Result<(), SdpcmError> {
        let cur = self.power.clock;
        if cur == target {
            if target == ClockState::FullClockAvailable {
                self.power.activity = true;
            }
            return Ok(());
        }
        log::trace!(target: "sdpcm::power", "clkctl {:?} -> {:?}", cur, target);
        match target {
            ClockState::FullClockAvailable => {
                if cur == ClockState::Off {
                    self.sdclk(true)?;
                }
                if cur == ClockState::Pending && pendok {
                    return Ok(());
                }
                self.htclk(true, pendok, os)
            }
            ClockState::BusClockOnly => {
                if cur == ClockState::Off {
                    self.sdclk(true)
                } else {
                    self.htclk(false, false, os)
                }
            }
            ClockState::Off => {
                if cur != ClockState::BusClockOnly {
                    self.htclk(false, false, os)?;
                }
                self.sdclk(false)
            }
            ClockState::Pending => Err(SdpcmError::InvalidInput),
        }
    }

    /// Pending 状态下检查芯片是否已就绪；就绪则转为 FullClockAvailable 并撤掉 CHIPACTIVE 中断。
    pub(crate) fn check_chip_active(&mut self, os: &dyn OsServices) -> Result<bool, SdpcmError> {
        let csr = self.r_reg(reg::CHIPCLKCSR)?;
        if csr & clk::HT_AVAIL == 0 {
            return Ok(false);
        }
        self.clock_available(os);
        if self.hostintmask & intr::CHIPACTIVE != 0 {
            self.hostintmask &= !intr::CHIPACTIVE;
            self.w_reg(reg::HOSTINTMASK, self.hostintmask)?;
        }
        Ok(true)
    }

    /// 写邮箱并等待对端取走（该位被清零）。未确认只记录，不算失败。
    pub(crate) fn mailbox_signal(&mut self, value: u32, os: &dyn OsServices) -> Result<bool, SdpcmError> {
        self.w_reg(reg::TOSBMAILBOX, value)?;
        let poll = PollLimits {
            timeout_ms: self.cfg.ht_avail_timeout_ms,
            interval_ms: HT_POLL_MS,
            max_polls: self.cfg.mailbox_retry_limit.max(1),
        };
        let acked = poll_until(os, poll, || {
            let mb = self.r_reg(reg::TOSBMAILBOX)?;
            Ok::<_, SdpcmError>(if mb & value == 0 { Some(()) } else { None })
        })?;
        if acked.is_none() {
            self.stats.mailbox_unacked += 1;
            log::warn!(target: "sdpcm::power", "mailbox 0x{:x} not acknowledged", value);
        }
        Ok(acked.is_some())
    }

    /// 进入/退出总线睡眠。
    pub(crate) fn bussleep(&mut self, sleep: bool, dpc_pending: bool, os: &dyn OsServices) -> Result<(), SdpcmError> {
        if self.power.sleeping == sleep {
            return Ok(());
        }
        if sleep {
            if dpc_pending || self.rx.skip || !self.txq.is_empty() || self.ctrl.has_pending_tx() {
                log::debug!(target: "sdpcm::power", "sleep refused, work pending");
                return Err(SdpcmError::Busy);
            }
            self.clkctl(ClockState::FullClockAvailable, false, os)?;
            self.mailbox_signal(smb::USE_OOB, os)?;
            self.clkctl(ClockState::BusClockOnly, false, os)?;
            self.w_reg(reg::CHIPCLKCSR, clk::FORCE_HW_CLKREQ_OFF)?;
            self.power.sleeping = true;
            self.stats.sleeps += 1;
            log::info!(target: "sdpcm::power", "bus asleep");
        } else {
            let csr = self.r_reg(reg::CHIPCLKCSR)?;
            self.w_reg(reg::CHIPCLKCSR, csr & !(clk::FORCE_HW_CLKREQ_OFF | clk::FORCE_HT))?;
            self.clkctl(ClockState::BusClockOnly, false, os)?;
            self.w_reg(reg::TOSBMAILBOXDATA, 0)?;
            self.mailbox_signal(smb::DEV_INT, os)?;
            self.clkctl(ClockState::FullClockAvailable, false, os)?;
            self.power.sleeping = false;
            self.stats.wakes += 1;
            log::info!(target: "sdpcm::power", "bus awake");
        }
        Ok(())
    }
}
