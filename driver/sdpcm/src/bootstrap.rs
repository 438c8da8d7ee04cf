//! 固件下载与总线初始化
//!
//! 下载顺序：CPU 置复位 -> 内存顶部 4 字节清零 -> 分块写固件 -> 写参数块与长度标记 -> 解除复位。
//! 任何一块写失败都中止下载，链路保持 Down。

use alloc::vec;

use axerrno::{AxError, AxResult};
use sdio_bus::reg::{self, intr};
use sdio_bus::{SdioBus, XferFlags};

use crate::engine::Sdpcm;
use crate::link::{BusState, Link};
use crate::nvram;
use crate::os::OsServices;
use crate::power::ClockState;

impl<B: SdioBus> Link<B> {
    fn membytes_write(&mut self, addr: u32, data: &[u8]) -> AxResult<()> {
        self.bus
            .write(addr, data, XferFlags::BACKPLANE | XferFlags::SYNC)
            .map_err(|e| {
                log::error!(target: "sdpcm::boot", "write of {} bytes at 0x{:08x} failed: {}", data.len(), addr, e);
                AxError::from(e)
            })
    }

    fn membytes_verify(&mut self, addr: u32, data: &[u8]) -> AxResult<()> {
        let mut readback = vec![0u8; data.len()];
        self.bus
            .read(addr, &mut readback, XferFlags::BACKPLANE | XferFlags::SYNC)
            .map_err(AxError::from)?;
        if readback != data {
            log::error!(target: "sdpcm::boot", "verify mismatch at 0x{:08x}", addr);
            return Err(AxError::Io);
        }
        Ok(())
    }

    /// 分块写固件，按 25% 打进度。
    fn upload_firmware(&mut self, base: u32, image: &[u8]) -> AxResult<()> {
        let chunk = self.cfg.download_chunk;
        let total_chunks = image.len().div_ceil(chunk);
        log::info!(
            target: "sdpcm::boot",
            "firmware upload: addr=0x{:08x} len={} ({} chunks)",
            base,
            image.len(),
            total_chunks
        );
        let mut last_quarter = 0;
        for (i, block) in image.chunks(chunk).enumerate() {
            let addr = base + (i * chunk) as u32;
            self.membytes_write(addr, block)?;
            if self.cfg.verify_download {
                self.membytes_verify(addr, block)?;
            }
            let done = (i * chunk + block.len()) * 100 / image.len();
            if done / 25 > last_quarter {
                last_quarter = done / 25;
                log::info!(target: "sdpcm::boot", "firmware upload: {}/{} chunks ({}%)", i + 1, total_chunks, done);
            }
        }
        Ok(())
    }

    pub(crate) fn download(&mut self, firmware: &[u8], nvram_text: &[u8], os: &dyn OsServices) -> AxResult<()> {
        if firmware.is_empty() {
            return Err(AxError::InvalidInput);
        }
        let vars = nvram::process_vars(nvram_text);
        let Some(ram_top) = self.cfg.ram_base.checked_add(self.cfg.ram_size) else {
            log::error!(
                target: "sdpcm::boot",
                "RAM window 0x{:08x}+0x{:x} overflows the address space",
                self.cfg.ram_base,
                self.cfg.ram_size
            );
            return Err(AxError::InvalidInput);
        };
        if firmware.len() + vars.len() + 4 > self.cfg.ram_size as usize {
            log::error!(
                target: "sdpcm::boot",
                "image {} + vars {} does not fit in {} bytes of RAM",
                firmware.len(),
                vars.len(),
                self.cfg.ram_size
            );
            return Err(AxError::InvalidInput);
        }

        self.state = BusState::Load;
        let r = self.download_inner(firmware, &vars, ram_top, os);
        self.state = BusState::Down;
        match &r {
            Ok(()) => log::info!(target: "sdpcm::boot", "download complete, core released"),
            Err(e) => log::error!(target: "sdpcm::boot", "download aborted: {:?}", e),
        }
        r
    }

    fn download_inner(&mut self, firmware: &[u8], vars: &[u8], ram_top: u32, os: &dyn OsServices) -> AxResult<()> {
        self.clkctl(ClockState::FullClockAvailable, false, os)?;
        self.w_reg(reg::CPU_RESETCTRL, reg::CPU_IN_RESET)?;
        // 复位向量附近不能留旧代码
        self.membytes_write(ram_top - 4, &[0u8; 4])?;

        self.upload_firmware(self.cfg.ram_base, firmware)?;

        if !vars.is_empty() {
            let varaddr = ram_top - 4 - vars.len() as u32;
            log::info!(target: "sdpcm::boot", "vars: {} bytes at 0x{:08x}", vars.len(), varaddr);
            self.membytes_write(varaddr, vars)?;
            if self.cfg.verify_download {
                self.membytes_verify(varaddr, vars)?;
            }
        }
        let token = nvram::length_token(vars.len());
        self.membytes_write(ram_top - 4, &token.to_le_bytes())?;

        self.w_reg(reg::INTSTATUS, u32::MAX)?;
        self.w_reg(reg::CPU_RESETCTRL, 0)?;
        Ok(())
    }

    pub(crate) fn bus_init(&mut self, os: &dyn OsServices) -> AxResult<()> {
        if self.down {
            return Err(AxError::BadState);
        }
        if self.state == BusState::Up {
            return Ok(());
        }
        self.clkctl(ClockState::FullClockAvailable, false, os)?;
        self.w_reg(reg::INTSTATUS, u32::MAX)?;
        self.hostintmask = intr::HOSTINTMASK;
        self.w_reg(reg::HOSTINTMASK, self.hostintmask)?;

        self.rx.reset();
        self.ctrl.reset();
        self.credit = crate::credit::CreditController::new(self.cfg.initial_tx_window);
        self.intstatus = 0;
        self.fcstate = false;
        self.state = BusState::Up;
        log::info!(target: "sdpcm::boot", "bus up, hostintmask=0x{:08x}", self.hostintmask);
        Ok(())
    }

    /// 停止收发：关中断、清状态、关时钟，丢弃未发出的帧。
    pub(crate) fn bus_stop(&mut self, os: &dyn OsServices) -> AxResult<()> {
        if self.state == BusState::Down {
            return Ok(());
        }
        self.state = BusState::Down;
        self.hostintmask = 0;
        self.intstatus = 0;
        if !self.down {
            // 尽力而为，失败不影响后面的清理
            let _ = self.w_reg(reg::HOSTINTMASK, 0);
            let _ = self.w_reg(reg::INTSTATUS, u32::MAX);
        }
        let dropped = self.txq.len();
        self.txq.clear();
        if let Some(on) = self.txq.backpressure() {
            self.out.backpressure.push(on);
        }
        self.ctrl.reset();
        self.rx.reset();
        log::info!(target: "sdpcm::boot", "bus stopped, {} queued frames dropped", dropped);
        if self.down {
            return Ok(());
        }
        self.clkctl(ClockState::Off, false, os)?;
        Ok(())
    }
}

impl<B: SdioBus, O: OsServices> Sdpcm<B, O> {
    /// 下载固件与参数文本。失败时链路保持 Down，不会进入工作状态。
    pub fn download(&self, firmware: &[u8], nvram: &[u8]) -> AxResult<()> {
        let mut link = self.link.lock();
        let r = link.download(firmware, nvram, &self.os);
        self.sync_down(&link);
        r
    }

    /// 下载完成后使能中断并进入可收发状态。
    pub fn bus_init(&self) -> AxResult<()> {
        let mut link = self.link.lock();
        let r = link.bus_init(&self.os);
        self.sync_down(&link);
        r
    }

    /// 停线程并让链路回到 Down；之后可以重新下载。
    pub fn bus_stop(&self) -> AxResult<()> {
        self.stop();
        let mut link = self.link.lock();
        let r = link.bus_stop(&self.os);
        self.sync_down(&link);
        let out = link.take_outbox();
        drop(link);
        self.flush(out);
        r
    }
}
