//! 发送队列与发送路径
//!
//! 队列按 802.1D 优先级映射到 8 个 precedence；出队时跳过对端流控位置位的优先级。
//! 真正的写总线只在 DPC 里进行，每帧按当前 `tx_seq` 盖头。

use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use sdio_bus::{reg, SdioBus, XferFlags, F2_FIFO_ADDR};
use skb::{PrecQueue, SkBuff};

use crate::codec::{prepend_header, round_up, Channel, SdpcmHeader, SDPCM_HDRLEN};
use crate::config::SdpcmConfig;
use crate::error::SdpcmError;
use crate::link::Link;
use crate::os::{poll_until, OsServices, PollLimits};

/// 帧内对齐
pub(crate) const TX_ALIGN: usize = 4;

/// 待发送帧
#[derive(Debug)]
pub struct TxFrame {
    pub channel: Channel,
    pub skb: SkBuff,
}

/// 802.1D 优先级 -> precedence。BE(0) 与 NONE(2) 对调，使 BE 高于 BK(1)。
pub fn prio_to_prec(prio: u8) -> usize {
    match prio & 0x7 {
        0 => 2,
        2 => 0,
        p => p as usize,
    }
}

pub struct TxQueue {
    q: PrecQueue<TxFrame>,
    hiwat: usize,
    lowat: usize,
    paused: bool,
}

impl TxQueue {
    pub fn new(cfg: &SdpcmConfig) -> Self {
        Self {
            q: PrecQueue::new(cfg.txq_len, cfg.txq_prec_len),
            hiwat: cfg.txq_hiwat,
            lowat: cfg.txq_lowat,
            paused: false,
        }
    }

    /// 按优先级入队；满时把帧还给调用方。
    pub fn enqueue(&mut self, frame: TxFrame, prio: u8) -> Result<(), TxFrame> {
        self.q.enqueue(frame, prio_to_prec(prio))
    }

    /// 取出最多 `max` 帧，只取 `mask` 中置位的 precedence，高优先级在前。
    /// 每帧带着它的 precedence，没发出去的可以原样放回。
    pub fn drain_batch(&mut self, max: usize, mask: u8) -> Vec<(usize, TxFrame)> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.q.dequeue_masked(mask) {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        out
    }

    /// 把取出但未发送的帧按原顺序放回各自队首。
    pub fn requeue(&mut self, frames: Vec<(usize, TxFrame)>) {
        for (prec, f) in frames.into_iter().rev() {
            self.q.requeue_head(f, prec);
        }
    }

    /// 按水位更新暂停状态；状态翻转时返回新状态。
    pub fn backpressure(&mut self) -> Option<bool> {
        let len = self.q.len();
        if !self.paused && len >= self.hiwat {
            self.paused = true;
            Some(true)
        } else if self.paused && len <= self.lowat {
            self.paused = false;
            Some(false)
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn len_masked(&self, mask: u8) -> usize {
        self.q.len_masked(mask)
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn clear(&mut self) {
        self.q.clear();
    }
}

/// 发送长度补齐：超过一个块时补到块边界，否则补到 4 字节。
pub(crate) fn tx_pad(len: usize, blksz: usize) -> usize {
    if blksz > 0 && len > blksz {
        round_up(len, blksz)
    } else {
        round_up(len, TX_ALIGN)
    }
}

impl<B: SdioBus> Link<B> {
    /// 从队列发送最多 `maxframes` 帧，受信用窗口与对端流控约束；返回成功数。
    pub(crate) fn sendfromq(&mut self, maxframes: usize, os: &dyn OsServices) -> usize {
        let budget = maxframes.min(self.credit.admissible());
        if budget == 0 {
            if !self.txq.is_empty() {
                self.stats.tx_window_closed += 1;
            }
            return 0;
        }
        let mask = !self.credit.flow_bits();
        let frames = self.txq.drain_batch(budget, mask);
        let sent = if frames.len() > 1 && frames.len() >= self.cfg.tx_min_batch {
            self.tx_coalesced(frames, os)
        } else {
            let mut sent = 0;
            for (_, f) in frames {
                if self.down {
                    break;
                }
                match self.txpkt(f.channel, f.skb, os) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        log::warn!(target: "sdpcm::tx", "dropping frame: {}", e);
                        self.stats.tx_errors += 1;
                    }
                }
            }
            sent
        };
        self.stats.tx_frames += sent as u64;
        if let Some(on) = self.txq.backpressure() {
            self.out.backpressure.push(on);
        }
        if sent > 0 {
            self.power.activity = true;
        }
        sent
    }

    /// 单帧：盖头、补齐、写 FIFO，成功后推进序号。
    pub(crate) fn txpkt(&mut self, channel: Channel, mut skb: SkBuff, os: &dyn OsServices) -> Result<(), SdpcmError> {
        let mut hdr = SdpcmHeader::new(channel, self.credit.tx_seq());
        prepend_header(&mut skb, &mut hdr)?;
        let padded = tx_pad(skb.len(), self.bus.block_size());
        if padded > skb.len() {
            skb.put_zeroed(padded - skb.len());
        }
        log::trace!(
            target: "sdpcm::tx",
            "txpkt chan={:?} seq={} len={} padded={}",
            channel,
            hdr.seq,
            hdr.len,
            padded
        );
        self.tx_write(&skb, os)?;
        self.credit.on_tx_success();
        Ok(())
    }

    /// 多帧合并写：按 `tx_batch_max_bytes` 分段，每帧 4 字节对齐。
    /// 某段写失败后剩余帧放回队首，留给下一轮从当前 `tx_seq` 重新编号。
    fn tx_coalesced(&mut self, frames: Vec<(usize, TxFrame)>, os: &dyn OsServices) -> usize {
        let blksz = self.bus.block_size();
        let mut sent = 0;
        let mut pending: Vec<(usize, TxFrame)> = Vec::new();
        let mut bytes = 0usize;
        let mut rest = frames.into_iter();
        while let Some((prec, f)) = rest.next() {
            let aligned = round_up(f.skb.len() + SDPCM_HDRLEN, TX_ALIGN);
            if !pending.is_empty() && bytes + aligned > self.cfg.tx_batch_max_bytes {
                match self.tx_flush_batch(mem::take(&mut pending), blksz, os) {
                    Some(n) => sent += n,
                    None => {
                        let mut left = vec![(prec, f)];
                        left.extend(rest);
                        log::debug!(target: "sdpcm::tx", "requeue {} frames after failed batch", left.len());
                        self.txq.requeue(left);
                        return sent;
                    }
                }
                bytes = 0;
            }
            pending.push((prec, f));
            bytes += aligned;
        }
        if !pending.is_empty() {
            sent += self.tx_flush_batch(pending, blksz, os).unwrap_or(0);
        }
        sent
    }

    /// 从当前 `tx_seq` 起给一段帧连续编号并一次写出。
    /// 返回成功帧数；写失败时整段丢弃并返回 None。
    fn tx_flush_batch(&mut self, frames: Vec<(usize, TxFrame)>, blksz: usize, os: &dyn OsServices) -> Option<usize> {
        let mut batch: Vec<u8> = Vec::new();
        let mut count = 0usize;
        let mut seq = self.credit.tx_seq();
        for (_, f) in frames {
            let mut skb = f.skb;
            let mut hdr = SdpcmHeader::new(f.channel, seq);
            if let Err(e) = prepend_header(&mut skb, &mut hdr) {
                log::warn!(target: "sdpcm::tx", "dropping frame: {}", e);
                self.stats.tx_errors += 1;
                continue;
            }
            batch.extend_from_slice(&skb);
            batch.resize(round_up(batch.len(), TX_ALIGN), 0);
            count += 1;
            seq = seq.wrapping_add(1);
        }
        if count == 0 {
            return Some(0);
        }
        let padded = tx_pad(batch.len(), blksz);
        batch.resize(padded, 0);
        log::trace!(target: "sdpcm::tx", "batch of {} frames, {} bytes", count, padded);
        match self.tx_write(&batch, os) {
            Ok(()) => {
                for _ in 0..count {
                    self.credit.on_tx_success();
                }
                self.stats.tx_batches += 1;
                Some(count)
            }
            Err(e) => {
                log::warn!(target: "sdpcm::tx", "dropping batch of {}: {}", count, e);
                self.stats.tx_errors += count as u64;
                None
            }
        }
    }

    /// 写 FIFO；失败时终止写帧并重试，用尽后返回错误。
    fn tx_write(&mut self, buf: &[u8], os: &dyn OsServices) -> Result<(), SdpcmError> {
        let mut attempt = 0;
        loop {
            match self.bus.write(F2_FIFO_ADDR, buf, XferFlags::FIFO | XferFlags::SYNC) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.stats.tx_sderrs += 1;
                    log::warn!(target: "sdpcm::tx", "frame write failed ({}), attempt {}", e, attempt);
                    self.tx_terminate(os);
                    if attempt >= self.cfg.tx_retries || self.down {
                        return Err(e.into());
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// 中止当前写帧，等待 WFRAMEBC 清零。
    fn tx_terminate(&mut self, os: &dyn OsServices) {
        if let Err(e) = self.bus.abort() {
            log::debug!(target: "sdpcm::tx", "abort failed: {}", e);
        }
        if self.w_reg(reg::FRAMECTRL, reg::framectrl::WF_TERM).is_err() {
            return;
        }
        let poll = PollLimits {
            timeout_ms: self.cfg.ht_avail_timeout_ms,
            interval_ms: 0,
            max_polls: self.cfg.frame_drain_polls,
        };
        let drained = poll_until(os, poll, || {
            let hi = self.r_reg(reg::WFRAMEBCHI)?;
            let lo = self.r_reg(reg::WFRAMEBCLO)?;
            Ok::<_, SdpcmError>(if hi == 0 && lo == 0 { Some(()) } else { None })
        });
        if !matches!(drained, Ok(Some(()))) {
            log::warn!(target: "sdpcm::tx", "write byte count did not drain");
        }
    }

    /// 发出暂存的控制帧。成功返回 true。
    pub(crate) fn send_pending_ctrl(&mut self, os: &dyn OsServices) -> bool {
        if !self.credit.admit() {
            return false;
        }
        let Some(skb) = self.ctrl.take_pending_tx() else {
            return false;
        };
        match self.txpkt(Channel::Control, skb, os) {
            Ok(()) => {
                self.stats.tx_ctrl += 1;
                self.power.activity = true;
                true
            }
            Err(e) => {
                log::error!(target: "sdpcm::ctrl", "control frame send failed: {}", e);
                self.stats.tx_errors += 1;
                false
            }
        }
    }
}
