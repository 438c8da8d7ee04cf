//! 接收泵
//!
//! 每轮最多处理 `rx_bound` 帧。有长度提示时直接按提示整帧读，否则先读 `FIRST_READ` 字节解析帧头，
//! 再读剩余部分。任何完整性错误都走 [`Link::rxfail`]：终止当前帧、可选 NAK 请求重传、清掉提示。

use alloc::vec::Vec;

use sdio_bus::reg::{self, framectrl, smb};
use sdio_bus::{BusError, SdioBus, XferFlags, F2_FIFO_ADDR};
use skb::SkBuff;

use crate::codec::{decode_header, read_tag, round_up, Channel, SdpcmHeader, NEXTLEN_UNIT};
use crate::error::SdpcmError;
use crate::link::Link;
use crate::os::{poll_until, OsServices, PollLimits};
use crate::power::ClockState;

/// 无提示时的首次读长度
pub const FIRST_READ: usize = 32;
const RX_ALIGN: usize = 4;

/// 接收侧状态
#[derive(Default)]
pub(crate) struct RxState {
    /// 期望的下一个接收序号
    pub seq: u8,
    /// 下一帧长度提示（16 字节为单位），0 表示无
    pub nextlen: u8,
    /// 已 NAK，等待对端报告 NAK 已处理
    pub skip: bool,
    /// 已收到、尚未处理的聚合描述符负载
    pub glomd: Option<SkBuff>,
    /// 按描述符分配好的子帧缓冲
    pub glom: Vec<SkBuff>,
    /// 聚合读失败次数
    pub glom_err: u32,
}

impl RxState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxStep {
    /// FIFO 已空
    Finished,
    /// 交付了一帧
    Delivered,
    /// 帧已处理但没有交付（控制、描述符、空负载）
    Consumed,
    /// 帧被丢弃
    Dropped,
}

/// 接收长度补齐：超过一个块时补到块边界，否则 4 字节对齐。
pub(crate) fn rx_pad(len: usize, blksz: usize) -> usize {
    if blksz > 0 && len > blksz {
        round_up(len, blksz)
    } else {
        round_up(len, RX_ALIGN)
    }
}

struct HexPrefix<'a>(&'a [u8], usize);

impl core::fmt::Display for HexPrefix<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let n = self.1.min(self.0.len());
        for (i, b) in self.0[..n].iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl<B: SdioBus> Link<B> {
    /// 读帧直到 FIFO 空或用完 `maxframes`。返回 (处理帧数, FIFO 是否已空)。
    pub(crate) fn readframes(&mut self, maxframes: usize, os: &dyn OsServices) -> (usize, bool) {
        let mut rxseq = self.rx.seq;
        let mut rxleft = maxframes;
        let mut count = 0;
        let mut finished = false;

        while rxleft > 0 && !self.rx.skip && !self.down {
            if self.rx.glomd.is_some() || !self.rx.glom.is_empty() {
                let cnt = self.rxglom(&mut rxseq, os);
                count += cnt;
                rxleft = rxleft.saturating_sub(cnt.max(1));
                continue;
            }

            rxleft -= 1;
            let step = if self.rx.nextlen != 0 {
                self.read_hinted(&mut rxseq, os)
            } else {
                self.read_probed(&mut rxseq, os)
            };
            match step {
                RxStep::Finished => {
                    finished = true;
                    break;
                }
                RxStep::Delivered | RxStep::Consumed => count += 1,
                RxStep::Dropped => {}
            }

            // 预算最后一帧：发送侧空闲时顺带发出等待中的控制帧
            if rxleft == 0
                && self.txq.is_empty()
                && self.ctrl.has_pending_tx()
                && self.credit.admit()
                && self.power.clock == ClockState::FullClockAvailable
            {
                self.send_pending_ctrl(os);
            }
        }

        self.rx.seq = rxseq;
        if count > 0 {
            self.power.activity = true;
        }
        log::trace!(target: "sdpcm::rx", "readframes: {} frames, finished={}", count, finished);
        (count, finished)
    }

    fn rx_read(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.bus.read(F2_FIFO_ADDR, buf, XferFlags::FIFO | XferFlags::SYNC)
    }

    /// 按提示长度整帧读取。
    fn read_hinted(&mut self, rxseq: &mut u8, os: &dyn OsServices) -> RxStep {
        let nextlen = self.rx.nextlen;
        self.rx.nextlen = 0;
        let rdlen = rx_pad(nextlen as usize * NEXTLEN_UNIT, self.bus.block_size());

        let Some(mut skb) = SkBuff::try_alloc(rdlen, 0) else {
            self.stats.rx_nomem += 1;
            self.rxfail(false, true, os);
            return RxStep::Dropped;
        };
        skb.set_len(rdlen);
        if let Err(e) = self.rx_read(&mut skb) {
            log::warn!(target: "sdpcm::rx", "read of {} hinted bytes failed: {}", rdlen, e);
            self.stats.rx_readerr += 1;
            self.rxfail(true, true, os);
            return RxStep::Dropped;
        }

        let Ok((len, check)) = read_tag(&skb) else {
            return RxStep::Dropped;
        };
        if len == 0 && check == 0 {
            log::debug!(target: "sdpcm::rx", "hinted read of {} bytes found no frame", rdlen);
            return RxStep::Dropped;
        }
        let h = match decode_header(&skb) {
            Ok(h) => h,
            Err(e) => {
                log::warn!(target: "sdpcm::rx", "bad hinted header: {} [{}]", e, HexPrefix(&skb, 12));
                self.stats.rx_badhdr += 1;
                self.rxfail(false, false, os);
                return RxStep::Dropped;
            }
        };
        if round_up(len as usize, NEXTLEN_UNIT) / NEXTLEN_UNIT != nextlen as usize {
            log::warn!(
                target: "sdpcm::rx",
                "length hint mismatch: hint {} bytes, frame {} bytes",
                nextlen as usize * NEXTLEN_UNIT,
                len
            );
            self.stats.rx_hint_mismatch += 1;
            self.rxfail(true, h.channel != Channel::Control, os);
            return RxStep::Dropped;
        }

        self.stats.rx_readahead += 1;
        self.process_header(&h, rxseq);
        skb.trim(len as usize);
        self.dispatch(h, skb, os)
    }

    /// 先读 `FIRST_READ` 字节，解析帧头后读余下部分。
    fn read_probed(&mut self, rxseq: &mut u8, os: &dyn OsServices) -> RxStep {
        let mut hdr = [0u8; FIRST_READ];
        if let Err(e) = self.rx_read(&mut hdr) {
            log::warn!(target: "sdpcm::rx", "header read failed: {}", e);
            self.stats.rx_hdrfail += 1;
            self.rxfail(true, true, os);
            return RxStep::Dropped;
        }
        if hdr[..4] == [0u8; 4] {
            return RxStep::Finished;
        }

        let h = match decode_header(&hdr) {
            Ok(h) => h,
            Err(e) => {
                log::warn!(target: "sdpcm::rx", "bad header: {} [{}]", e, HexPrefix(&hdr, 12));
                self.stats.rx_badhdr += 1;
                self.rxfail(false, false, os);
                return RxStep::Dropped;
            }
        };
        self.process_header(&h, rxseq);

        let len = h.len as usize;
        let max = if h.channel == Channel::Control {
            self.cfg.max_ctrl_len
        } else {
            self.cfg.max_rx_frame
        };
        if len > max {
            log::warn!(target: "sdpcm::rx", "frame too long: {} > {} on {:?}", len, max, h.channel);
            self.stats.rx_toolong += 1;
            self.rxfail(false, false, os);
            return RxStep::Dropped;
        }

        let rdlen = if len > FIRST_READ {
            rx_pad(len - FIRST_READ, self.bus.block_size())
        } else {
            0
        };
        let Some(mut skb) = SkBuff::try_alloc(FIRST_READ + rdlen, 0) else {
            self.stats.rx_nomem += 1;
            self.rxfail(false, h.channel == Channel::Event, os);
            return RxStep::Dropped;
        };
        skb.set_len(FIRST_READ + rdlen);
        skb[..FIRST_READ].copy_from_slice(&hdr);
        if rdlen > 0 {
            if let Err(e) = self.rx_read(&mut skb[FIRST_READ..]) {
                log::warn!(target: "sdpcm::rx", "read of {} remaining bytes failed: {}", rdlen, e);
                self.stats.rx_readerr += 1;
                self.rxfail(true, h.channel == Channel::Event, os);
                return RxStep::Dropped;
            }
        }
        skb.trim(len);
        self.dispatch(h, skb, os)
    }

    /// 有效帧头的公共处理：长度提示、流控/窗口、序号。
    fn process_header(&mut self, h: &SdpcmHeader, rxseq: &mut u8) {
        self.keep_hint(h);
        self.credit.on_rx_header(h, &mut self.stats);
        self.check_seq(rxseq, h.seq);
    }

    /// 记下下一帧长度提示；超过 `max_rx_frame` 的提示不可信，丢弃。
    pub(crate) fn keep_hint(&mut self, h: &SdpcmHeader) {
        self.rx.nextlen = h.next_len;
        if h.next_len_bytes() > self.cfg.max_rx_frame {
            log::warn!(target: "sdpcm::rx", "implausible length hint {}, ignored", h.next_len_bytes());
            self.rx.nextlen = 0;
        }
    }

    /// 序号不连续只计数，并以收到的序号重新同步。
    pub(crate) fn check_seq(&mut self, rxseq: &mut u8, seq: u8) {
        if seq != *rxseq {
            log::debug!(target: "sdpcm::rx", "rx seq mismatch: expected {} got {}", *rxseq, seq);
            self.stats.rx_badseq += 1;
        }
        *rxseq = seq.wrapping_add(1);
    }

    /// 按通道分发已读完的一帧。
    fn dispatch(&mut self, h: SdpcmHeader, mut skb: SkBuff, os: &dyn OsServices) -> RxStep {
        let doff = h.data_offset as usize;
        match h.channel {
            Channel::Aggregate if h.is_glom_desc() => {
                skb.pull(doff);
                log::trace!(target: "sdpcm::glom", "glom descriptor, {} bytes", skb.len());
                self.rx.glomd = Some(skb);
                RxStep::Consumed
            }
            Channel::Aggregate => {
                log::warn!(target: "sdpcm::glom", "superframe without descriptor");
                self.stats.rx_badhdr += 1;
                self.rxfail(false, false, os);
                RxStep::Dropped
            }
            Channel::Control => {
                skb.pull(doff);
                self.stats.rx_ctrl += 1;
                if !self.ctrl.on_response(skb) {
                    self.stats.ctrl_late += 1;
                }
                RxStep::Consumed
            }
            ch => {
                skb.pull(doff);
                if skb.is_empty() {
                    log::debug!(target: "sdpcm::rx", "empty {:?} frame seq {}", ch, h.seq);
                    return RxStep::Consumed;
                }
                self.stats.rx_frames += 1;
                self.out.frames.push((ch, skb));
                RxStep::Delivered
            }
        }
    }

    /// 接收失败后的同步：可选中止传输，终止当前帧并等 RFRAMEBC 清零，可选 NAK 请求重传。
    pub(crate) fn rxfail(&mut self, abort: bool, rtx: bool, os: &dyn OsServices) {
        log::debug!(target: "sdpcm::rx", "rxfail abort={} rtx={}", abort, rtx);
        if abort {
            if let Err(e) = self.bus.abort() {
                log::warn!(target: "sdpcm::rx", "abort failed: {}", e);
            }
        }

        self.stats.rx_term += 1;
        if self.w_reg(reg::FRAMECTRL, framectrl::RF_TERM).is_ok() {
            let poll = PollLimits {
                timeout_ms: self.cfg.ht_avail_timeout_ms,
                interval_ms: 0,
                max_polls: self.cfg.frame_drain_polls,
            };
            let drained = poll_until(os, poll, || {
                let hi = self.r_reg(reg::RFRAMEBCHI)?;
                let lo = self.r_reg(reg::RFRAMEBCLO)?;
                Ok::<_, SdpcmError>(if hi == 0 && lo == 0 { Some(()) } else { None })
            });
            if matches!(drained, Ok(None)) {
                log::warn!(target: "sdpcm::rx", "read byte count did not drain");
            }
        }

        if rtx {
            self.stats.rxrtx += 1;
            match self.w_reg(reg::TOSBMAILBOX, smb::NAK) {
                Ok(()) => self.rx.skip = true,
                Err(e) => log::warn!(target: "sdpcm::rx", "NAK failed: {}", e),
            }
        }
        self.rx.nextlen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_small_and_block() {
        assert_eq!(rx_pad(30, 512), 32);
        assert_eq!(rx_pad(600, 512), 1024);
        assert_eq!(rx_pad(512, 512), 512);
    }

    #[test]
    fn hex_prefix_format() {
        let s = alloc::format!("{}", HexPrefix(&[0x01, 0xab, 0xff], 2));
        assert_eq!(s, "01 ab");
    }
}
