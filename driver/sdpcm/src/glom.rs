//! 聚合帧（glom）
//!
//! 对端先发一个带描述符标志的 Aggregate 帧，负载是若干小端 u16 子帧长度；紧接着一次传输送出整个
//! 超帧：第一个子帧前面带超帧头（Aggregate 通道、无描述符标志），其后各子帧首尾相接，末尾补到块边界。
//!
//! 校验全部通过才交付，任何一处失败整组丢弃，不做部分交付。

use alloc::vec::Vec;

use sdio_bus::{SdioBus, XferFlags, F2_FIFO_ADDR};
use skb::SkBuff;

use crate::codec::{decode_header, decode_superframe_header, round_up, Channel, SdpcmHeader, SDPCM_HDRLEN};
use crate::error::FrameError;
use crate::link::Link;
use crate::os::OsServices;

/// 解析描述符负载为子帧长度表。长度 0 的表项视为结束。
pub fn parse_descriptor(desc: &[u8]) -> Result<Vec<u16>, FrameError> {
    if desc.len() % 2 != 0 {
        return Err(FrameError::Incomplete { needed: desc.len() + 1 });
    }
    let mut lens = Vec::with_capacity(desc.len() / 2);
    for pair in desc.chunks_exact(2) {
        let l = u16::from_le_bytes([pair[0], pair[1]]);
        if l == 0 {
            break;
        }
        let min = if lens.is_empty() { 2 * SDPCM_HDRLEN } else { SDPCM_HDRLEN };
        if (l as usize) < min {
            return Err(FrameError::TooShort(l));
        }
        lens.push(l);
    }
    if lens.is_empty() {
        return Err(FrameError::TooShort(0));
    }
    Ok(lens)
}

impl<B: SdioBus> Link<B> {
    /// 处理挂起的描述符/子帧组。返回交付的子帧数，失败返回 0。
    pub(crate) fn rxglom(&mut self, rxseq: &mut u8, os: &dyn OsServices) -> usize {
        if let Some(desc) = self.rx.glomd.take() {
            self.rx.nextlen = 0;
            if !self.rx.glom.is_empty() {
                log::warn!(target: "sdpcm::glom", "new descriptor while a set is pending, dropping old set");
                self.rx.glom.clear();
            }
            let lens = match parse_descriptor(&desc) {
                Ok(l) => l,
                Err(e) => {
                    log::warn!(target: "sdpcm::glom", "bad glom descriptor: {}", e);
                    self.stats.rx_glom_baddesc += 1;
                    return 0;
                }
            };
            if !self.glom_alloc(&lens) {
                self.stats.rx_nomem += 1;
                self.rxfail(true, true, os);
                return 0;
            }
            self.rx.glom_err = 0;
        }
        if self.rx.glom.is_empty() {
            return 0;
        }

        if let Err(e) = self.glom_read() {
            log::warn!(target: "sdpcm::glom", "superframe read failed: {}", e);
            self.stats.rx_readerr += 1;
            if self.rx.glom_err < self.cfg.glom_retry_limit {
                self.rx.glom_err += 1;
                self.rxfail(true, true, os);
            } else {
                self.rx.glom_err = 0;
                self.rx.glom.clear();
                self.stats.rx_glom_fail += 1;
                self.rxfail(true, false, os);
            }
            return 0;
        }

        let subs = match self.glom_validate() {
            Ok(v) => v,
            Err(e) => {
                log::warn!(target: "sdpcm::glom", "superframe rejected: {}", e);
                self.rx.glom.clear();
                self.stats.rx_glom_fail += 1;
                let rtx = self.rx.glom_err < self.cfg.glom_retry_limit;
                if rtx {
                    self.rx.glom_err += 1;
                } else {
                    self.rx.glom_err = 0;
                }
                self.rxfail(true, rtx, os);
                return 0;
            }
        };
        self.rx.glom_err = 0;
        self.glom_dispatch(subs, rxseq)
    }

    /// 按长度表分配子帧缓冲，最后一个带上块对齐填充。失败时释放已分配部分（先分配的先释放）。
    fn glom_alloc(&mut self, lens: &[u16]) -> bool {
        let total: usize = lens.iter().map(|&l| l as usize).sum();
        let padded = round_up(total, self.bus.block_size());
        if padded > self.cfg.max_glom_len {
            log::warn!(
                target: "sdpcm::glom",
                "superframe of {} bytes exceeds limit {}",
                padded,
                self.cfg.max_glom_len
            );
            return false;
        }
        let mut set: Vec<SkBuff> = Vec::new();
        if set.try_reserve_exact(lens.len()).is_err() {
            return false;
        }
        for (i, &l) in lens.iter().enumerate() {
            let mut cap = l as usize;
            if i + 1 == lens.len() {
                cap += padded - total;
            }
            match SkBuff::try_alloc(cap, 0) {
                Some(mut skb) => {
                    skb.set_len(cap);
                    set.push(skb);
                }
                None => {
                    log::warn!(target: "sdpcm::glom", "no memory for sub-frame {} of {}", i, lens.len());
                    for skb in set.drain(..) {
                        drop(skb);
                    }
                    return false;
                }
            }
        }
        log::trace!(target: "sdpcm::glom", "glom set: {} sub-frames, {} bytes", set.len(), padded);
        self.rx.glom = set;
        true
    }

    /// 一次传输读入整个超帧；不支持分散读时先读入平坦缓冲再拷贝到各子帧。
    fn glom_read(&mut self) -> Result<(), crate::error::SdpcmError> {
        let flags = XferFlags::FIFO | XferFlags::SYNC;
        if self.bus.supports_sg() {
            let mut slices: Vec<&mut [u8]> = self.rx.glom.iter_mut().map(|s| &mut s[..]).collect();
            self.bus.read_sg(F2_FIFO_ADDR, &mut slices, flags)?;
            return Ok(());
        }
        let total: usize = self.rx.glom.iter().map(|s| s.len()).sum();
        let mut flat: Vec<u8> = Vec::new();
        if flat.try_reserve_exact(total).is_err() {
            return Err(crate::error::SdpcmError::NoMemory);
        }
        flat.resize(total, 0);
        self.bus.read(F2_FIFO_ADDR, &mut flat, flags)?;
        let mut off = 0;
        for skb in self.rx.glom.iter_mut() {
            let n = skb.len();
            skb.copy_from_slice(&flat[off..off + n]);
            off += n;
        }
        Ok(())
    }

    /// 校验超帧头与每个子帧头，返回各子帧头。
    fn glom_validate(&mut self) -> Result<Vec<SdpcmHeader>, FrameError> {
        let blksz = self.bus.block_size();
        let padded: usize = self.rx.glom.iter().map(|s| s.len()).sum();
        let first = self.rx.glom.first_mut().ok_or(FrameError::TooShort(0))?;

        let sf = decode_superframe_header(first)?;
        if round_up(sf.len as usize, blksz) != padded {
            log::warn!(
                target: "sdpcm::glom",
                "superframe length {} does not match descriptor total {}",
                sf.len,
                padded
            );
            return Err(FrameError::TooShort(sf.len));
        }
        let doff = sf.data_offset as usize;
        if doff > first.len() - SDPCM_HDRLEN {
            return Err(FrameError::BadOffset {
                offset: sf.data_offset,
                len: first.len() as u16,
            });
        }
        first.pull(doff);

        let mut subs = Vec::with_capacity(self.rx.glom.len());
        for (i, skb) in self.rx.glom.iter().enumerate() {
            let h = decode_header(skb)?;
            if h.len as usize > skb.len() {
                log::warn!(target: "sdpcm::glom", "sub-frame {} length {} exceeds buffer {}", i, h.len, skb.len());
                return Err(FrameError::Incomplete { needed: h.len as usize });
            }
            if !matches!(h.channel, Channel::Data | Channel::Event) {
                return Err(FrameError::UnexpectedChannel(h.channel as u8));
            }
            if i == 0 && h.seq != sf.seq {
                log::debug!(target: "sdpcm::glom", "superframe seq {} first sub-frame seq {}", sf.seq, h.seq);
            }
            subs.push(h);
        }

        // 超帧头携带整组的流控、窗口和下一帧长度提示
        self.keep_hint(&sf);
        self.credit.on_rx_header(&sf, &mut self.stats);
        Ok(subs)
    }

    /// 去头、截尾、按描述符顺序交付。
    fn glom_dispatch(&mut self, subs: Vec<SdpcmHeader>, rxseq: &mut u8) -> usize {
        let set = core::mem::take(&mut self.rx.glom);
        let num = set.len();
        for (mut skb, h) in set.into_iter().zip(subs) {
            self.check_seq(rxseq, h.seq);
            skb.trim(h.len as usize);
            skb.pull(h.data_offset as usize);
            if skb.is_empty() {
                continue;
            }
            self.stats.rx_frames += 1;
            self.out.frames.push((h.channel, skb));
        }
        self.stats.rx_glom += 1;
        self.stats.rx_glom_frames += num as u64;
        log::trace!(target: "sdpcm::glom", "glom delivered {} sub-frames", num);
        num
    }
}
