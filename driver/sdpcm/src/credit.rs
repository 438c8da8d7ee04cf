//! 发送信用窗口与流控位
//!
//! 对端在接收帧头里通告允许使用的最大发送序号 `window`；本端可发送当且仅当
//! `window - tx_seq`（mod 256）非零且最高位为 0。最高位置位说明窗口已经越过，视为关闭。

use crate::codec::SdpcmHeader;
use crate::stats::SdpcmStats;

/// 通告窗口相对当前序号超过该值时认为不可信
pub const WINDOW_SANITY: u8 = 0x40;
/// 钳位后的窗口：当前序号往后两个
pub const WINDOW_CLAMP: u8 = 2;

#[derive(Debug, Clone)]
pub struct CreditController {
    tx_seq: u8,
    tx_max: u8,
    flow_bits: u8,
}

impl CreditController {
    pub fn new(initial_window: u8) -> Self {
        Self {
            tx_seq: 0,
            tx_max: initial_window,
            flow_bits: 0,
        }
    }

    /// 剩余信用（mod 256）。
    #[inline]
    pub fn available(&self) -> u8 {
        self.tx_max.wrapping_sub(self.tx_seq)
    }

    /// 是否允许再发一帧。
    #[inline]
    pub fn admit(&self) -> bool {
        let avail = self.available();
        avail != 0 && avail & 0x80 == 0
    }

    /// 当前可连续发送的帧数。
    pub fn admissible(&self) -> usize {
        if self.admit() {
            self.available() as usize
        } else {
            0
        }
    }

    /// 下一帧使用的序号
    pub fn tx_seq(&self) -> u8 {
        self.tx_seq
    }

    pub fn window(&self) -> u8 {
        self.tx_max
    }

    /// 对端按优先级的流控位图；置位的优先级暂停出队
    pub fn flow_bits(&self) -> u8 {
        self.flow_bits
    }

    /// 帧成功写出后调用。
    #[inline]
    pub fn on_tx_success(&mut self) {
        self.tx_seq = self.tx_seq.wrapping_add(1);
    }

    /// 处理接收帧头携带的流控位与窗口。
    pub fn on_rx_header(&mut self, hdr: &SdpcmHeader, stats: &mut SdpcmStats) {
        self.update_flow(hdr.flow_bits, stats);
        if hdr.channel.carries_window() {
            self.update_window(hdr.window, stats);
        }
    }

    pub fn update_flow(&mut self, bits: u8, stats: &mut SdpcmStats) {
        if bits == self.flow_bits {
            return;
        }
        stats.fc_xoff += (bits & !self.flow_bits).count_ones() as u64;
        stats.fc_xon += (self.flow_bits & !bits).count_ones() as u64;
        stats.fc_rcvd += 1;
        log::debug!(target: "sdpcm::tx", "flow bits 0x{:02x} -> 0x{:02x}", self.flow_bits, bits);
        self.flow_bits = bits;
    }

    pub fn update_window(&mut self, advertised: u8, stats: &mut SdpcmStats) {
        let mut max = advertised;
        if max.wrapping_sub(self.tx_seq) > WINDOW_SANITY {
            log::warn!(
                target: "sdpcm::tx",
                "unlikely tx window 0x{:02x} at seq 0x{:02x}, clamping",
                max,
                self.tx_seq
            );
            max = self.tx_seq.wrapping_add(WINDOW_CLAMP);
            stats.window_clamps += 1;
        }
        self.tx_max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Channel;
    use proptest::prelude::*;

    #[test]
    fn initial_window_admits_until_exhausted() {
        let mut stats = SdpcmStats::default();
        let mut c = CreditController::new(4);
        for _ in 0..4 {
            assert!(c.admit());
            c.on_tx_success();
        }
        assert!(!c.admit());
        assert_eq!(c.admissible(), 0);

        c.update_window(8, &mut stats);
        assert_eq!(c.admissible(), 4);
    }

    #[test]
    fn wraparound() {
        let mut stats = SdpcmStats::default();
        let mut c = CreditController::new(0);
        for _ in 0..254 {
            c.on_tx_success();
        }
        assert_eq!(c.tx_seq(), 254);
        c.update_window(3, &mut stats);
        assert_eq!(c.available(), 5);
        assert!(c.admit());
        assert_eq!(stats.window_clamps, 0);
    }

    #[test]
    fn implausible_window_is_clamped() {
        let mut stats = SdpcmStats::default();
        let mut c = CreditController::new(4);
        c.update_window(0x50, &mut stats);
        assert_eq!(c.window(), 2);
        assert_eq!(stats.window_clamps, 1);
    }

    #[test]
    fn flow_bit_accounting() {
        let mut stats = SdpcmStats::default();
        let mut c = CreditController::new(4);
        let mut hdr = SdpcmHeader::new(Channel::Control, 0);
        hdr.flow_bits = 0b0000_0110;
        hdr.window = 0x30;
        c.on_rx_header(&hdr, &mut stats);
        assert_eq!(c.flow_bits(), 0b110);
        assert_eq!((stats.fc_xoff, stats.fc_xon, stats.fc_rcvd), (2, 0, 1));
        // 控制通道不带窗口
        assert_eq!(c.window(), 4);

        hdr.flow_bits = 0b0000_0100;
        c.on_rx_header(&hdr, &mut stats);
        assert_eq!((stats.fc_xoff, stats.fc_xon, stats.fc_rcvd), (2, 1, 2));
        c.on_rx_header(&hdr, &mut stats);
        assert_eq!(stats.fc_rcvd, 2);
    }

    proptest! {
        #[test]
        fn never_admits_with_high_bit(seq_steps in any::<u8>(), window in any::<u8>()) {
            let mut stats = SdpcmStats::default();
            let mut c = CreditController::new(0);
            for _ in 0..seq_steps {
                c.on_tx_success();
            }
            c.update_window(window, &mut stats);
            let avail = c.window().wrapping_sub(c.tx_seq());
            prop_assert!(avail <= WINDOW_SANITY);
            if c.admit() {
                prop_assert!(avail != 0 && avail & 0x80 == 0);
            }
            prop_assert_eq!(c.admissible(), if c.admit() { avail as usize } else { 0 });
        }
    }
}
