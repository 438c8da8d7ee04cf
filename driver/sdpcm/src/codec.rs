//! SDPCM 帧编解码
//!
//! 序号要占满 8 位（mod 256），所以独占第 4 字节，通道挪到第 8 字节；不用序号与通道挤在同一字节的紧凑布局。
//!
//! 帧头 12 字节，小端：
//!
//! ```text
//! 0..2   len            帧总长（含头）
//! 2..4   !len           长度反码
//! 4      seq            序号 (mod 256)
//! 5      data_offset    负载起始偏移
//! 6      flow_bits      对端按优先级的流控位图
//! 7      next_len       下一帧长度提示，16 字节为单位
//! 8      chan | flags   低 4 位通道，高 4 位标志
//! 9      window         对端许可的最大发送序号
//! 10..12 reserved
//! ```

use skb::SkBuff;

use crate::error::FrameError;

/// 长度 + 反码
pub const FRAMETAG_LEN: usize = 4;
/// 软件头
pub const SWHEADER_LEN: usize = 8;
pub const SDPCM_HDRLEN: usize = FRAMETAG_LEN + SWHEADER_LEN;
/// next_len 字段的单位
pub const NEXTLEN_UNIT: usize = 16;

/// 聚合描述符标志（flags 高 4 位中）
pub const FLAG_GLOM_DESC: u8 = 0x8;

const CHAN_MASK: u8 = 0x0f;
const FLAGS_SHIFT: u8 = 4;

/// 逻辑通道
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Control = 0,
    Event = 1,
    Data = 2,
    Aggregate = 3,
    Test = 15,
}

impl Channel {
    /// 该通道的帧头是否带有效的发送窗口。
    pub fn carries_window(self) -> bool {
        matches!(self, Channel::Data | Channel::Event | Channel::Aggregate)
    }
}

impl TryFrom<u8> for Channel {
    type Error = FrameError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Channel::Control),
            1 => Ok(Channel::Event),
            2 => Ok(Channel::Data),
            3 => Ok(Channel::Aggregate),
            15 => Ok(Channel::Test),
            other => Err(FrameError::UnknownChannel(other)),
        }
    }
}

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdpcmHeader {
    pub len: u16,
    pub seq: u8,
    pub channel: Channel,
    /// 4 位标志
    pub flags: u8,
    pub data_offset: u8,
    pub flow_bits: u8,
    pub next_len: u8,
    pub window: u8,
}

impl SdpcmHeader {
    pub fn new(channel: Channel, seq: u8) -> Self {
        Self {
            len: SDPCM_HDRLEN as u16,
            seq,
            channel,
            flags: 0,
            data_offset: SDPCM_HDRLEN as u8,
            flow_bits: 0,
            next_len: 0,
            window: 0,
        }
    }

    pub fn is_glom_desc(&self) -> bool {
        self.flags & FLAG_GLOM_DESC != 0
    }

    /// 下一帧长度提示（字节）。
    pub fn next_len_bytes(&self) -> usize {
        self.next_len as usize * NEXTLEN_UNIT
    }

    pub fn payload_len(&self) -> usize {
        (self.len as usize).saturating_sub(self.data_offset as usize)
    }
}

/// 解码结果：帧头与负载切片
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: SdpcmHeader,
    pub payload: &'a [u8],
}

/// 读取 frame tag `(len, check)`。
pub fn read_tag(buf: &[u8]) -> Result<(u16, u16), FrameError> {
    if buf.len() < FRAMETAG_LEN {
        return Err(FrameError::Incomplete { needed: FRAMETAG_LEN });
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]);
    let check = u16::from_le_bytes([buf[2], buf[3]]);
    Ok((len, check))
}

/// 校验 frame tag：`len ^ check == 0xFFFF`。
pub fn check_tag(len: u16, check: u16) -> Result<(), FrameError> {
    if len ^ check != 0xffff {
        return Err(FrameError::Checksum { len, check });
    }
    Ok(())
}

/// 只解析帧头，不要求缓冲里有完整负载（接收预读用）。
pub fn decode_header(buf: &[u8]) -> Result<SdpcmHeader, FrameError> {
    let (len, check) = read_tag(buf)?;
    check_tag(len, check)?;
    if (len as usize) < SDPCM_HDRLEN {
        return Err(FrameError::TooShort(len));
    }
    if buf.len() < SDPCM_HDRLEN {
        return Err(FrameError::Incomplete { needed: SDPCM_HDRLEN });
    }
    let channel = Channel::try_from(buf[8] & CHAN_MASK)?;
    let data_offset = buf[5];
    if (data_offset as usize) < SDPCM_HDRLEN || data_offset as u16 > len {
        return Err(FrameError::BadOffset {
            offset: data_offset,
            len,
        });
    }
    Ok(SdpcmHeader {
        len,
        seq: buf[4],
        channel,
        flags: buf[8] >> FLAGS_SHIFT,
        data_offset,
        flow_bits: buf[6],
        next_len: buf[7],
        window: buf[9],
    })
}

/// 解析整帧；缓冲短于声明长度时返回 `Incomplete`。
pub fn decode(buf: &[u8]) -> Result<Frame<'_>, FrameError> {
    let header = decode_header(buf)?;
    let len = header.len as usize;
    if buf.len() < len {
        return Err(FrameError::Incomplete { needed: len });
    }
    Ok(Frame {
        header,
        payload: &buf[header.data_offset as usize..len],
    })
}

/// 解析聚合帧外层头：必须是 Aggregate 通道且不带描述符标志。
pub fn decode_superframe_header(buf: &[u8]) -> Result<SdpcmHeader, FrameError> {
    let header = decode_header(buf)?;
    if header.channel != Channel::Aggregate || header.is_glom_desc() {
        return Err(FrameError::UnexpectedChannel(header.channel as u8));
    }
    Ok(header)
}

/// 把 `hdr` 写到 `buf` 开头，并把头与 data_offset 之间的填充清零。
pub fn write_header(buf: &mut [u8], hdr: &SdpcmHeader) -> Result<(), FrameError> {
    let doff = hdr.data_offset as usize;
    if doff < SDPCM_HDRLEN || doff > hdr.len as usize {
        return Err(FrameError::BadOffset {
            offset: hdr.data_offset,
            len: hdr.len,
        });
    }
    if buf.len() < doff {
        return Err(FrameError::Incomplete { needed: doff });
    }
    buf[0..2].copy_from_slice(&hdr.len.to_le_bytes());
    buf[2..4].copy_from_slice(&(!hdr.len).to_le_bytes());
    buf[4] = hdr.seq;
    buf[5] = hdr.data_offset;
    buf[6] = hdr.flow_bits;
    buf[7] = hdr.next_len;
    buf[8] = (hdr.channel as u8 & CHAN_MASK) | (hdr.flags << FLAGS_SHIFT);
    buf[9] = hdr.window;
    buf[10..doff].fill(0);
    Ok(())
}

/// 编码一帧：头 + 填充到 `data_offset` + 负载。
pub fn encode(
    channel: Channel,
    seq: u8,
    data_offset: u8,
    flow_bits: u8,
    payload: &[u8],
) -> Result<SkBuff, FrameError> {
    let total = data_offset as usize + payload.len();
    if total > u16::MAX as usize {
        return Err(FrameError::TooLong(total));
    }
    let hdr = SdpcmHeader {
        len: total as u16,
        flow_bits,
        data_offset,
        ..SdpcmHeader::new(channel, seq)
    };
    let mut skb = SkBuff::alloc(total);
    skb.put_zeroed(total);
    write_header(&mut skb, &hdr)?;
    skb[data_offset as usize..].copy_from_slice(payload);
    Ok(skb)
}

/// 发送路径：在 `skb` 的 headroom 里补上帧头，帧长取 push 之后的长度。
pub(crate) fn prepend_header(skb: &mut SkBuff, hdr: &mut SdpcmHeader) -> Result<(), FrameError> {
    let doff = hdr.data_offset as usize;
    if skb.headroom() < doff {
        skb.reserve(doff);
    }
    if !skb.push(doff) {
        return Err(FrameError::Incomplete { needed: doff });
    }
    if skb.len() > u16::MAX as usize {
        skb.pull(doff);
        return Err(FrameError::TooLong(skb.len() + doff));
    }
    hdr.len = skb.len() as u16;
    write_header(skb, hdr)
}

/// 向上取整到 `align` 的倍数。
#[inline]
pub(crate) fn round_up(len: usize, align: usize) -> usize {
    if align == 0 {
        return len;
    }
    len.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_layout() {
        let skb = encode(Channel::Data, 0x5a, 14, 0x03, &[1, 2, 3]).unwrap();
        assert_eq!(skb.len(), 17);
        assert_eq!(&skb[0..4], &[17, 0, !17u8, 0xff]);
        assert_eq!(skb[4], 0x5a);
        assert_eq!(skb[5], 14);
        assert_eq!(skb[6], 0x03);
        assert_eq!(skb[8], Channel::Data as u8);
        assert_eq!(&skb[12..14], &[0, 0]);
        assert_eq!(&skb[14..], &[1, 2, 3]);
    }

    #[test]
    fn tag_mismatch_rejected() {
        let mut skb = encode(Channel::Event, 1, 12, 0, &[9; 8]).unwrap();
        skb[2] ^= 0x01;
        assert!(matches!(decode(&skb), Err(FrameError::Checksum { .. })));
    }

    #[test]
    fn short_and_offset_errors() {
        assert_eq!(decode(&[0u8; 2]), Err(FrameError::Incomplete { needed: 4 }));

        // len=8 反码正确，但小于头长
        let buf = [8, 0, !8u8, 0xff, 0, 12, 0, 0, 2, 0, 0, 0];
        assert_eq!(decode(&buf), Err(FrameError::TooShort(8)));

        let mut skb = encode(Channel::Data, 1, 12, 0, &[0; 4]).unwrap();
        skb[5] = 20;
        assert!(matches!(decode(&skb), Err(FrameError::BadOffset { offset: 20, len: 16 })));
        skb[5] = 4;
        assert!(matches!(decode(&skb), Err(FrameError::BadOffset { .. })));
    }

    #[test]
    fn unknown_channel() {
        let mut skb = encode(Channel::Data, 1, 12, 0, &[]).unwrap();
        skb[8] = 7;
        assert_eq!(decode(&skb), Err(FrameError::UnknownChannel(7)));
    }

    #[test]
    fn truncated_body_is_incomplete() {
        let skb = encode(Channel::Data, 1, 12, 0, &[0; 20]).unwrap();
        assert_eq!(decode(&skb[..20]), Err(FrameError::Incomplete { needed: 32 }));
        // 只有头的预读仍能解析
        assert_eq!(decode_header(&skb[..12]).unwrap().len, 32);
    }

    #[test]
    fn superframe_header_checks_channel() {
        let skb = encode(Channel::Data, 1, 12, 0, &[]).unwrap();
        assert_eq!(
            decode_superframe_header(&skb),
            Err(FrameError::UnexpectedChannel(Channel::Data as u8))
        );
        let mut desc = encode(Channel::Aggregate, 1, 12, 0, &[40, 0]).unwrap();
        assert!(decode_superframe_header(&desc).is_ok());
        desc[8] |= FLAG_GLOM_DESC << 4;
        assert!(decode_header(&desc).unwrap().is_glom_desc());
        assert!(decode_superframe_header(&desc).is_err());
    }

    #[test]
    fn prepend_uses_headroom() {
        let mut skb = SkBuff::from_slice(SDPCM_HDRLEN, &[0xaa; 6]);
        let mut hdr = SdpcmHeader::new(Channel::Data, 9);
        prepend_header(&mut skb, &mut hdr).unwrap();
        assert_eq!(hdr.len, 18);
        let f = decode(&skb).unwrap();
        assert_eq!(f.header.seq, 9);
        assert_eq!(f.payload, &[0xaa; 6]);

        // 没有 headroom 时先 reserve
        let mut bare = SkBuff::from_slice(0, &[1]);
        let mut hdr = SdpcmHeader::new(Channel::Event, 0);
        prepend_header(&mut bare, &mut hdr).unwrap();
        assert_eq!(decode(&bare).unwrap().payload, &[1]);
    }

    #[test]
    fn round_up_alignment() {
        assert_eq!(round_up(72, 64), 128);
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(5, 0), 5);
    }

    fn channel_strategy() -> impl Strategy<Value = Channel> {
        prop_oneof![
            Just(Channel::Control),
            Just(Channel::Event),
            Just(Channel::Data),
            Just(Channel::Aggregate),
            Just(Channel::Test),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            chan in channel_strategy(),
            seq in any::<u8>(),
            extra in 0u8..32,
            fc in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let doff = SDPCM_HDRLEN as u8 + extra;
            let skb = encode(chan, seq, doff, fc, &payload).unwrap();
            let (len, check) = read_tag(&skb).unwrap();
            prop_assert_eq!(len ^ check, 0xffff);
            let f = decode(&skb).unwrap();
            prop_assert_eq!(f.header.channel, chan);
            prop_assert_eq!(f.header.seq, seq);
            prop_assert_eq!(f.header.data_offset, doff);
            prop_assert_eq!(f.header.flow_bits, fc);
            prop_assert_eq!(f.payload, &payload[..]);
        }
    }
}
