mod common;

use common::*;
use sdio_bus::reg::{hmb, intr};
use sdpcm::SdpcmConfig;

/// 两个子帧：描述符长度 [40, 32]，块 64 时超帧补到 128 字节
fn two_subframes() -> (Vec<u8>, Vec<u8>, Vec<Vec<u8>>) {
    let p0 = vec![0xa0; 16];
    let p1 = vec![0xb1; 20];
    let subs = vec![Rx::data(1, &p0).bytes(), Rx::data(2, &p1).bytes()];
    let (desc, sf) = superframe(0, &subs, 64);
    (desc, sf, vec![p0, p1])
}

#[test]
fn superframe_delivers_subframes_in_order() {
    let h = Harness::up(small_cfg());
    let (desc, sf, payloads) = two_subframes();
    assert_eq!(sf.len(), 128);
    h.mock.push(desc);
    h.mock.push(sf);

    h.frame_ind();

    assert_eq!(h.rec.payloads(), payloads);
    assert_eq!(h.mock.reads()[..2], [32, 128]);
    // 描述符占一个序号，两个子帧各占一个
    assert_eq!(h.engine.snapshot().rx_seq, 3);
    let s = h.engine.stats();
    assert_eq!(s.rx_glom, 1);
    assert_eq!(s.rx_glom_frames, 2);
    assert_eq!(s.rx_badseq, 0);
}

#[test]
fn scatter_read_gives_same_result() {
    let h = Harness::up(small_cfg());
    h.mock.with(|s| s.sg = true);
    let (desc, sf, payloads) = two_subframes();
    h.mock.push(desc);
    h.mock.push(sf);

    h.frame_ind();

    assert_eq!(h.rec.payloads(), payloads);
    assert_eq!(h.engine.snapshot().rx_seq, 3);
}

#[test]
fn corrupt_subframe_drops_whole_set() {
    let h = Harness::up(small_cfg());
    let (desc, mut sf, _) = two_subframes();
    // 第二个子帧的长度补码
    sf[12 + 28 + 2] ^= 0xff;
    h.mock.push(desc);
    h.mock.push(sf);

    h.frame_ind();

    assert!(h.rec.frames().is_empty());
    assert_eq!(h.mock.naks(), 1);
    assert_eq!(h.mock.rf_terms(), 1);
    let s = h.engine.stats();
    assert_eq!(s.rx_glom_fail, 1);
    assert_eq!(s.rx_glom, 0);
    assert!(h.engine.snapshot().rx_skip);
}

#[test]
fn bad_descriptor_is_ignored() {
    let h = Harness::up(small_cfg());
    let (_, sf, _) = two_subframes();
    let desc = Rx::new(sdpcm::Channel::Aggregate, 0, &[8, 0]).desc().bytes();
    h.mock.push(desc);
    h.mock.push(sf);
    h.mock.push(Rx::data(3, b"tail").bytes());

    h.frame_ind();

    // 没有描述符的超帧按坏帧处理，之后的普通帧照常交付
    assert_eq!(h.rec.payloads(), [b"tail".to_vec()]);
    let s = h.engine.stats();
    assert_eq!(s.rx_glom_baddesc, 1);
    assert_eq!(s.rx_badhdr, 1);
    assert_eq!(h.mock.naks(), 0);
}

#[test]
fn oversized_set_naks_once() {
    let h = Harness::up(SdpcmConfig {
        max_glom_len: 64,
        ..small_cfg()
    });
    let (desc, sf, _) = two_subframes();
    h.mock.push(desc);
    h.mock.push(sf);

    h.frame_ind();

    assert!(h.rec.frames().is_empty());
    assert_eq!(h.mock.naks(), 1);
    assert_eq!(h.engine.stats().rx_nomem, 1);
    assert!(h.engine.snapshot().rx_skip);
}

#[test]
fn failed_superframe_read_is_retried() {
    let h = Harness::up(SdpcmConfig {
        rx_bound: 1,
        ..small_cfg()
    });
    let (desc, sf, payloads) = two_subframes();
    h.mock.push(desc);
    h.mock.push(sf);

    h.mock.raise(intr::HMB_FRAME_IND);
    h.engine.isr();
    // 第一轮只读到描述符
    assert!(h.engine.dpc());

    h.mock.with(|s| s.fail_reads = 1);
    h.engine.dpc();
    assert_eq!(h.mock.naks(), 1);
    assert!(h.rec.frames().is_empty());

    h.mock.with(|s| s.hmb_data = hmb::NAKHANDLED);
    h.interrupt(intr::HMB_HOST_INT | intr::HMB_FRAME_IND);

    assert_eq!(h.rec.payloads(), payloads);
    let s = h.engine.stats();
    assert_eq!(s.rx_readerr, 1);
    assert_eq!(s.rx_glom, 1);
}

#[test]
fn superframe_hint_drives_next_read() {
    let h = Harness::up(small_cfg());
    let (desc, mut sf, mut payloads) = two_subframes();
    // 超帧头提示下一帧 64 字节
    sf[7] = 4;
    let tail = vec![0xc3; 52];
    h.mock.push(desc);
    h.mock.push(sf);
    h.mock.push(Rx::data(3, &tail).bytes());

    h.frame_ind();

    payloads.push(tail);
    assert_eq!(h.rec.payloads(), payloads);
    assert_eq!(h.mock.reads()[..3], [32, 128, 64]);
    let s = h.engine.stats();
    assert_eq!(s.rx_readahead, 1);
    assert_eq!(s.rx_badseq, 0);
    assert_eq!(h.engine.snapshot().rx_seq, 4);
}
