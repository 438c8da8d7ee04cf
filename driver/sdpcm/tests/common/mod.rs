//! 集成测试共用：脚本化的总线、假时钟、记录型消费者、帧构造。

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axerrno::{AxError, AxResult};
use sdio_bus::reg::{self, clk, framectrl, smb};
use sdio_bus::{BusError, BusResult, IrqHandler, SdioBus, XferFlags};
use sdpcm::codec::{encode, FLAG_GLOM_DESC};
use sdpcm::{Channel, LinkConsumer, OsServices, Sdpcm, SdpcmConfig};
use skb::SkBuff;
use spin::Mutex;

/// 高速时钟的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtMode {
    /// 请求后立即可用
    Immediate,
    /// 等测试调用 `chip_active`
    Deferred,
}

pub struct MockState {
    /// 设备待发给主机的传输，每项对应一次完整的 F2 传输
    pub rx: VecDeque<Vec<u8>>,
    rx_pos: usize,
    /// FIFO 读长度记录
    pub reads: Vec<usize>,
    /// FIFO 写入内容
    pub writes: Vec<Vec<u8>>,
    /// 寄存器写记录
    pub reg_writes: Vec<(u32, u32)>,
    /// 背板写记录 (addr, len)
    pub mem_writes: Vec<(u32, usize)>,
    pub mem: HashMap<u32, u8>,
    pub intstatus: u32,
    pub intpend: u32,
    pub hostintmask: u32,
    pub hmb_data: u32,
    pub tosb: u32,
    pub clkcsr: u32,
    pub ht_avail: bool,
    pub ht_mode: HtMode,
    pub bus_clock: bool,
    pub block_size: usize,
    pub sg: bool,
    /// 邮箱位不被对端取走
    pub mailbox_sticky: bool,
    pub fail_reads: u32,
    pub fail_writes: u32,
    pub fail_regs: bool,
    /// 第 n 次背板写失败（从 0 计）
    pub fail_mem_write_at: Option<usize>,
    pub aborts: u32,
    handler: Option<IrqHandler>,
}

impl MockState {
    fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            rx_pos: 0,
            reads: Vec::new(),
            writes: Vec::new(),
            reg_writes: Vec::new(),
            mem_writes: Vec::new(),
            mem: HashMap::new(),
            intstatus: 0,
            intpend: 0,
            hostintmask: 0,
            hmb_data: 0,
            tosb: 0,
            clkcsr: 0,
            ht_avail: false,
            ht_mode: HtMode::Immediate,
            bus_clock: true,
            block_size: 64,
            sg: false,
            mailbox_sticky: false,
            fail_reads: 0,
            fail_writes: 0,
            fail_regs: false,
            fail_mem_write_at: None,
            aborts: 0,
            handler: None,
        }
    }

    fn fifo_read(&mut self, buf: &mut [u8]) {
        buf.fill(0);
        let Some(front) = self.rx.front() else {
            return;
        };
        let avail = front.len() - self.rx_pos;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&front[self.rx_pos..self.rx_pos + n]);
        self.rx_pos += n;
        if self.rx_pos >= front.len() {
            self.rx.pop_front();
            self.rx_pos = 0;
        }
    }
}

/// 测试持有的句柄，和 `MockBus` 共享状态
#[derive(Clone)]
pub struct MockHandle(pub Arc<Mutex<MockState>>);

pub struct MockBus(Arc<Mutex<MockState>>);

pub fn mock_bus() -> (MockBus, MockHandle) {
    let st = Arc::new(Mutex::new(MockState::new()));
    (MockBus(st.clone()), MockHandle(st))
}

impl SdioBus for MockBus {
    fn read(&mut self, addr: u32, buf: &mut [u8], flags: XferFlags) -> BusResult<()> {
        let mut st = self.0.lock();
        if flags.contains(XferFlags::BACKPLANE) {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = st.mem.get(&(addr + i as u32)).copied().unwrap_or(0);
            }
            return Ok(());
        }
        st.reads.push(buf.len());
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(BusError::Crc);
        }
        st.fifo_read(buf);
        Ok(())
    }

    fn write(&mut self, addr: u32, buf: &[u8], flags: XferFlags) -> BusResult<()> {
        let mut st = self.0.lock();
        if flags.contains(XferFlags::BACKPLANE) {
            let idx = st.mem_writes.len();
            st.mem_writes.push((addr, buf.len()));
            if st.fail_mem_write_at == Some(idx) {
                return Err(BusError::Io(-5));
            }
            for (i, b) in buf.iter().enumerate() {
                st.mem.insert(addr + i as u32, *b);
            }
            return Ok(());
        }
        if st.fail_writes > 0 {
            st.fail_writes -= 1;
            return Err(BusError::Timeout);
        }
        st.writes.push(buf.to_vec());
        Ok(())
    }

    fn read_sg(&mut self, addr: u32, bufs: &mut [&mut [u8]], flags: XferFlags) -> BusResult<()> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut flat = vec![0u8; total];
        self.read(addr, &mut flat, flags)?;
        let mut off = 0;
        for b in bufs.iter_mut() {
            let n = b.len();
            b.copy_from_slice(&flat[off..off + n]);
            off += n;
        }
        Ok(())
    }

    fn supports_sg(&self) -> bool {
        self.0.lock().sg
    }

    fn read_register(&mut self, offset: u32) -> BusResult<u32> {
        let mut st = self.0.lock();
        if st.fail_regs {
            return Err(BusError::Io(-5));
        }
        Ok(match offset {
            reg::INTSTATUS => st.intstatus,
            reg::HOSTINTMASK => st.hostintmask,
            reg::TOHOSTMAILBOXDATA => core::mem::take(&mut st.hmb_data),
            reg::TOSBMAILBOX => {
                if st.mailbox_sticky {
                    st.tosb
                } else {
                    0
                }
            }
            reg::CHIPCLKCSR => {
                let mut v = st.clkcsr;
                if st.ht_avail {
                    v |= clk::HT_AVAIL | clk::ALP_AVAIL;
                }
                v
            }
            reg::CCCR_INTPEND => st.intpend,
            _ => 0,
        })
    }

    fn write_register(&mut self, offset: u32, value: u32) -> BusResult<()> {
        let mut st = self.0.lock();
        if st.fail_regs {
            return Err(BusError::Io(-5));
        }
        st.reg_writes.push((offset, value));
        match offset {
            reg::INTSTATUS => {
                st.intstatus &= !value;
                if st.intstatus == 0 {
                    st.intpend = 0;
                }
            }
            reg::HOSTINTMASK => st.hostintmask = value,
            reg::TOSBMAILBOX => st.tosb = value,
            reg::CHIPCLKCSR => {
                st.clkcsr = value & 0x3f;
                if value & clk::HT_AVAIL_REQ == 0 {
                    st.ht_avail = false;
                } else if st.ht_mode == HtMode::Immediate {
                    st.ht_avail = true;
                }
            }
            reg::FRAMECTRL => {
                // 终止只丢弃读了一半的传输
                if value & framectrl::RF_TERM != 0 && st.rx_pos > 0 {
                    st.rx.pop_front();
                    st.rx_pos = 0;
                }
            }
            reg::CCCR_IOABORT => st.aborts += 1,
            _ => {}
        }
        Ok(())
    }

    fn set_interrupt_handler(&mut self, handler: Option<IrqHandler>) {
        self.0.lock().handler = handler;
    }

    fn block_size(&self) -> usize {
        self.0.lock().block_size
    }

    fn set_bus_clock(&mut self, on: bool) -> BusResult<()> {
        self.0.lock().bus_clock = on;
        Ok(())
    }
}

impl MockHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn push(&self, transfer: Vec<u8>) {
        self.0.lock().rx.push_back(transfer);
    }

    /// 置中断状态位；装了回调（线程模式）就顺带触发。
    pub fn raise(&self, bits: u32) {
        let mut guard = self.0.lock();
        let st = &mut *guard;
        st.intstatus |= bits;
        st.intpend |= reg::INTPEND_F2;
        if let Some(h) = st.handler.as_ref() {
            h();
        }
    }

    /// 模拟芯片激活：高速时钟就绪并发 CHIPACTIVE 中断。
    pub fn chip_active(&self) {
        self.0.lock().ht_avail = true;
        self.raise(sdio_bus::reg::intr::CHIPACTIVE);
    }

    pub fn reads(&self) -> Vec<usize> {
        self.0.lock().reads.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().writes.clone()
    }

    pub fn reg_writes(&self) -> Vec<(u32, u32)> {
        self.0.lock().reg_writes.clone()
    }

    pub fn count_reg_writes(&self, offset: u32, value: u32) -> usize {
        self.0
            .lock()
            .reg_writes
            .iter()
            .filter(|&&(o, v)| o == offset && v == value)
            .count()
    }

    pub fn rf_terms(&self) -> usize {
        self.count_reg_writes(reg::FRAMECTRL, framectrl::RF_TERM)
    }

    pub fn naks(&self) -> usize {
        self.count_reg_writes(reg::TOSBMAILBOX, smb::NAK)
    }

    pub fn clear_records(&self) {
        let mut st = self.0.lock();
        st.reads.clear();
        st.writes.clear();
        st.reg_writes.clear();
    }
}

/// 假时钟：sleep 立即返回并推进时间。
#[derive(Clone, Default)]
pub struct FakeOs(pub Arc<AtomicU64>);

impl FakeOs {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl OsServices for FakeOs {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms.max(1));
    }

    fn spawn(&self, _name: &'static str, _entry: Box<dyn FnOnce() + Send + 'static>) -> AxResult<()> {
        Err(AxError::Unsupported)
    }
}

/// 真时钟 + std 线程
pub struct StdOs {
    start: std::time::Instant,
}

impl Default for StdOs {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl OsServices for StdOs {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }

    fn spawn(&self, name: &'static str, entry: Box<dyn FnOnce() + Send + 'static>) -> AxResult<()> {
        std::thread::Builder::new()
            .name(name.into())
            .spawn(entry)
            .map(|_| ())
            .map_err(|_| AxError::NoMemory)
    }
}

/// 记录收到的帧与背压事件
#[derive(Default)]
pub struct Recorder {
    pub frames: Mutex<Vec<(Channel, Vec<u8>)>>,
    pub backpressure: Mutex<Vec<bool>>,
}

impl Recorder {
    pub fn frames(&self) -> Vec<(Channel, Vec<u8>)> {
        self.frames.lock().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.frames.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn backpressure_events(&self) -> Vec<bool> {
        self.backpressure.lock().clone()
    }
}

impl LinkConsumer for Recorder {
    fn deliver(&self, channel: Channel, payload: SkBuff) {
        self.frames.lock().push((channel, payload.to_vec()));
    }

    fn backpressure(&self, on: bool) {
        self.backpressure.lock().push(on);
    }
}

/// 设备侧发出的帧
#[derive(Clone)]
pub struct Rx {
    pub chan: Channel,
    pub seq: u8,
    pub payload: Vec<u8>,
    pub next_len: u8,
    pub window: u8,
    pub flow: u8,
    pub desc: bool,
}

impl Rx {
    pub fn new(chan: Channel, seq: u8, payload: &[u8]) -> Self {
        Self {
            chan,
            seq,
            payload: payload.to_vec(),
            next_len: 0,
            window: 0x10,
            flow: 0,
            desc: false,
        }
    }

    pub fn data(seq: u8, payload: &[u8]) -> Self {
        Self::new(Channel::Data, seq, payload)
    }

    pub fn next_len(mut self, n: u8) -> Self {
        self.next_len = n;
        self
    }

    pub fn window(mut self, w: u8) -> Self {
        self.window = w;
        self
    }

    pub fn flow(mut self, f: u8) -> Self {
        self.flow = f;
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let skb = encode(self.chan, self.seq, 12, self.flow, &self.payload).expect("encode");
        let mut v = skb.to_vec();
        v[7] = self.next_len;
        if self.desc {
            v[8] |= FLAG_GLOM_DESC << 4;
        }
        v[9] = self.window;
        v
    }
}

/// 聚合帧：返回 (描述符帧, 超帧传输)。`subs` 为各子帧完整字节。
pub fn superframe(desc_seq: u8, subs: &[Vec<u8>], block: usize) -> (Vec<u8>, Vec<u8>) {
    let mut lens: Vec<u16> = subs.iter().map(|s| s.len() as u16).collect();
    lens[0] += 12;
    let desc_payload: Vec<u8> = lens.iter().flat_map(|l| l.to_le_bytes()).collect();
    let desc = Rx::new(Channel::Aggregate, desc_seq, &desc_payload).desc().bytes();

    let total: usize = lens.iter().map(|&l| l as usize).sum();
    let first_seq = subs[0][4];
    let mut hdr = Rx::new(Channel::Aggregate, first_seq, &[]).bytes();
    hdr[0..2].copy_from_slice(&(total as u16).to_le_bytes());
    hdr[2..4].copy_from_slice(&(!(total as u16)).to_le_bytes());

    let mut sf = hdr;
    for s in subs {
        sf.extend_from_slice(s);
    }
    let padded = total.div_ceil(block) * block;
    sf.resize(padded, 0);
    (desc, sf)
}

pub fn small_cfg() -> SdpcmConfig {
    SdpcmConfig {
        txq_len: 64,
        txq_hiwat: 48,
        txq_lowat: 16,
        ram_size: 0x1000,
        download_chunk: 64,
        ..SdpcmConfig::default()
    }
}

pub type Engine = Sdpcm<MockBus, FakeOs>;

pub struct Harness {
    pub engine: Arc<Engine>,
    pub mock: MockHandle,
    pub os: FakeOs,
    pub rec: Arc<Recorder>,
}

impl Harness {
    /// 建好引擎并完成 bus_init
    pub fn up(cfg: SdpcmConfig) -> Self {
        let h = Self::new(cfg);
        h.engine.bus_init().expect("bus_init");
        h.mock.clear_records();
        h
    }

    pub fn new(cfg: SdpcmConfig) -> Self {
        let (bus, mock) = mock_bus();
        let os = FakeOs::default();
        let rec = Arc::new(Recorder::default());
        let engine = Arc::new(Sdpcm::new(bus, os.clone(), cfg, rec.clone()).expect("engine"));
        Self { engine, mock, os, rec }
    }

    /// DPC 跑到不再要求重跑
    pub fn pump(&self) {
        for _ in 0..64 {
            if !self.engine.dpc() {
                return;
            }
        }
        panic!("dpc did not converge");
    }

    /// 中断一次并跑 DPC
    pub fn interrupt(&self, bits: u32) {
        self.mock.raise(bits);
        self.engine.isr();
        self.pump();
    }

    pub fn frame_ind(&self) {
        self.interrupt(reg::intr::HMB_FRAME_IND);
    }
}

/// 拆开一次 FIFO 写里首尾相接的帧（每帧 4 字节对齐）
pub fn split_frames(buf: &[u8]) -> Vec<sdpcm::SdpcmHeader> {
    let mut out = Vec::new();
    let mut off = 0;
    while off + 12 <= buf.len() {
        let Ok(h) = sdpcm::codec::decode_header(&buf[off..]) else {
            break;
        };
        out.push(h);
        off += (h.len as usize).div_ceil(4) * 4;
    }
    out
}
