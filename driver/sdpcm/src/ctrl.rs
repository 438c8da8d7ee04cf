//! 控制通道：单个待发控制帧 + 等待槽
//!
//! 控制负载前 4 字节是小端请求号，对端在响应里原样带回，用来匹配等待者。
//! 等待本身由调用线程按 1ms 轮询完成（见 `Sdpcm::submit_control_and_wait`），这里只管状态。

use skb::SkBuff;

use crate::codec::SDPCM_HDRLEN;

/// 请求号长度
pub const CTRL_ID_LEN: usize = 4;
/// 同时等待的请求数上限
pub const CTRL_MAX_WAITERS: usize = 8;

#[derive(Debug)]
struct Waiter {
    id: u32,
    response: Option<SkBuff>,
}

/// 等待槽句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CtrlToken {
    slot: usize,
    id: u32,
}

impl CtrlToken {
    pub fn id(&self) -> u32 {
        self.id
    }
}

pub(crate) struct CtrlState {
    waiters: [Option<Waiter>; CTRL_MAX_WAITERS],
    next_id: u32,
    /// 已入槽但尚未发出的控制帧
    pending_tx: Option<(u32, SkBuff)>,
}

impl CtrlState {
    pub fn new() -> Self {
        Self {
            waiters: Default::default(),
            next_id: 1,
            pending_tx: None,
        }
    }

    /// 占一个等待槽并分配请求号；槽满返回 None。
    pub fn register(&mut self) -> Option<CtrlToken> {
        let slot = self.waiters.iter().position(|w| w.is_none())?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.waiters[slot] = Some(Waiter { id, response: None });
        Some(CtrlToken { slot, id })
    }

    /// 构造带请求号前缀的控制负载，并为帧头预留 headroom。
    pub fn build_request(id: u32, payload: &[u8]) -> SkBuff {
        let mut skb = SkBuff::alloc_with_headroom(SDPCM_HDRLEN + CTRL_ID_LEN + payload.len(), SDPCM_HDRLEN);
        if let Some(dst) = skb.put(CTRL_ID_LEN + payload.len()) {
            dst[..CTRL_ID_LEN].copy_from_slice(&id.to_le_bytes());
            dst[CTRL_ID_LEN..].copy_from_slice(payload);
        }
        skb
    }

    /// 放入待发槽；已有控制帧在等待发送时把帧还回去。
    pub fn stage(&mut self, id: u32, skb: SkBuff) -> Result<(), SkBuff> {
        if self.pending_tx.is_some() {
            return Err(skb);
        }
        self.pending_tx = Some((id, skb));
        Ok(())
    }

    pub fn has_pending_tx(&self) -> bool {
        self.pending_tx.is_some()
    }

    pub fn take_pending_tx(&mut self) -> Option<SkBuff> {
        self.pending_tx.take().map(|(_, skb)| skb)
    }

    /// 收到控制响应。按请求号交给等待者（去掉请求号前缀）；无人认领返回 false。
    pub fn on_response(&mut self, mut skb: SkBuff) -> bool {
        if skb.len() < CTRL_ID_LEN {
            log::warn!(target: "sdpcm::ctrl", "control frame too short: {} bytes", skb.len());
            return false;
        }
        let id = u32::from_le_bytes([skb[0], skb[1], skb[2], skb[3]]);
        let Some(w) = self.waiters.iter_mut().flatten().find(|w| w.id == id) else {
            log::debug!(target: "sdpcm::ctrl", "late control response id={}", id);
            return false;
        };
        if w.response.is_some() {
            log::debug!(target: "sdpcm::ctrl", "duplicate control response id={}", id);
            return false;
        }
        skb.pull(CTRL_ID_LEN);
        w.response = Some(skb);
        true
    }

    /// 响应到了就取走并释放槽位。
    pub fn take_response(&mut self, token: CtrlToken) -> Option<SkBuff> {
        let w = self.waiters[token.slot].as_mut()?;
        if w.id != token.id || w.response.is_none() {
            return None;
        }
        let resp = w.response.take();
        self.waiters[token.slot] = None;
        resp
    }

    /// 放弃等待：释放槽位，若请求还没发出也一并撤回。
    pub fn cancel(&mut self, token: CtrlToken) {
        if matches!(&self.waiters[token.slot], Some(w) if w.id == token.id) {
            self.waiters[token.slot] = None;
        }
        if matches!(&self.pending_tx, Some((id, _)) if *id == token.id) {
            self.pending_tx = None;
        }
    }

    /// 链路复位：丢弃待发帧与全部等待。
    pub fn reset(&mut self) {
        self.pending_tx = None;
        for w in self.waiters.iter_mut() {
            *w = None;
        }
    }
}
