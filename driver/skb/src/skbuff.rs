//! SkBuff：链路层包缓冲
//!
//! 一块连续存储上用两个下标划出有效区：`buf[..start]` 是 headroom，`buf[start..end]` 是数据，
//! `buf[end..]` 是 tailroom。发送时上层只写负载，帧头在发送前用 `push` 补进 headroom；
//! 接收时整帧读入后用 `pull` 去头、`trim` 截掉块对齐填充。

use alloc::vec::Vec;
use core::fmt;
use core::iter;
use core::ops::{Deref, DerefMut};

/// 单包缓冲。只能移动，交出去之后原持有者不再访问。
#[derive(Clone)]
pub struct SkBuff {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl SkBuff {
    /// 分配 `capacity` 字节，数据区为空、没有 headroom。
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配 `capacity` 字节，数据区从 `headroom` 处开始。
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        let at = headroom.min(capacity);
        Self {
            buf: iter::repeat(0).take(capacity).collect(),
            start: at,
            end: at,
        }
    }

    /// 可失败的分配：分配器拒绝时返回 None。
    /// 接收路径（尤其是聚合帧）靠它把内存不足转成可恢复的 NAK。
    pub fn try_alloc(capacity: usize, headroom: usize) -> Option<Self> {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(capacity).is_err() {
            log::warn!(target: "skb", "try_alloc: {} bytes refused by allocator", capacity);
            return None;
        }
        buf.resize(capacity, 0);
        let at = headroom.min(capacity);
        Some(Self { buf, start: at, end: at })
    }

    /// 拷贝 `data` 作为内容，前面留 `headroom`。
    pub fn from_slice(headroom: usize, data: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(headroom + data.len());
        buf.resize(headroom, 0);
        buf.extend_from_slice(data);
        Self {
            start: headroom,
            end: buf.len(),
            buf,
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// 从数据起点到存储末尾（含 tailroom）的可写区域，整块读入后再 `set_len`。
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..]
    }

    /// 直接设定数据长度，超出存储时截到上限。
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.end = self.start + len.min(self.buf.len() - self.start);
    }

    /// 截短到 `len`；比当前长度长时不变。
    #[inline]
    pub fn trim(&mut self, len: usize) {
        if len < self.len() {
            self.end = self.start + len;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.end
    }

    /// 尾部追加 `n` 字节并返回这段可写切片；tailroom 不够返回 None。
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.tailroom() {
            return None;
        }
        let at = self.end;
        self.end += n;
        Some(&mut self.buf[at..self.end])
    }

    /// 尾部追加 `n` 个零字节，tailroom 不够时扩容。
    pub fn put_zeroed(&mut self, n: usize) {
        let new_end = self.end + n;
        if new_end > self.buf.len() {
            self.buf.resize(new_end, 0);
        }
        self.buf[self.end..new_end].fill(0);
        self.end = new_end;
    }

    /// 去掉数据区开头 `n` 字节（不超过当前长度）。
    #[inline]
    pub fn pull(&mut self, n: usize) {
        self.start += n.min(self.len());
    }

    /// 数据区向前扩 `n` 字节占用 headroom；不够返回 false。
    #[inline]
    pub fn push(&mut self, n: usize) -> bool {
        match self.start.checked_sub(n) {
            Some(s) => {
                self.start = s;
                true
            }
            None => false,
        }
    }

    /// 保证至少 `n` 字节 headroom，不够时把整块内容后移。
    pub fn reserve(&mut self, n: usize) {
        let Some(grow) = n.checked_sub(self.start).filter(|&g| g > 0) else {
            return;
        };
        self.buf.splice(0..0, iter::repeat(0).take(grow));
        self.start += grow;
        self.end += grow;
    }
}

impl Deref for SkBuff {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl DerefMut for SkBuff {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.end]
    }
}

impl fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkBuff")
            .field("headroom", &self.headroom())
            .field("len", &self.len())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
