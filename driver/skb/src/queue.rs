//! SkbQueue / PrecQueue
//!
//! `SkbQueue` 是单一 FIFO；`PrecQueue` 在其上做 8 级优先级（precedence），
//! 总容量与单级容量都有上限，出队按位掩码跳过被对端流控的优先级。

use alloc::collections::VecDeque;

use super::SkBuff;

/// 优先级（precedence）数量。
pub const NUM_PREC: usize = 8;

/// 先进先出队列。元素默认是 `SkBuff`，发送队列里存带通道信息的帧。
pub struct SkbQueue<T = SkBuff> {
    queue: VecDeque<T>,
}

impl<T> SkbQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// 队尾入队。
    pub fn push_tail(&mut self, item: T) {
        self.queue.push_back(item);
    }

    /// 队首入队（重试时把帧放回原位）。
    pub fn push_head(&mut self, item: T) {
        self.queue.push_front(item);
    }

    /// 队首出队。
    pub fn pop_head(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 清空并丢弃所有元素。
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<T> Default for SkbQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 有界多优先级队列。precedence 7 最高；`hi_prec` 记录当前可能非空的最高级，出队时从它往下找。
pub struct PrecQueue<T = SkBuff> {
    queues: [SkbQueue<T>; NUM_PREC],
    /// 单级上限
    prec_limit: usize,
    /// 总上限
    max_len: usize,
    len: usize,
    hi_prec: usize,
}

impl<T> PrecQueue<T> {
    /// `max_len` 为总容量，`prec_limit` 为单个优先级的容量（0 表示与总容量相同）。
    pub fn new(max_len: usize, prec_limit: usize) -> Self {
        let prec_limit = if prec_limit == 0 { max_len } else { prec_limit };
        PrecQueue {
            queues: Default::default(),
            prec_limit,
            max_len,
            len: 0,
            hi_prec: 0,
        }
    }

    /// 入队到 `prec`；总量或该级已满时把元素原样还给调用方。
    pub fn enqueue(&mut self, item: T, prec: usize) -> Result<(), T> {
        let p = prec.min(NUM_PREC - 1);
        if self.len >= self.max_len || self.queues[p].len() >= self.prec_limit {
            return Err(item);
        }
        self.queues[p].push_tail(item);
        self.len += 1;
        if p > self.hi_prec {
            self.hi_prec = p;
        }
        Ok(())
    }

    /// 放回某级队首（发送失败需要保序重试时使用），不检查容量。
    pub fn requeue_head(&mut self, item: T, prec: usize) {
        let p = prec.min(NUM_PREC - 1);
        self.queues[p].push_head(item);
        self.len += 1;
        if p > self.hi_prec {
            self.hi_prec = p;
        }
    }

    /// 从 `mask` 中置位的最高优先级出队，返回 (prec, item)。
    pub fn dequeue_masked(&mut self, mask: u8) -> Option<(usize, T)> {
        let mut p = self.hi_prec as isize;
        while p >= 0 {
            let prec = p as usize;
            if mask & (1 << prec) != 0 {
                if let Some(item) = self.queues[prec].pop_head() {
                    self.len -= 1;
                    return Some((prec, item));
                }
            }
            p -= 1;
        }
        if self.len == 0 {
            self.hi_prec = 0;
        }
        None
    }

    /// 全部优先级出队。
    pub fn dequeue(&mut self) -> Option<(usize, T)> {
        self.dequeue_masked(0xff)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// `mask` 中置位的那些优先级上的元素总数。
    pub fn len_masked(&self, mask: u8) -> usize {
        self.queues
            .iter()
            .enumerate()
            .filter(|(p, _)| mask & (1 << p) != 0)
            .map(|(_, q)| q.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.max_len
    }

    pub fn capacity(&self) -> usize {
        self.max_len
    }

    /// 清空所有优先级。
    pub fn clear(&mut self) {
        for q in self.queues.iter_mut() {
            q.clear();
        }
        self.len = 0;
        self.hi_prec = 0;
    }
}
