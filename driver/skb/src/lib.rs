//! # skb：包缓冲与发送队列
//!
//! SDPCM 链路各层之间移交的都是 [`SkBuff`]：单一所有者、只能移动、不共享。
//!
//! - `skbuff`：`SkBuff`，`[ headroom | data | tailroom ]` 布局，put/pull/push、可失败分配
//! - `queue`：`SkbQueue`（FIFO）与 `PrecQueue`（有界多优先级队列，按位掩码出队）

#![no_std]

extern crate alloc;

mod queue;
mod skbuff;

pub use queue::{PrecQueue, SkbQueue, NUM_PREC};
pub use skbuff::SkBuff;
