#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![doc = "lamina-filter-delim: 保持消息边界的分帧过滤器。"]
#![doc = ""]
#![doc = "把字节流切成带校验的消息帧：一次用户写就是一条消息，对端的一次"]
#![doc = "读事件恰好还原同一条消息。无握手、无状态协商，是验证栈运行时"]
#![doc = "数据泵与背压路径的最小真实过滤器。"]

extern crate alloc;

mod delim;

pub use delim::{CTL_DROPPED_FRAMES, CTL_MAX_FRAME_SIZE, DelimConfig, DelimFilter};
