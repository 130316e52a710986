#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![allow(private_bounds)]
#![doc = "lamina-core: 可组合流式/分组 I/O 的栈运行时核心。"]
#![doc = ""]
#![doc = "一个端点把一个下层传输（TCP/UDP/串口/管道/子进程）与至多一个"]
#![doc = "过滤器（TLS、消息分帧、多路复用……）焊接在一起；更深的叠层由"]
#![doc = "\"端点当下层\"的桥接件递归获得。本 crate 只含与具体传输和协议"]
#![doc = "无关的通用机器：打开/关闭时序、数据搬运、使能重算、错误上抛、"]
#![doc = "延迟投递与安全析构。"]
#![doc = ""]
#![doc = "== 运行时依赖 =="]
#![doc = "核心不直接做任何系统调用；时钟、定时器、延迟执行器、句柄监视"]
#![doc = "与字节级读写全部经 [`runtime::OsFuncs`] 注入。生产环境由"]
#![doc = "`adapters/` 下的事件循环适配器提供实现，测试用 `test_stubs`"]
#![doc = "的确定性运行时。"]
#![doc = ""]
#![doc = "== 内存轨道 =="]
#![doc = "核心契约面向 `no_std + alloc`：回调以 `Box<dyn FnOnce>` 传递，"]
#![doc = "组件间以 `Arc`/`Weak` 关联——端点是下层与过滤器的唯一强持有者，"]
#![doc = "事件方向只保留弱引用，所有权不成环。"]

extern crate alloc;

mod common;
mod sealed;

pub mod accepter;
pub mod aux;
pub mod bridge;
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod fd;
pub mod filter;
pub mod ll;
pub mod observability;
pub mod prelude;
pub mod runtime;

#[cfg(feature = "test-stubs")]
pub mod test_stubs;

pub use common::{Error, Result};
pub use error::CoreError;
