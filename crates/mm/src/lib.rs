//! 内存管理子系统
//!
//! 提供地址抽象、物理帧分配、页表管理、用户地址空间操作、
//! 写时复制以及文件映射（mmap）功能。
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchMmOps`]: 直接映射区地址转换、CPU 信息、TLB 操作
//! - [`MmFile`] / [`MmInode`]: mmap 所需的文件读写接口
//!
//! 使用前必须调用 [`register_arch_ops`] 注册实现；
//! 自旋锁依赖的 `sync::ArchOps` 也需要由内核注册。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod arch_ops;
mod config;
mod file;

pub mod address;
pub mod frame_allocator;
pub mod memory_space;
pub mod page_table;

#[cfg(test)]
mod test_util;
#[cfg(test)]
mod tests;

pub use arch_ops::{ArchMmOps, arch_ops, register_arch_ops};
pub use config::*;
pub use file::{MmFile, MmInode};

// Re-export 常用类型
pub use address::{AlignOps, PageNum, Paddr, Ppn, UsizeConvert, Vaddr, Vpn};
pub use frame_allocator::{Frame, FrameAllocator, FrameClass, frame_allocator, init_frame_allocator};
pub use memory_space::{FaultAccess, ForkMode, MemorySpace, Vma, VmaState, VmaTable};
pub use page_table::{
    PageSize, PageTable, PageTableEntry, PagingError, PagingResult, PteKind, PteSlot,
    UniversalPTEFlag,
};
