//! 内存空间模块
//!
//! 本模块定义了进程地址空间及其上的操作：
//!
//! - [`uvm`]：`[0, size)` 用户内存的扩展、收缩、fork 复制和跨边界拷贝
//! - [`cow`]：写时复制缺页处理
//! - [`mmap`] / [`vma`]：文件映射区域与按需调页
//! - [`MemorySpace`]：把页表、进程大小和 VMA 表组合在一起

pub mod cow;
pub mod mmap;
mod space;
pub mod uvm;
pub mod vma;

pub use mmap::VmaTable;
pub use space::*;
pub use uvm::ForkMode;
pub use vma::{Vma, VmaState};

use crate::address::{ConvertablePaddr, Paddr};

/// 缺页的访问类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    /// 读（load page fault）
    Read,
    /// 写（store page fault）
    Write,
    /// 取指（instruction page fault）
    Exec,
}

/// 通过直接映射区访问一段物理内存
///
/// # Safety
/// `[pa, pa + len)` 必须位于一个已分配的帧内，且调用期间没有其它可变引用
pub(crate) unsafe fn phys_bytes<'a>(pa: Paddr, len: usize) -> &'a mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(pa.as_mut_ptr::<u8>(), len) }
}
