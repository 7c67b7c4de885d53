//! 物理帧句柄

use core::fmt;

use crate::address::{ConvertablePaddr, Paddr, PageNum, Ppn};
use crate::config::{LARGE_PAGE_SIZE, PAGE_SIZE, PAGES_PER_LARGE_PAGE};

/// 帧的大小类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameClass {
    /// 基本页帧（4 KiB）
    Base,
    /// 大页帧（2 MiB），只能来自大页池
    Large,
}

impl FrameClass {
    /// 该类别帧的字节数
    pub const fn size(self) -> usize {
        match self {
            FrameClass::Base => PAGE_SIZE,
            FrameClass::Large => LARGE_PAGE_SIZE,
        }
    }

    /// 该类别帧包含的基本页数
    pub const fn pages(self) -> usize {
        match self {
            FrameClass::Base => 1,
            FrameClass::Large => PAGES_PER_LARGE_PAGE,
        }
    }
}

/// 已分配的物理帧
///
/// 只能由 [`FrameAllocator`](super::FrameAllocator) 发放，不可复制。
/// 句柄本身没有 `Drop`：帧要么交还分配器
/// （[`release`](super::FrameAllocator::release)、`free_*`），
/// 要么通过 [`into_paddr`](Self::into_paddr) 把所有权转交给页表项，
/// 之后再由 [`reclaim`](super::FrameAllocator::reclaim) 取回。
#[must_use = "a dropped Frame is leaked"]
#[derive(PartialEq, Eq)]
pub struct Frame {
    ppn: Ppn,
    class: FrameClass,
}

impl Frame {
    pub(super) fn new(ppn: Ppn, class: FrameClass) -> Self {
        Self { ppn, class }
    }

    /// 起始物理页号
    pub fn ppn(&self) -> Ppn {
        self.ppn
    }

    /// 起始物理地址
    pub fn paddr(&self) -> Paddr {
        self.ppn.start_addr()
    }

    /// 大小类别
    pub fn class(&self) -> FrameClass {
        self.class
    }

    /// 字节数
    pub fn size(&self) -> usize {
        self.class.size()
    }

    /// 帧内容（通过内核直接映射区访问）
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: 帧由分配器独占发放，直接映射区覆盖整个帧
        unsafe { core::slice::from_raw_parts(self.paddr().as_mut_ptr::<u8>(), self.size()) }
    }

    /// 帧内容的可变视图
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且 &mut self 保证此刻没有其它借用
        unsafe { core::slice::from_raw_parts_mut(self.paddr().as_mut_ptr::<u8>(), self.size()) }
    }

    /// 用 `byte` 填充整个帧
    pub fn fill(&mut self, byte: u8) {
        self.bytes_mut().fill(byte);
    }

    /// 清零
    pub fn zero(&mut self) {
        self.fill(0);
    }

    /// 交出所有权，返回物理地址（通常随后写入页表项）
    pub fn into_paddr(self) -> Paddr {
        self.paddr()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?} @ {:#x})", self.class, self.paddr().0)
    }
}
