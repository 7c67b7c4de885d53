//! 内存管理配置
//!
//! 页表格式（Sv39）决定的布局常量，以及帧分配器的运行时配置。

/// 基本页大小
pub const PAGE_SIZE: usize = 0x1000;
/// 页内偏移位数
pub const PAGE_SIZE_BITS: usize = 12;
/// 大页大小（二级页表叶子）
pub const LARGE_PAGE_SIZE: usize = 0x20_0000;
/// 一个大页包含的基本页数
pub const PAGES_PER_LARGE_PAGE: usize = LARGE_PAGE_SIZE / PAGE_SIZE;
/// 页表级数
pub const PAGE_TABLE_LEVELS: usize = 3;
/// 每级页表的索引位数
pub const PTE_INDEX_BITS: usize = 9;
/// 每个页表页中的表项数
pub const PTE_PER_TABLE: usize = 1 << PTE_INDEX_BITS;
/// 最大用户虚拟地址（不包含）
///
/// 比 Sv39 的 39 位少一位，避免处理高位符号扩展。
pub const MAX_VA: usize = 1 << (PTE_INDEX_BITS * PAGE_TABLE_LEVELS + PAGE_SIZE_BITS - 1);
/// 每个进程的 mmap 区域槽位数
pub const NVMA: usize = 16;

/// 分配帧时填充的字节，用于暴露“未初始化读”
pub const ALLOC_JUNK: u8 = 0x05;
/// 释放帧时填充的字节，用于暴露悬垂引用
pub const FREE_JUNK: u8 = 0x01;

/// 释放帧时选择归还到哪个空闲池
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPlacement {
    /// 归还到当前 CPU 的空闲池
    PerCpu,
    /// 按轮转顺序依次归还到各个空闲池
    RoundRobin,
}

/// 帧分配器配置
///
/// 在构造分配器时传入，决定空闲池数量、放置策略以及大页帧的数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAllocatorConfig {
    /// 每种大小类别的空闲池数量（至少为 1）
    pub pools: usize,
    /// 释放时的放置策略
    pub placement: PoolPlacement,
    /// 从可用物理内存顶部划出的大页帧数量
    pub large_frames: usize,
}

impl FrameAllocatorConfig {
    /// 使用 `pools` 个按 CPU 放置的空闲池，不预留大页帧
    pub const fn with_pools(pools: usize) -> Self {
        Self {
            pools,
            placement: PoolPlacement::PerCpu,
            large_frames: 0,
        }
    }

    /// 设置放置策略
    pub const fn placement(mut self, placement: PoolPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// 设置预留的大页帧数量
    pub const fn large_frames(mut self, count: usize) -> Self {
        self.large_frames = count;
        self
    }
}

impl Default for FrameAllocatorConfig {
    /// 每个 CPU 一个空闲池
    fn default() -> Self {
        Self::with_pools(crate::arch_ops().num_cpus().max(1))
    }
}
