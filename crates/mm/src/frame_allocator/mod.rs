//! 帧分配器模块
//!
//! 本模块管理全部物理页帧，按大小类别分为两个区域：
//!
//! - **基本页区域**：4 KiB 帧，供页表页、用户页和内核缓冲区使用
//! - **大页区域**：2 MiB 帧，从可用内存顶部按 2 MiB 对齐划出
//!
//! 两个区域互不借用：大页不会被拆分来满足基本页请求，反之亦然。
//!
//! ## 空闲池
//!
//! 每个区域有 [`FrameAllocatorConfig::pools`] 个空闲池，各自由一把自旋锁保护。
//! 分配时先访问当前 CPU 对应的池，为空时依次从其它池窃取，
//! 任意时刻至多持有一把池锁，因此不存在循环等待。
//! 每个池是后进先出的：最近释放的帧最先被再次发放。
//!
//! ## 引用计数
//!
//! 每帧一个原子计数器，不变式为：
//!
//! - 计数为 0 当且仅当帧在某个空闲池中
//! - 分配时计数必须从 0 变为 1，否则视为内核内存损坏并 panic
//! - [`FrameAllocator::release`] 递减计数，归零时帧填充垃圾字节后回到空闲池
//!
//! ## 句柄
//!
//! 分配结果是不可复制的 [`Frame`] 句柄。帧写入页表项后句柄被消耗，
//! 需要释放时用 [`FrameAllocator::reclaim`] 按物理地址取回句柄，
//! 该操作会检查帧确实处于已分配状态。
//!
//! # 模块组成
//!
//! - [`FrameAllocator`]：分配器实例，通常以 `Arc` 共享给各地址空间。
//! - [`Frame`] / [`FrameClass`]：帧句柄与大小类别。
//! - [`init_frame_allocator`] / [`frame_allocator`]：系统范围的分配器注册。

mod frame;
mod zone;

pub use frame::{Frame, FrameClass};

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use sync::SpinLock;

use crate::address::{AlignOps, ConvertablePaddr, Paddr, PageNum, Ppn, UsizeConvert};
use crate::arch_ops::arch_ops;
use crate::config::{ALLOC_JUNK, FREE_JUNK, FrameAllocatorConfig, LARGE_PAGE_SIZE, PoolPlacement};
use crate::page_table::{PagingError, PagingResult};
use zone::Zone;

/// 物理帧分配器
pub struct FrameAllocator {
    base: Zone,
    large: Zone,
    placement: PoolPlacement,
}

impl FrameAllocator {
    /// 在物理范围 `[start, end)` 上创建分配器
    ///
    /// 首先从顶部划出 `config.large_frames` 个按 2 MiB 对齐的大页帧，
    /// 剩余部分（按页对齐后）全部作为基本页帧。
    /// 范围放不下所要求的大页时，按能放下的数量划分。
    pub fn new(start: Paddr, end: Paddr, config: FrameAllocatorConfig) -> Self {
        let base_start = start.align_up_to_page();
        let end = end.align_down_to_page().max(base_start);

        let large_end = end.align_down(LARGE_PAGE_SIZE);
        let fit = large_end.as_usize().saturating_sub(base_start.as_usize()) / LARGE_PAGE_SIZE;
        let large_frames = config.large_frames.min(fit);
        if large_frames < config.large_frames {
            log::warn!(
                "frame allocator: only {} of {} large frames fit in [{:#x}, {:#x})",
                large_frames,
                config.large_frames,
                start,
                end
            );
        }
        let base_end = if large_frames == 0 {
            end
        } else {
            large_end - large_frames * LARGE_PAGE_SIZE
        };
        let base_frames = (base_end.as_usize() - base_start.as_usize()) / FrameClass::Base.size();

        log::debug!(
            "frame allocator: {} base frames from {:#x}, {} large frames from {:#x}, {} pools",
            base_frames,
            base_start,
            large_frames,
            base_end,
            config.pools.max(1)
        );

        Self {
            base: Zone::new(
                FrameClass::Base,
                Ppn::from_addr_floor(base_start),
                base_frames,
                config.pools,
            ),
            large: Zone::new(
                FrameClass::Large,
                Ppn::from_addr_floor(base_end),
                large_frames,
                config.pools,
            ),
            placement: config.placement,
        }
    }

    fn zone(&self, class: FrameClass) -> &Zone {
        match class {
            FrameClass::Base => &self.base,
            FrameClass::Large => &self.large,
        }
    }

    /// 查找包含 `pa` 帧起始地址的区域和帧序号，`pa` 必须按类别对齐
    fn locate(&self, pa: Paddr) -> Option<(&Zone, usize)> {
        let ppn = Ppn::from_addr_floor(pa);
        if !pa.is_page_aligned() {
            return None;
        }
        [&self.base, &self.large]
            .into_iter()
            .find_map(|zone| zone.index_of(ppn).map(|index| (zone, index)))
    }

    fn locate_or_panic(&self, pa: Paddr, op: &str) -> (&Zone, usize) {
        match self.locate(pa) {
            Some(found) => found,
            None => panic!(
                "frame: {} of {:#x}: not a managed frame (misaligned or out of range)",
                op, pa
            ),
        }
    }

    /// 分配一个基本页帧
    ///
    /// 返回的帧被填充为 [`ALLOC_JUNK`]，需要零页的调用者必须自行清零。
    pub fn allocate_base(&self) -> PagingResult<Frame> {
        self.allocate(FrameClass::Base)
    }

    /// 分配一个大页帧，规则同 [`allocate_base`](Self::allocate_base)
    pub fn allocate_large(&self) -> PagingResult<Frame> {
        self.allocate(FrameClass::Large)
    }

    /// 按类别分配
    pub fn allocate(&self, class: FrameClass) -> PagingResult<Frame> {
        let zone = self.zone(class);
        if zone.frames() == 0 {
            return Err(PagingError::OutOfMemory);
        }
        let home = arch_ops().cpu_id() % zone.pool_count();
        let index = zone.pop(home).ok_or(PagingError::OutOfMemory)?;

        if let Err(count) = zone
            .refs(index)
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
        {
            panic!(
                "frame: free frame {:#x} has reference count {}",
                zone.ppn_of(index).start_addr(),
                count
            );
        }

        let mut frame = Frame::new(zone.ppn_of(index), class);
        frame.fill(ALLOC_JUNK);
        Ok(frame)
    }

    /// 释放一个独占的基本页帧
    ///
    /// # Panics
    /// 帧不是基本页帧，或引用计数不为 1（仍被共享）
    pub fn free_base(&self, frame: Frame) {
        self.free(frame, FrameClass::Base);
    }

    /// 释放一个独占的大页帧
    ///
    /// # Panics
    /// 帧不是大页帧，或引用计数不为 1（仍被共享）
    pub fn free_large(&self, frame: Frame) {
        self.free(frame, FrameClass::Large);
    }

    fn free(&self, frame: Frame, class: FrameClass) {
        if frame.class() != class {
            panic!("frame: free of {:?} as {:?}", frame, class);
        }
        let count = self.ref_count(frame.paddr());
        if count != 1 {
            panic!("frame: free of {:?} with reference count {}", frame, count);
        }
        self.release(frame);
    }

    /// 增加帧的引用计数
    ///
    /// # Panics
    /// 帧处于空闲状态
    pub fn retain(&self, frame: &Frame) -> usize {
        self.retain_paddr(frame.paddr())
    }

    /// 按物理地址增加引用计数，返回新的计数
    ///
    /// # Panics
    /// 地址不是受管理的帧，或帧处于空闲状态
    pub fn retain_paddr(&self, pa: Paddr) -> usize {
        let (zone, index) = self.locate_or_panic(pa, "retain");
        match zone
            .refs(index)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count != 0).then(|| count + 1)
            }) {
            Ok(prev) => prev + 1,
            Err(_) => panic!("frame: retain of free frame {:#x}", pa),
        }
    }

    /// 放弃一个引用，返回新的计数
    ///
    /// 计数归零时帧被填充为 [`FREE_JUNK`] 并按放置策略回到空闲池。
    ///
    /// # Panics
    /// 帧已经是空闲状态（计数下溢）
    pub fn release(&self, frame: Frame) -> usize {
        let pa = frame.paddr();
        let (zone, index) = self.locate_or_panic(pa, "release");
        let prev = match zone
            .refs(index)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(prev) => prev,
            Err(_) => panic!("frame: double free of {:#x}", pa),
        };
        if prev > 1 {
            return prev - 1;
        }

        let mut frame = frame;
        frame.fill(FREE_JUNK);
        let pool = match self.placement {
            PoolPlacement::PerCpu => arch_ops().cpu_id() % zone.pool_count(),
            PoolPlacement::RoundRobin => zone.next_round_robin(),
        };
        zone.push(pool, index);
        0
    }

    /// 从物理地址取回帧句柄（通常来自页表项）
    ///
    /// 不改变引用计数；调用者随后应当 [`release`](Self::release) 或重新映射它。
    ///
    /// # Panics
    /// 地址不是受管理的帧起始地址，或帧处于空闲状态
    pub fn reclaim(&self, pa: Paddr) -> Frame {
        let (zone, index) = self.locate_or_panic(pa, "reclaim");
        if zone.refs(index).load(Ordering::Acquire) == 0 {
            panic!("frame: reclaim of free frame {:#x}", pa);
        }
        Frame::new(zone.ppn_of(index), zone.class())
    }

    /// `pa` 所在帧的类别；`pa` 可以位于帧内部
    pub fn class_of(&self, pa: Paddr) -> Option<FrameClass> {
        let ppn = Ppn::from_addr_floor(pa);
        [&self.base, &self.large]
            .into_iter()
            .find(|zone| zone.covers(ppn))
            .map(|zone| zone.class())
    }

    /// 帧的当前引用计数
    ///
    /// # Panics
    /// 地址不是受管理的帧起始地址
    pub fn ref_count(&self, pa: Paddr) -> usize {
        let (zone, index) = self.locate_or_panic(pa, "ref_count");
        zone.refs(index).load(Ordering::Acquire)
    }

    /// 帧 `pa` 是否已按地址对齐且位于受管理范围内
    pub fn manages(&self, pa: Paddr) -> bool {
        self.locate(pa).is_some()
    }

    /// 某一类别当前的空闲帧数
    pub fn free_frames(&self, class: FrameClass) -> usize {
        self.zone(class).free_frames()
    }

    /// 某一类别的总帧数
    pub fn total_frames(&self, class: FrameClass) -> usize {
        self.zone(class).frames()
    }

    /// 某一类别单个空闲池中的空闲帧数
    pub fn pool_free_frames(&self, class: FrameClass, pool: usize) -> usize {
        self.zone(class).pool_free_frames(pool)
    }

    /// 每个类别的空闲池数量
    pub fn pool_count(&self) -> usize {
        self.base.pool_count()
    }
}

impl core::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("base_free", &self.base.free_frames())
            .field("base_total", &self.base.frames())
            .field("large_free", &self.large.free_frames())
            .field("large_total", &self.large.frames())
            .field("placement", &self.placement)
            .finish()
    }
}

// ============================================================================
// 全局帧分配器
// ============================================================================

static FRAME_ALLOCATOR: SpinLock<Option<Arc<FrameAllocator>>> = SpinLock::new(None);

/// 初始化系统范围的帧分配器，返回其共享引用
///
/// # Panics
/// 重复初始化
pub fn init_frame_allocator(
    start: Paddr,
    end: Paddr,
    config: FrameAllocatorConfig,
) -> Arc<FrameAllocator> {
    let mut slot = FRAME_ALLOCATOR.lock();
    if slot.is_some() {
        panic!("frame allocator already initialized");
    }
    let allocator = Arc::new(FrameAllocator::new(start, end, config));
    *slot = Some(allocator.clone());
    allocator
}

/// 系统范围的帧分配器
///
/// # Panics
/// 尚未调用 [`init_frame_allocator`]
pub fn frame_allocator() -> Arc<FrameAllocator> {
    match FRAME_ALLOCATOR.lock().as_ref() {
        Some(allocator) => allocator.clone(),
        None => panic!("frame allocator not initialized"),
    }
}

/// 帧内容的原始指针（供页表页等内部使用）
pub(crate) fn frame_ptr<T>(ppn: Ppn) -> *mut T {
    ppn.start_addr().as_mut_ptr::<T>()
}
