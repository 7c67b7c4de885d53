//! 三级页表
//!
//! [`PageTable`] 拥有根页表页以及所有中间页表页，它们都是从
//! [`FrameAllocator`] 分配的基本页帧。叶子指向的数据帧不属于页表：
//! 由调用者通过 `map*` 交入、通过 `unmap*` 取回或释放。
//!
//! ## 不变式
//!
//! - 每个有效的中间表项恰好指向一个子页表
//! - 页表页只有在其下所有叶子都被移除后才会被释放，
//!   [`PageTable::destroy`] 遇到残留叶子时 panic
//! - `map*` 从不静默覆盖有效表项

use alloc::sync::Arc;
use core::mem::ManuallyDrop;

use super::{PageSize, PageTableEntry, PagingError, PagingResult, PteKind, UniversalPTEFlag};
use crate::address::{AlignOps, Paddr, PageNum, Ppn, UsizeConvert, Vaddr, Vpn};
use crate::arch_ops::arch_ops;
use crate::config::{MAX_VA, PAGE_TABLE_LEVELS, PTE_PER_TABLE};
use crate::frame_allocator::{FrameAllocator, FrameClass, frame_ptr};

/// 遍历得到的终止表项位置
///
/// `size` 由表项所在的级别决定：最低一级为 4 KiB，中间一级为 2 MiB。
pub struct PteSlot<'a> {
    /// 表项本身
    pub pte: &'a mut PageTableEntry,
    /// 该位置上叶子覆盖的大小
    pub size: PageSize,
}

/// 一个地址空间的页表
pub struct PageTable {
    root: Ppn,
    allocator: Arc<FrameAllocator>,
}

impl PageTable {
    /// 分配一个空的根页表
    pub fn new(allocator: Arc<FrameAllocator>) -> PagingResult<Self> {
        let root = Self::alloc_table(&allocator)?;
        Ok(Self { root, allocator })
    }

    /// 根页表的物理页号
    pub fn root_ppn(&self) -> Ppn {
        self.root
    }

    /// 写入 satp 的值（Sv39 模式）
    pub fn token(&self) -> usize {
        (8usize << 60) | self.root.as_usize()
    }

    /// 页表使用的帧分配器
    pub fn allocator(&self) -> &Arc<FrameAllocator> {
        &self.allocator
    }

    fn alloc_table(allocator: &FrameAllocator) -> PagingResult<Ppn> {
        let mut frame = allocator.allocate_base()?;
        frame.zero();
        Ok(Ppn::from_addr_floor(frame.into_paddr()))
    }

    fn entries<'a>(table: Ppn) -> &'a mut [PageTableEntry] {
        // SAFETY: table 是本页表拥有的页表页，&mut PageTable 保证独占访问
        unsafe { core::slice::from_raw_parts_mut(frame_ptr::<PageTableEntry>(table), PTE_PER_TABLE) }
    }

    /// 找到 `va` 对应的终止表项
    ///
    /// 从根开始逐级下降，遇到中间级的叶子（大页）时提前终止。
    /// 中间表项无效时：`create` 为真则分配一个清零的页表页并装入，否则返回 `None`。
    /// `va` 超出 [`MAX_VA`] 或页表页分配失败时也返回 `None`。
    pub fn walk(&mut self, va: Vaddr, create: bool) -> Option<PteSlot<'_>> {
        if va.as_usize() >= MAX_VA {
            return None;
        }
        let vpn = Vpn::from_addr_floor(va);
        let mut table = self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let pte = &mut Self::entries(table)[vpn.index(level)];
            match pte.kind() {
                PteKind::Leaf { .. } => {
                    let size = match PageSize::from_level(level) {
                        Some(size) => size,
                        None => panic!("walk: unsupported leaf at level {} for {:#x}", level, va),
                    };
                    return Some(PteSlot { pte, size });
                }
                PteKind::Table(next) => table = next,
                PteKind::Invalid => {
                    if !create {
                        return None;
                    }
                    let next = Self::alloc_table(&self.allocator).ok()?;
                    *pte = PageTableEntry::new_table(next);
                    table = next;
                }
            }
        }
        Some(PteSlot {
            pte: &mut Self::entries(table)[vpn.index(0)],
            size: PageSize::Size4K,
        })
    }

    /// 只读查找：返回有效终止表项的拷贝及其大小
    pub fn lookup(&self, va: Vaddr) -> Option<(PageTableEntry, PageSize)> {
        if va.as_usize() >= MAX_VA {
            return None;
        }
        let vpn = Vpn::from_addr_floor(va);
        let mut table = self.root;
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let pte = Self::entries(table)[vpn.index(level)];
            match pte.kind() {
                PteKind::Leaf { .. } => return PageSize::from_level(level).map(|size| (pte, size)),
                PteKind::Table(next) => table = next,
                PteKind::Invalid => return None,
            }
        }
        let pte = Self::entries(table)[vpn.index(0)];
        pte.is_valid().then_some((pte, PageSize::Size4K))
    }

    /// 用户地址翻译，不可用户访问的映射返回 `None`
    pub fn translate(&self, va: Vaddr) -> Option<Paddr> {
        let (pte, size) = self.lookup(va)?;
        let flags = pte.flags();
        if !pte.is_leaf() || !flags.contains(UniversalPTEFlag::USER_ACCESSIBLE) {
            return None;
        }
        Some(pte.paddr() + (va.as_usize() & (size.size() - 1)))
    }

    /// 为 `page_size` 大小的叶子找到（必要时创建路径上的）表项
    ///
    /// 大页位置上若挂着一个已经没有任何有效表项的子页表（基本页被全部移除后留下），
    /// 先释放该子页表，再把位置交给调用者。
    fn leaf_slot(
        &mut self,
        op: &str,
        va: Vaddr,
        page_size: PageSize,
    ) -> PagingResult<&mut PageTableEntry> {
        if va.as_usize() >= MAX_VA {
            return Err(PagingError::InvalidAddress);
        }
        let vpn = Vpn::from_addr_floor(va);
        let mut table = self.root;
        for level in (page_size.level() + 1..PAGE_TABLE_LEVELS).rev() {
            let pte = &mut Self::entries(table)[vpn.index(level)];
            match pte.kind() {
                PteKind::Leaf { .. } => panic!("{}: remap of {:#x} inside a large page", op, va),
                PteKind::Table(next) => table = next,
                PteKind::Invalid => {
                    let next = Self::alloc_table(&self.allocator)?;
                    *pte = PageTableEntry::new_table(next);
                    table = next;
                }
            }
        }
        let slot = &mut Self::entries(table)[vpn.index(page_size.level())];
        if let PteKind::Table(child) = slot.kind() {
            if page_size.level() > 0 && Self::entries(child).iter().all(|pte| !pte.is_valid()) {
                log::trace!("{}: reclaiming empty table under {:#x}", op, va);
                *slot = PageTableEntry::empty();
                self.allocator.free_base(self.allocator.reclaim(child.start_addr()));
            }
        }
        Ok(slot)
    }

    fn map_pages(
        &mut self,
        op: &str,
        va: Vaddr,
        size: usize,
        pa: Paddr,
        flags: UniversalPTEFlag,
        page_size: PageSize,
    ) -> PagingResult<()> {
        let step = page_size.size();
        if size == 0 {
            panic!("{}: zero size", op);
        }
        if !va.is_aligned(step) || !pa.is_aligned(step) || size % step != 0 {
            panic!(
                "{}: va {:#x} pa {:#x} size {:#x} not aligned to {:#x}",
                op, va, pa, size, step
            );
        }

        for done in (0..size).step_by(step) {
            let slot = match self.leaf_slot(op, va + done, page_size) {
                Ok(slot) => slot,
                Err(err) => {
                    self.unmap_pages(op, va, done / step, page_size, false);
                    return Err(err);
                }
            };
            if slot.is_valid() {
                panic!("{}: remap of {:#x}", op, va + done);
            }
            *slot = PageTableEntry::new_leaf(Ppn::from_addr_floor(pa + done), flags);
        }
        Ok(())
    }

    /// 以基本页粒度把 `[va, va + size)` 映射到 `[pa, pa + size)`
    ///
    /// 中间页表页分配失败时撤销本次已装入的叶子并返回
    /// [`PagingError::OutOfMemory`]。
    ///
    /// # Panics
    /// `size` 为 0，地址或大小未按页对齐，或目标表项已经有效
    pub fn map(
        &mut self,
        va: Vaddr,
        size: usize,
        pa: Paddr,
        flags: UniversalPTEFlag,
    ) -> PagingResult<()> {
        self.map_pages("map", va, size, pa, flags, PageSize::Size4K)
    }

    /// 以大页粒度映射，`pa` 必须来自大页池
    ///
    /// # Panics
    /// 同 [`map`](Self::map)，对齐要求为 2 MiB
    pub fn map_large(
        &mut self,
        va: Vaddr,
        size: usize,
        pa: Paddr,
        flags: UniversalPTEFlag,
    ) -> PagingResult<()> {
        self.map_pages("map_large", va, size, pa, flags, PageSize::Size2M)
    }

    fn unmap_pages(&mut self, op: &str, va: Vaddr, count: usize, page_size: PageSize, free: bool) {
        let step = page_size.size();
        if !va.is_aligned(step) {
            panic!("{}: {:#x} not aligned to {:#x}", op, va, step);
        }
        for i in 0..count {
            let a = va + i * step;
            let slot = match self.walk(a, false) {
                Some(slot) => slot,
                None => panic!("{}: {:#x} not mapped", op, a),
            };
            let pte = *slot.pte;
            if !pte.is_valid() {
                panic!("{}: {:#x} not mapped", op, a);
            }
            if !pte.is_leaf() {
                panic!("{}: {:#x} not a leaf", op, a);
            }
            if slot.size != page_size {
                panic!("{}: {:#x} is mapped by a {:?} leaf", op, a, slot.size);
            }
            *slot.pte = PageTableEntry::empty();
            arch_ops().flush_tlb_page(a.as_usize());

            if free {
                let class = page_size.frame_class();
                if self.allocator.class_of(pte.paddr()) != Some(class) {
                    panic!("{}: frame {:#x} at {:#x} is not a {:?} frame", op, pte.paddr(), a, class);
                }
                let frame = self.allocator.reclaim(pte.paddr());
                self.allocator.release(frame);
            }
        }
    }

    /// 移除从 `va` 开始的 `count` 个基本页叶子
    ///
    /// `free` 为真时放弃每个数据帧的一个引用（计数归零即回到空闲池）。
    ///
    /// # Panics
    /// 目标表项无效、不是叶子、是大页叶子，或帧类别与粒度不符
    pub fn unmap(&mut self, va: Vaddr, count: usize, free: bool) {
        self.unmap_pages("unmap", va, count, PageSize::Size4K, free);
    }

    /// 移除从 `va` 开始的 `count` 个大页叶子
    ///
    /// # Panics
    /// 同 [`unmap`](Self::unmap)，要求表项为大页叶子且帧来自大页池
    pub fn unmap_large(&mut self, va: Vaddr, count: usize, free: bool) {
        self.unmap_pages("unmap_large", va, count, PageSize::Size2M, free);
    }

    /// 替换叶子的标志位（物理页号不变）
    pub fn update_flags(&mut self, va: Vaddr, flags: UniversalPTEFlag) -> PagingResult<()> {
        let slot = self.walk(va, false).ok_or(PagingError::NotMapped)?;
        if !slot.pte.is_leaf() {
            return Err(PagingError::NotMapped);
        }
        slot.pte.set_flags(flags | UniversalPTEFlag::VALID);
        arch_ops().flush_tlb_page(va.align_down(slot.size.size()).as_usize());
        Ok(())
    }

    /// 清除用户访问位，用于用户栈下方的保护页
    ///
    /// # Panics
    /// `va` 未映射
    pub fn clear_user(&mut self, va: Vaddr) {
        let slot = match self.walk(va, false) {
            Some(slot) if slot.pte.is_leaf() => slot,
            _ => panic!("clear_user: {:#x} not mapped", va),
        };
        let flags = slot.pte.flags() - UniversalPTEFlag::USER_ACCESSIBLE;
        slot.pte.set_flags(flags);
        arch_ops().flush_tlb_page(va.as_usize());
    }

    /// 按地址升序枚举所有叶子
    pub fn for_each_leaf(&self, mut f: impl FnMut(Vaddr, PageTableEntry, PageSize)) {
        Self::visit(self.root, PAGE_TABLE_LEVELS - 1, 0, &mut f);
    }

    fn visit(
        table: Ppn,
        level: usize,
        base: usize,
        f: &mut impl FnMut(Vaddr, PageTableEntry, PageSize),
    ) {
        let span = PageSize::Size4K.size() << (9 * level);
        for (i, pte) in Self::entries(table).iter().enumerate() {
            let va = base + i * span;
            match pte.kind() {
                PteKind::Invalid => {}
                PteKind::Leaf { .. } => {
                    if let Some(size) = PageSize::from_level(level) {
                        f(Vaddr::from_usize(va), *pte, size);
                    }
                }
                PteKind::Table(child) if level > 0 => Self::visit(child, level - 1, va, f),
                PteKind::Table(_) => {}
            }
        }
    }

    /// 叶子数量（按大小分别统计）
    pub fn leaf_count(&self) -> (usize, usize) {
        let (mut base, mut large) = (0, 0);
        self.for_each_leaf(|_, _, size| match size {
            PageSize::Size4K => base += 1,
            PageSize::Size2M => large += 1,
        });
        (base, large)
    }

    /// 释放所有页表页
    ///
    /// # Panics
    /// 仍有叶子没有被移除
    pub fn destroy(self) {
        let this = ManuallyDrop::new(self);
        Self::free_tables(&this.allocator, this.root, PAGE_TABLE_LEVELS - 1);
        // SAFETY: `this` 之后不再使用，且不会执行 Drop
        drop(unsafe { core::ptr::read(&this.allocator) });
    }

    fn free_tables(allocator: &FrameAllocator, table: Ppn, level: usize) {
        for pte in Self::entries(table).iter_mut() {
            match pte.kind() {
                PteKind::Invalid => {}
                PteKind::Table(child) if level > 0 => {
                    Self::free_tables(allocator, child, level - 1);
                    *pte = PageTableEntry::empty();
                }
                PteKind::Table(_) => panic!("destroy: malformed entry {:?} at level 0", pte),
                PteKind::Leaf { ppn, .. } => {
                    panic!("destroy: leaf {:#x} remains mapped", ppn.start_addr())
                }
            }
        }
        debug_assert_eq!(allocator.class_of(table.start_addr()), Some(FrameClass::Base));
        allocator.free_base(allocator.reclaim(table.start_addr()));
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        log::warn!(
            "page table {:#x} dropped without destroy, leaking its table pages",
            self.root.start_addr()
        );
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("root", &format_args!("{:#x}", self.root.start_addr()))
            .finish()
    }
}
