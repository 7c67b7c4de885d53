//! 用户地址空间操作
//!
//! 这些函数直接作用于 [`PageTable`]，负责 `[0, size)` 内的用户内存：
//! 扩展、收缩、fork 时复制，以及在内核与用户空间之间搬运字节。
//! [`MemorySpace`](super::MemorySpace) 在其上维护进程大小和 mmap 区域。

use core::cmp::min;

use super::{cow, phys_bytes};
use crate::address::{AlignOps, Paddr, UsizeConvert, Vaddr};
use crate::config::{LARGE_PAGE_SIZE, MAX_VA, PAGE_SIZE};
use crate::page_table::{
    PageSize, PageTable, PageTableEntry, PagingError, PagingResult, UniversalPTEFlag,
};

/// fork 时的共享策略，对基本页和大页一致生效
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkMode {
    /// 父子共享帧，可写页改为只读并标记 COW，首次写入时再复制
    CopyOnWrite,
    /// 立即为子进程复制每一帧
    EagerCopy,
}

/// 把用户内存从 `old` 扩展到 `new`（都不需要页对齐）
///
/// 每一步在地址按 2 MiB 对齐且剩余范围足够时先尝试大页，
/// 大页分配失败则退回基本页。新内存全部清零，权限为 `R | U | perm`。
/// 中途失败时通过 [`shrink`] 撤销本次已分配的全部内存并返回错误，
/// 地址空间保持在 `old`。`new <= old` 时直接返回 `old`。
pub fn grow(
    pt: &mut PageTable,
    old: usize,
    new: usize,
    perm: UniversalPTEFlag,
) -> PagingResult<usize> {
    if new <= old {
        return Ok(old);
    }
    if new > MAX_VA {
        return Err(PagingError::AddressSpaceFull);
    }
    let perm = perm | UniversalPTEFlag::READABLE | UniversalPTEFlag::USER_ACCESSIBLE;
    let start = Vaddr(old).align_up_to_page();
    let mut a = start;
    while a.as_usize() < new {
        match grow_one(pt, a, new, perm) {
            Ok(step) => a += step,
            Err(err) => {
                shrink(pt, a.as_usize(), start.as_usize());
                return Err(err);
            }
        }
    }
    Ok(new)
}

fn grow_one(
    pt: &mut PageTable,
    a: Vaddr,
    end: usize,
    perm: UniversalPTEFlag,
) -> PagingResult<usize> {
    let allocator = pt.allocator().clone();
    if a.is_aligned(LARGE_PAGE_SIZE) && a.as_usize() + LARGE_PAGE_SIZE <= end {
        if let Ok(mut frame) = allocator.allocate_large() {
            frame.zero();
            return match pt.map_large(a, LARGE_PAGE_SIZE, frame.paddr(), perm) {
                Ok(()) => {
                    let _ = frame.into_paddr();
                    Ok(LARGE_PAGE_SIZE)
                }
                Err(err) => {
                    allocator.free_large(frame);
                    Err(err)
                }
            };
        }
    }

    let mut frame = allocator.allocate_base()?;
    frame.zero();
    match pt.map(a, PAGE_SIZE, frame.paddr(), perm) {
        Ok(()) => {
            let _ = frame.into_paddr();
            Ok(PAGE_SIZE)
        }
        Err(err) => {
            allocator.free_base(frame);
            Err(err)
        }
    }
}

/// 把用户内存从 `old` 收缩到 `new`，返回 `new`
///
/// 从 `new` 起逐帧检查实际映射的大小：地址按该帧大小对齐时移除整帧，
/// 否则跳到下一个帧边界，因此部分位于 `new` 之下的帧不会被移除。
/// 未映射的页被跳过。`new >= old` 时返回 `old`。
pub fn shrink(pt: &mut PageTable, old: usize, new: usize) -> usize {
    if new >= old {
        return old;
    }
    let mut va = Vaddr(new);
    while va.as_usize() < old {
        let Some((_, size)) = pt.lookup(va) else {
            va = (va + PAGE_SIZE).align_down_to_page();
            continue;
        };
        let step = size.size();
        if !va.is_aligned(step) {
            va = va.align_up(step);
            continue;
        }
        match size {
            PageSize::Size4K => pt.unmap(va, 1, true),
            PageSize::Size2M => pt.unmap_large(va, 1, true),
        }
        va += step;
    }
    new
}

/// 为 `[0, size)` 创建子页表
///
/// 两种策略都保持帧大小类别不变。失败时释放子页表中已建立的一切并返回错误；
/// 写时复制模式下父进程已改为 COW 的页保持 COW，引用计数为 1 时首次写入会原地恢复可写。
pub fn duplicate(src: &mut PageTable, size: usize, mode: ForkMode) -> PagingResult<PageTable> {
    let allocator = src.allocator().clone();
    let mut child = PageTable::new(allocator)?;
    let mut va = Vaddr(0);
    while va.as_usize() < size {
        let Some((pte, page_size)) = src.lookup(va) else {
            va += PAGE_SIZE;
            continue;
        };
        let result = match mode {
            ForkMode::CopyOnWrite => share_page(src, &mut child, va, pte, page_size),
            ForkMode::EagerCopy => copy_page(&mut child, va, pte, page_size),
        };
        if let Err(err) = result {
            shrink(&mut child, va.as_usize(), 0);
            child.destroy();
            return Err(err);
        }
        va += page_size.size();
    }
    Ok(child)
}

fn map_leaf(
    pt: &mut PageTable,
    va: Vaddr,
    pa: Paddr,
    flags: UniversalPTEFlag,
    page_size: PageSize,
) -> PagingResult<()> {
    match page_size {
        PageSize::Size4K => pt.map(va, PAGE_SIZE, pa, flags),
        PageSize::Size2M => pt.map_large(va, LARGE_PAGE_SIZE, pa, flags),
    }
}

fn share_page(
    src: &mut PageTable,
    child: &mut PageTable,
    va: Vaddr,
    pte: PageTableEntry,
    page_size: PageSize,
) -> PagingResult<()> {
    let mut flags = pte.flags();
    if flags.intersects(UniversalPTEFlag::WRITEABLE | UniversalPTEFlag::COW) {
        flags = (flags - UniversalPTEFlag::WRITEABLE) | UniversalPTEFlag::COW;
        if flags != pte.flags() {
            src.update_flags(va, flags)?;
        }
    }
    let allocator = src.allocator().clone();
    let pa = pte.paddr();
    allocator.retain_paddr(pa);
    if let Err(err) = map_leaf(child, va, pa, flags, page_size) {
        allocator.release(allocator.reclaim(pa));
        return Err(err);
    }
    Ok(())
}

fn copy_page(
    child: &mut PageTable,
    va: Vaddr,
    pte: PageTableEntry,
    page_size: PageSize,
) -> PagingResult<()> {
    let allocator = child.allocator().clone();
    let mut frame = allocator.allocate(page_size.frame_class())?;
    // SAFETY: pte 是源页表中的有效叶子，覆盖整个 page_size
    frame
        .bytes_mut()
        .copy_from_slice(unsafe { phys_bytes(pte.paddr(), page_size.size()) });

    let mut flags = pte.flags();
    if flags.contains(UniversalPTEFlag::COW) {
        flags = (flags - UniversalPTEFlag::COW) | UniversalPTEFlag::WRITEABLE;
    }
    match map_leaf(child, va, frame.paddr(), flags, page_size) {
        Ok(()) => {
            let _ = frame.into_paddr();
            Ok(())
        }
        Err(err) => {
            allocator.release(frame);
            Err(err)
        }
    }
}

/// 把 `src` 复制到用户地址 `dst`
///
/// 目标页必须可写；尚未分离的 COW 页先被分离。写入的页被标记为已访问和脏。
pub fn copy_to_user(pt: &mut PageTable, dst: Vaddr, src: &[u8]) -> PagingResult<()> {
    let mut done = 0;
    while done < src.len() {
        let va = dst
            .as_usize()
            .checked_add(done)
            .map(Vaddr)
            .ok_or(PagingError::InvalidAddress)?;
        let (pte, size) = user_leaf(pt, va)?;
        let mut flags = pte.flags();
        if flags.contains(UniversalPTEFlag::COW) {
            cow::resolve_cow_fault(pt, va)?;
            flags = user_leaf(pt, va)?.0.flags();
        }
        if !flags.contains(UniversalPTEFlag::WRITEABLE) {
            return Err(PagingError::AccessViolation);
        }
        let touched = UniversalPTEFlag::ACCESSED | UniversalPTEFlag::DIRTY;
        if !flags.contains(touched) {
            pt.update_flags(va.align_down(size.size()), flags | touched)?;
        }

        let pa = pt.translate(va).ok_or(PagingError::InvalidAddress)?;
        let n = min(PAGE_SIZE - va.page_offset(), src.len() - done);
        // SAFETY: pa 属于一个用户可写的有效叶子，且 [pa, pa + n) 不跨页
        unsafe { phys_bytes(pa, n) }.copy_from_slice(&src[done..done + n]);
        done += n;
    }
    Ok(())
}

/// 从用户地址 `src` 复制 `dst.len()` 字节
pub fn copy_from_user(pt: &PageTable, dst: &mut [u8], src: Vaddr) -> PagingResult<()> {
    let mut done = 0;
    while done < dst.len() {
        let va = src
            .as_usize()
            .checked_add(done)
            .map(Vaddr)
            .ok_or(PagingError::InvalidAddress)?;
        let pa = pt.translate(va).ok_or(PagingError::InvalidAddress)?;
        let n = min(PAGE_SIZE - va.page_offset(), dst.len() - done);
        // SAFETY: 同 copy_to_user
        dst[done..done + n].copy_from_slice(unsafe { phys_bytes(pa, n) });
        done += n;
    }
    Ok(())
}

/// 从用户地址 `src` 复制一个以 NUL 结尾的字符串到 `dst`
///
/// 最多检查 `min(max, dst.len())` 字节（含 NUL），返回不含 NUL 的长度；
/// 在限制内没有找到 NUL 时返回 [`PagingError::InvalidArgument`]。
pub fn copy_string_from_user(
    pt: &PageTable,
    dst: &mut [u8],
    src: Vaddr,
    max: usize,
) -> PagingResult<usize> {
    let limit = min(max, dst.len());
    let mut done = 0;
    while done < limit {
        let va = src
            .as_usize()
            .checked_add(done)
            .map(Vaddr)
            .ok_or(PagingError::InvalidAddress)?;
        let pa = pt.translate(va).ok_or(PagingError::InvalidAddress)?;
        let n = min(PAGE_SIZE - va.page_offset(), limit - done);
        // SAFETY: 同 copy_to_user
        let page = unsafe { phys_bytes(pa, n) };
        if let Some(nul) = page.iter().position(|&b| b == 0) {
            dst[done..=done + nul].copy_from_slice(&page[..=nul]);
            return Ok(done + nul);
        }
        dst[done..done + n].copy_from_slice(page);
        done += n;
    }
    Err(PagingError::InvalidArgument)
}

fn user_leaf(pt: &PageTable, va: Vaddr) -> PagingResult<(PageTableEntry, PageSize)> {
    match pt.lookup(va) {
        Some((pte, size))
            if pte.is_leaf() && pte.flags().contains(UniversalPTEFlag::USER_ACCESSIBLE) =>
        {
            Ok((pte, size))
        }
        _ => Err(PagingError::InvalidAddress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameAllocatorConfig;
    use crate::frame_allocator::FrameClass;
    use crate::test_util::TestEnv;

    fn w() -> UniversalPTEFlag {
        UniversalPTEFlag::WRITEABLE
    }

    #[test]
    fn test_grow_zeroes_and_noop_when_smaller() {
        let env = TestEnv::new(16, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        assert_eq!(grow(&mut pt, 0, 100, w()), Ok(100));
        let mut buf = [0xffu8; 100];
        copy_from_user(&pt, &mut buf, Vaddr(0)).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(grow(&mut pt, 100, 50, w()), Ok(100));
        assert_eq!(pt.leaf_count(), (1, 0));
        shrink(&mut pt, 100, 0);
        pt.destroy();
    }

    #[test]
    fn test_grow_uses_large_page_when_eligible() {
        let env = TestEnv::with_large(8, 1, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        let new = LARGE_PAGE_SIZE + PAGE_SIZE;
        assert_eq!(grow(&mut pt, 0, new, w()), Ok(new));
        assert_eq!(pt.leaf_count(), (1, 1));
        let pa = pt.translate(Vaddr(0)).unwrap();
        assert_eq!(env.allocator.class_of(pa), Some(FrameClass::Large));
        assert_eq!(shrink(&mut pt, new, 0), 0);
        assert_eq!(pt.leaf_count(), (0, 0));
        assert_eq!(env.allocator.free_frames(FrameClass::Large), 1);
        pt.destroy();
    }

    #[test]
    fn test_grow_falls_back_to_base_pages() {
        // 没有大页帧：2 MiB 的增长由 512 个基本页完成
        let env = TestEnv::new(520, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        assert_eq!(grow(&mut pt, 0, LARGE_PAGE_SIZE, w()), Ok(LARGE_PAGE_SIZE));
        assert_eq!(pt.leaf_count(), (512, 0));
        shrink(&mut pt, LARGE_PAGE_SIZE, 0);
        pt.destroy();
    }

    #[test]
    fn test_grow_past_max_va() {
        let env = TestEnv::new(4, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        assert_eq!(
            grow(&mut pt, 0, MAX_VA + PAGE_SIZE, w()),
            Err(PagingError::AddressSpaceFull)
        );
        pt.destroy();
    }

    #[test]
    fn test_shrink_keeps_partially_covered_frame() {
        let env = TestEnv::new(8, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        grow(&mut pt, 0, 3 * PAGE_SIZE, w()).unwrap();
        assert_eq!(shrink(&mut pt, 3 * PAGE_SIZE, PAGE_SIZE + 10), PAGE_SIZE + 10);
        // 第二页仍覆盖 [PAGE_SIZE, PAGE_SIZE + 10)
        assert_eq!(pt.leaf_count(), (2, 0));
        // 超过实际映射范围的 old 也可以
        assert_eq!(shrink(&mut pt, 10 * PAGE_SIZE, 0), 0);
        assert_eq!(pt.leaf_count(), (0, 0));
        pt.destroy();
    }

    #[test]
    fn test_copy_to_user_requires_write() {
        let env = TestEnv::new(8, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        grow(&mut pt, 0, PAGE_SIZE, UniversalPTEFlag::EXECUTABLE).unwrap();
        assert_eq!(
            copy_to_user(&mut pt, Vaddr(0), b"text"),
            Err(PagingError::AccessViolation)
        );
        assert_eq!(
            copy_to_user(&mut pt, Vaddr(PAGE_SIZE), b"x"),
            Err(PagingError::InvalidAddress)
        );
        shrink(&mut pt, PAGE_SIZE, 0);
        pt.destroy();
    }

    #[test]
    fn test_copy_across_page_boundary_sets_dirty() {
        let env = TestEnv::new(8, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        grow(&mut pt, 0, 2 * PAGE_SIZE, w()).unwrap();
        let va = Vaddr(PAGE_SIZE - 3);
        copy_to_user(&mut pt, va, b"abcdef").unwrap();

        let mut out = [0u8; 6];
        copy_from_user(&pt, &mut out, va).unwrap();
        assert_eq!(&out, b"abcdef");
        for page in [0, PAGE_SIZE] {
            let (pte, _) = pt.lookup(Vaddr(page)).unwrap();
            assert!(pte.flags().contains(UniversalPTEFlag::DIRTY));
        }
        shrink(&mut pt, 2 * PAGE_SIZE, 0);
        pt.destroy();
    }

    #[test]
    fn test_copy_string_from_user() {
        let env = TestEnv::new(8, FrameAllocatorConfig::with_pools(1));
        let mut pt = PageTable::new(env.allocator.clone()).unwrap();
        grow(&mut pt, 0, 2 * PAGE_SIZE, w()).unwrap();
        let va = Vaddr(PAGE_SIZE - 2);
        copy_to_user(&mut pt, va, b"hello\0").unwrap();

        let mut buf = [0xaau8; 16];
        assert_eq!(copy_string_from_user(&pt, &mut buf, va, 16), Ok(5));
        assert_eq!(&buf[..6], b"hello\0");
        assert_eq!(
            copy_string_from_user(&pt, &mut buf, va, 5),
            Err(PagingError::InvalidArgument)
        );
        shrink(&mut pt, 2 * PAGE_SIZE, 0);
        pt.destroy();
    }
}
