//! 写时复制缺页处理

use super::phys_bytes;
use crate::address::{AlignOps, Ppn, PageNum, UsizeConvert, Vaddr};
use crate::arch_ops::arch_ops;
use crate::page_table::{PageTable, PageTableEntry, PagingError, PagingResult, UniversalPTEFlag};

/// 处理对 COW 页的写缺页
///
/// - 帧只剩这一个引用：原地改回可写并清除 COW
/// - 帧仍被共享：分配同类别的新帧、复制内容、重新映射，再放弃旧帧的引用
///
/// 页无效、不是 COW 页或不可用户访问时返回 [`PagingError::AccessViolation`]，
/// 由陷入处理程序终止进程。复制路径上分配失败返回
/// [`PagingError::OutOfMemory`]，此时页表和引用计数都保持不变。
///
/// 调用者必须串行化同一地址空间上的并发缺页。
pub fn resolve_cow_fault(pt: &mut PageTable, va: Vaddr) -> PagingResult<()> {
    let (pte, size) = pt.lookup(va).ok_or(PagingError::AccessViolation)?;
    let flags = pte.flags();
    if !pte.is_leaf()
        || !flags.contains(UniversalPTEFlag::COW)
        || !flags.contains(UniversalPTEFlag::USER_ACCESSIBLE)
    {
        return Err(PagingError::AccessViolation);
    }

    let base = va.align_down(size.size());
    let writable = (flags - UniversalPTEFlag::COW)
        | UniversalPTEFlag::WRITEABLE
        | UniversalPTEFlag::ACCESSED
        | UniversalPTEFlag::DIRTY;
    let allocator = pt.allocator().clone();
    let old_pa = pte.paddr();

    if allocator.ref_count(old_pa) == 1 {
        log::trace!("cow: {:#x} is exclusive, restoring write access", base);
        return pt.update_flags(base, writable);
    }

    let mut frame = match allocator.allocate(size.frame_class()) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("cow: no memory to copy {:#x} ({:?})", base, size);
            return Err(err);
        }
    };
    // SAFETY: old_pa 是有效叶子指向的整帧
    frame
        .bytes_mut()
        .copy_from_slice(unsafe { phys_bytes(old_pa, size.size()) });

    let Some(slot) = pt.walk(base, false) else {
        panic!("cow: {:#x} vanished during fault handling", base);
    };
    *slot.pte = PageTableEntry::new_leaf(Ppn::from_addr_floor(frame.into_paddr()), writable);
    arch_ops().flush_tlb_page(base.as_usize());

    let remaining = allocator.release(allocator.reclaim(old_pa));
    log::trace!(
        "cow: copied {:#x} away from {:#x}, {} sharer(s) left",
        base,
        old_pa,
        remaining
    );
    Ok(())
}
