//! 文件映射区域管理
//!
//! 每个进程有 [`NVMA`] 个 VMA 槽位。映射只做虚拟地址预留，
//! 物理页在缺页时按需分配并从文件读入（demand paging）。
//!
//! ## 地址分配
//!
//! 第一次映射时以当时进程大小向上取整到页作为 mmap 窗口的起点，
//! 之后每次映射都从上一次的结束地址开始，地址在进程生命周期内单调递增、不复用。
//!
//! ## 解除映射
//!
//! 只能从有效区间的任意一端移除前缀或后缀。共享映射中被写过的页
//! （脏页）写回文件，私有映射直接丢弃。有效区间为空时槽位被释放。

use alloc::sync::Arc;
use core::cmp::min;

use uapi::mm::{MapFlags, ProtFlags};

use super::FaultAccess;
use super::vma::Vma;
use crate::MmFile;
use crate::address::{AlignOps, UsizeConvert, Vaddr};
use crate::config::{MAX_VA, NVMA, PAGE_SIZE};
use crate::page_table::{PageTable, PagingError, PagingResult, UniversalPTEFlag};

use super::phys_bytes;

/// 进程的 VMA 表
#[derive(Debug, Clone)]
pub struct VmaTable {
    slots: [Option<Vma>; NVMA],
    /// mmap 窗口的起点，首次映射时确定
    window: Option<Vaddr>,
    /// 下一次映射的起始地址
    next: Vaddr,
}

impl Default for VmaTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VmaTable {
    /// 空表
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NVMA],
            window: None,
            next: Vaddr(0),
        }
    }

    /// mmap 窗口起点（尚未映射过时为 `None`）
    pub fn window_start(&self) -> Option<Vaddr> {
        self.window
    }

    /// 所有活动的 VMA
    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.slots.iter().flatten()
    }

    /// 活动 VMA 数量
    pub fn active(&self) -> usize {
        self.iter().count()
    }

    /// 映射区间包含 `va` 的 VMA
    pub fn find(&self, va: Vaddr) -> Option<&Vma> {
        self.iter().find(|vma| vma.covers(va))
    }

    /// 预留一段映射 `file` 的虚拟地址
    ///
    /// `heap_size` 是当前进程大小，仅在首次映射时用来确定窗口起点。
    pub fn map_file(
        &mut self,
        heap_size: usize,
        file: Arc<dyn MmFile>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> PagingResult<Vaddr> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(PagingError::InvalidArgument);
        }
        if !flags.has_valid_sharing() {
            return Err(PagingError::InvalidArgument);
        }
        if !file.is_regular() {
            return Err(PagingError::NotRegularFile);
        }
        if prot.contains(ProtFlags::WRITE) && flags.contains(MapFlags::SHARED) && !file.writable()
        {
            return Err(PagingError::PermissionDenied);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(PagingError::TooManyMappings)?;

        let start = match self.window {
            Some(_) => self.next,
            None => Vaddr(heap_size).align_up_to_page(),
        };
        if start.as_usize() < heap_size {
            return Err(PagingError::AddressSpaceFull);
        }
        let end = start
            .as_usize()
            .checked_add(len)
            .filter(|&end| end <= MAX_VA)
            .ok_or(PagingError::AddressSpaceFull)?;

        self.window.get_or_insert(start);
        self.next = Vaddr(end);
        self.slots[slot] = Some(Vma::new(file, start, len, prot, flags));
        log::debug!(
            "mmap: slot {} [{:#x}, {:#x}) prot {:?} flags {:?}",
            slot,
            start,
            end,
            prot,
            flags
        );
        Ok(start)
    }

    /// 移除 `[addr, addr + len)`，它必须是某个 VMA 有效区间的前缀或后缀
    pub fn unmap_file(&mut self, pt: &mut PageTable, addr: Vaddr, len: usize) -> PagingResult<()> {
        if !addr.is_page_aligned() || len == 0 || len % PAGE_SIZE != 0 {
            return Err(PagingError::InvalidArgument);
        }
        if addr.as_usize().checked_add(len).is_none() {
            return Err(PagingError::InvalidArgument);
        }
        let slot = self
            .slots
            .iter()
            .position(|vma| vma.as_ref().is_some_and(|vma| {
                let (start, end) = vma.valid_range();
                addr >= start && addr + len <= end
            }))
            .ok_or(PagingError::InvalidArgument)?;
        let Some(vma) = self.slots[slot].as_mut() else {
            return Err(PagingError::InvalidArgument);
        };
        if !vma.trim(addr, len) {
            log::debug!("munmap: [{:#x}, {:#x}) would leave a hole", addr, addr + len);
            return Err(PagingError::InvalidArgument);
        }
        log::debug!("munmap: slot {} [{:#x}, {:#x})", slot, addr, addr + len);

        let result = release_pages(pt, vma, addr, len);
        if vma.is_empty() {
            self.release_slot(pt, slot);
        }
        result
    }

    /// 释放一个槽位：先写回或丢弃剩余有效区间，再放弃文件引用
    fn release_slot(&mut self, pt: &mut PageTable, slot: usize) {
        let Some(vma) = self.slots[slot].take() else {
            return;
        };
        let (start, end) = vma.valid_range();
        if start < end {
            // 错误已在 release_pages 中记录；进程正在放弃这段映射
            let _ = release_pages(pt, &vma, start, end.as_usize() - start.as_usize());
        }
        log::debug!("mmap: slot {} released", slot);
    }

    /// 释放全部槽位（进程退出）
    pub fn release_all(&mut self, pt: &mut PageTable) {
        for slot in 0..NVMA {
            self.release_slot(pt, slot);
        }
    }

    /// mmap 区域的缺页入口
    ///
    /// `va` 不属于任何 VMA 时返回 `None`，由调用者继续按其它类型的缺页处理。
    pub fn handle_fault(
        &self,
        pt: &mut PageTable,
        va: Vaddr,
        access: FaultAccess,
    ) -> Option<PagingResult<()>> {
        let vma = self.find(va)?;
        Some(populate(pt, vma, va, access))
    }
}

fn populate(pt: &mut PageTable, vma: &Vma, va: Vaddr, access: FaultAccess) -> PagingResult<()> {
    if !vma.is_valid(va) {
        log::debug!("mmap fault: {:#x} outside the valid range of {:?}", va, vma);
        return Err(PagingError::AccessViolation);
    }
    let prot = vma.prot();
    let allowed = match access {
        FaultAccess::Read => prot.intersects(ProtFlags::READ | ProtFlags::WRITE),
        FaultAccess::Write => prot.contains(ProtFlags::WRITE),
        FaultAccess::Exec => prot.contains(ProtFlags::EXEC),
    };
    if !allowed {
        return Err(PagingError::AccessViolation);
    }

    let page_va = va.align_down_to_page();
    if pt.lookup(page_va).is_some() {
        // 另一个 CPU 已经装入了这一页
        return Ok(());
    }

    let inode = vma.file().inode().map_err(|_| PagingError::IoError)?;
    let allocator = pt.allocator().clone();
    let mut frame = match allocator.allocate_base() {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("mmap fault: no memory for {:#x}", page_va);
            return Err(err);
        }
    };
    frame.zero();

    let offset = vma.file_offset(page_va);
    let size = inode.size();
    if offset < size {
        let want = min(PAGE_SIZE, size - offset);
        match inode.read_at(offset, &mut frame.bytes_mut()[..want]) {
            Ok(got) if got < want => {
                log::warn!(
                    "mmap fault: short read at offset {}: expected {}, got {}",
                    offset,
                    want,
                    got
                );
            }
            Ok(_) => {}
            Err(errno) => {
                log::warn!("mmap fault: read at offset {} failed: {}", offset, errno);
                allocator.free_base(frame);
                return Err(PagingError::IoError);
            }
        }
    }

    let mut flags = vma.pte_flags() | UniversalPTEFlag::ACCESSED;
    if access == FaultAccess::Write {
        flags |= UniversalPTEFlag::DIRTY;
    }
    if let Err(err) = pt.map(page_va, PAGE_SIZE, frame.paddr(), flags) {
        allocator.free_base(frame);
        return Err(err);
    }
    let _ = frame.into_paddr();
    log::trace!("mmap fault: {:#x} <- file offset {}", page_va, offset);
    Ok(())
}

/// 移除 `[addr, addr + len)` 中已装入的页
///
/// 共享映射中脏且偏移仍在文件大小之内的页先写回（最多一页、不超过文件末尾）。
/// 写回失败不会中断其余页的移除，第一个错误被返回。
fn release_pages(pt: &mut PageTable, vma: &Vma, addr: Vaddr, len: usize) -> PagingResult<()> {
    let inode = if vma.is_shared() {
        match vma.file().inode() {
            Ok(inode) => Some(inode),
            Err(errno) => {
                log::error!("munmap: cannot write back, inode unavailable: {}", errno);
                None
            }
        }
    } else {
        None
    };
    let mut result = Ok(());
    if vma.is_shared() && inode.is_none() {
        result = Err(PagingError::IoError);
    }

    for page_va in (addr.as_usize()..addr.as_usize() + len).step_by(PAGE_SIZE).map(Vaddr) {
        let Some((pte, _)) = pt.lookup(page_va) else {
            continue;
        };
        if let Some(inode) = inode.as_ref() {
            let offset = vma.file_offset(page_va);
            let size = inode.size();
            if pte.flags().contains(UniversalPTEFlag::DIRTY) && offset < size {
                let n = min(PAGE_SIZE, size - offset);
                // SAFETY: pte 是 mmap 装入的有效基本页
                let data = unsafe { phys_bytes(pte.paddr(), n) };
                match inode.write_at(offset, data) {
                    Ok(written) if written == n => {}
                    Ok(written) => {
                        log::error!(
                            "munmap: partial write at offset {}: expected {}, got {}",
                            offset,
                            n,
                            written
                        );
                        result = result.and(Err(PagingError::IoError));
                    }
                    Err(errno) => {
                        log::error!("munmap: write at offset {} failed: {}", offset, errno);
                        result = result.and(Err(PagingError::IoError));
                    }
                }
            }
        }
        pt.unmap(page_va, 1, true);
    }
    result
}
