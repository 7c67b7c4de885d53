//! 内存空间核心实现

use alloc::sync::Arc;

use uapi::mm::{MapFlags, ProtFlags};

use super::mmap::VmaTable;
use super::{FaultAccess, ForkMode, cow, uvm};
use crate::MmFile;
use crate::address::{UsizeConvert, Vaddr};
use crate::frame_allocator::FrameAllocator;
use crate::page_table::{PageTable, PagingError, PagingResult, UniversalPTEFlag};

/// 表示进程地址空间的内存空间结构体
#[derive(Debug)]
pub struct MemorySpace {
    /// 与此内存空间关联的页表
    page_table: PageTable,

    /// 进程大小：`[0, size)` 是堆、栈和程序映像
    size: usize,

    /// 文件映射区域，位于 `size` 之上
    vmas: VmaTable,
}

impl MemorySpace {
    /// 创建一个新的空内存空间
    pub fn new(allocator: Arc<FrameAllocator>) -> PagingResult<Self> {
        Ok(MemorySpace {
            page_table: PageTable::new(allocator)?,
            size: 0,
            vmas: VmaTable::new(),
        })
    }

    /// 返回页表的引用
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// 返回页表的可变引用
    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    /// 进程大小
    pub fn size(&self) -> usize {
        self.size
    }

    /// VMA 表
    pub fn vmas(&self) -> &VmaTable {
        &self.vmas
    }

    /// 扩展到 `new_size`，新内存权限为 `R | U | perm`
    ///
    /// 不允许扩展进入 mmap 窗口。失败时大小保持不变。
    pub fn grow(&mut self, new_size: usize, perm: UniversalPTEFlag) -> PagingResult<usize> {
        if let Some(window) = self.vmas.window_start() {
            if new_size > window.as_usize() {
                return Err(PagingError::AddressSpaceFull);
            }
        }
        self.size = uvm::grow(&mut self.page_table, self.size, new_size, perm)?;
        Ok(self.size)
    }

    /// 收缩到 `new_size`
    pub fn shrink(&mut self, new_size: usize) -> usize {
        if new_size < self.size {
            self.size = uvm::shrink(&mut self.page_table, self.size, new_size);
        }
        self.size
    }

    /// 按 `delta` 调整进程大小（sbrk），返回调整前的大小
    pub fn resize(&mut self, delta: isize) -> PagingResult<usize> {
        let old = self.size;
        if delta >= 0 {
            let new = old
                .checked_add(delta.unsigned_abs())
                .ok_or(PagingError::AddressSpaceFull)?;
            self.grow(new, UniversalPTEFlag::WRITEABLE)?;
        } else {
            let new = old
                .checked_sub(delta.unsigned_abs())
                .ok_or(PagingError::InvalidArgument)?;
            self.shrink(new);
        }
        Ok(old)
    }

    /// 为子进程复制地址空间
    ///
    /// `[0, size)` 按 `mode` 复制；VMA 表被整体复制（每个槽位多持有一份文件引用），
    /// 已装入的 mmap 页不复制，子进程访问时重新按需调页。
    pub fn fork(&mut self, mode: ForkMode) -> PagingResult<MemorySpace> {
        let page_table = uvm::duplicate(&mut self.page_table, self.size, mode)?;
        Ok(MemorySpace {
            page_table,
            size: self.size,
            vmas: self.vmas.clone(),
        })
    }

    /// 把 `src` 复制到用户地址 `dst`
    pub fn copy_to_user(&mut self, dst: Vaddr, src: &[u8]) -> PagingResult<()> {
        uvm::copy_to_user(&mut self.page_table, dst, src)
    }

    /// 从用户地址 `src` 复制到 `dst`
    pub fn copy_from_user(&self, dst: &mut [u8], src: Vaddr) -> PagingResult<()> {
        uvm::copy_from_user(&self.page_table, dst, src)
    }

    /// 从用户地址复制以 NUL 结尾的字符串，返回长度
    pub fn copy_string_from_user(
        &self,
        dst: &mut [u8],
        src: Vaddr,
        max: usize,
    ) -> PagingResult<usize> {
        uvm::copy_string_from_user(&self.page_table, dst, src, max)
    }

    /// 映射文件，返回起始地址
    pub fn mmap(
        &mut self,
        file: Arc<dyn MmFile>,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> PagingResult<Vaddr> {
        self.vmas.map_file(self.size, file, len, prot, flags)
    }

    /// 解除文件映射
    pub fn munmap(&mut self, addr: Vaddr, len: usize) -> PagingResult<()> {
        self.vmas.unmap_file(&mut self.page_table, addr, len)
    }

    /// 缺页入口
    ///
    /// mmap 区域内按需调页；其余地址上的写缺页按写时复制处理。
    /// 返回 [`PagingError::AccessViolation`] 时调用者应终止进程。
    pub fn handle_page_fault(&mut self, va: Vaddr, access: FaultAccess) -> PagingResult<()> {
        if let Some(result) = self.vmas.handle_fault(&mut self.page_table, va, access) {
            return result;
        }
        match access {
            FaultAccess::Write => cow::resolve_cow_fault(&mut self.page_table, va),
            FaultAccess::Read | FaultAccess::Exec => Err(PagingError::AccessViolation),
        }
    }

    /// 进程退出：写回并释放所有 VMA，释放用户内存，销毁页表
    pub fn teardown(mut self) {
        self.vmas.release_all(&mut self.page_table);
        uvm::shrink(&mut self.page_table, self.size, 0);
        self.page_table.destroy();
    }
}
