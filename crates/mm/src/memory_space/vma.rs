//! 文件映射区域（VMA）

use alloc::sync::Arc;

use uapi::mm::{MapFlags, ProtFlags};

use crate::MmFile;
use crate::address::{UsizeConvert, Vaddr};
use crate::page_table::UniversalPTEFlag;

/// VMA 的生命周期状态
///
/// 空槽位（`None`）对应“空闲/已释放”。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaState {
    /// 整个映射区间都有效
    Active,
    /// 已从一端或两端部分解除映射
    PartiallyUnmapped,
}

/// 一个文件映射区域
///
/// `[valid_start, valid_end)` 是仍然有效的子区间，只会从两端收缩。
#[derive(Clone)]
pub struct Vma {
    /// 文件对象引用（用于权限检查和获取 Inode）
    file: Arc<dyn MmFile>,
    base: Vaddr,
    len: usize,
    prot: ProtFlags,
    flags: MapFlags,
    valid_start: Vaddr,
    valid_end: Vaddr,
}

impl Vma {
    pub(super) fn new(
        file: Arc<dyn MmFile>,
        base: Vaddr,
        len: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> Self {
        Self {
            file,
            base,
            len,
            prot,
            flags,
            valid_start: base,
            valid_end: base + len,
        }
    }

    /// 映射的文件
    pub fn file(&self) -> &Arc<dyn MmFile> {
        &self.file
    }

    /// 起始地址（对应文件偏移 0）
    pub fn base(&self) -> Vaddr {
        self.base
    }

    /// 映射时请求的长度
    pub fn len(&self) -> usize {
        self.len
    }

    /// 映射区间的结束地址（不包含）
    pub fn end(&self) -> Vaddr {
        self.base + self.len
    }

    /// 保护标志
    pub fn prot(&self) -> ProtFlags {
        self.prot
    }

    /// 映射标志
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// 是否为共享映射（修改需要写回文件）
    pub fn is_shared(&self) -> bool {
        self.flags.contains(MapFlags::SHARED)
    }

    /// 仍然有效的子区间
    pub fn valid_range(&self) -> (Vaddr, Vaddr) {
        (self.valid_start, self.valid_end)
    }

    /// 有效子区间是否为空
    pub fn is_empty(&self) -> bool {
        self.valid_start >= self.valid_end
    }

    /// 当前状态
    pub fn state(&self) -> VmaState {
        if self.valid_start == self.base && self.valid_end == self.end() {
            VmaState::Active
        } else {
            VmaState::PartiallyUnmapped
        }
    }

    /// `va` 是否落在原始映射区间内
    pub fn covers(&self, va: Vaddr) -> bool {
        va >= self.base && va < self.end()
    }

    /// `va` 是否落在有效子区间内
    pub fn is_valid(&self, va: Vaddr) -> bool {
        va >= self.valid_start && va < self.valid_end
    }

    /// 页 `page_va` 对应的文件偏移
    pub fn file_offset(&self, page_va: Vaddr) -> usize {
        page_va.as_usize() - self.base.as_usize()
    }

    /// 页表项权限
    ///
    /// RISC-V 不允许只写页，`WRITE` 隐含可读。
    pub fn pte_flags(&self) -> UniversalPTEFlag {
        let mut flags = UniversalPTEFlag::USER_ACCESSIBLE;
        if self.prot.intersects(ProtFlags::READ | ProtFlags::WRITE) {
            flags |= UniversalPTEFlag::READABLE;
        }
        if self.prot.contains(ProtFlags::WRITE) {
            flags |= UniversalPTEFlag::WRITEABLE;
        }
        if self.prot.contains(ProtFlags::EXEC) {
            flags |= UniversalPTEFlag::EXECUTABLE;
        }
        flags
    }

    /// 移除有效区间的前缀或后缀 `[addr, addr + len)`
    ///
    /// 区间不在有效范围内，或会在中间留下空洞时返回 `false`，不做修改。
    pub(super) fn trim(&mut self, addr: Vaddr, len: usize) -> bool {
        let end = addr + len;
        if addr < self.valid_start || end > self.valid_end {
            return false;
        }
        if addr == self.valid_start {
            self.valid_start = end;
        } else if end == self.valid_end {
            self.valid_end = addr;
        } else {
            return false;
        }
        true
    }
}

// 手动实现 Debug，因为 dyn MmFile 没有实现 Debug
impl core::fmt::Debug for Vma {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vma")
            .field("file", &"<dyn MmFile>")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .field("prot", &self.prot)
            .field("flags", &self.flags)
            .field("valid_start", &format_args!("{:#x}", self.valid_start))
            .field("valid_end", &format_args!("{:#x}", self.valid_end))
            .finish()
    }
}
