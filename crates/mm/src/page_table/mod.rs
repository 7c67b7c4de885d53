//! 页表模块
//!
//! 本模块实现 Sv39 三级页表：表项格式、遍历、映射、解除映射、翻译和销毁。
//! 叶子可以出现在最低一级（4 KiB 页）或中间一级（2 MiB 大页），
//! 遍历时根据 [`PteKind`] 显式区分中间表项和叶子。
mod page_table_entry;
mod table;

pub use page_table_entry::*;
pub use table::*;

use crate::config::{LARGE_PAGE_SIZE, PAGE_SIZE};
use crate::frame_allocator::FrameClass;

/// 支持的页大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4KB 页
    Size4K = 0x1000,
    /// 2MB 大页
    Size2M = 0x20_0000,
}

impl PageSize {
    /// 字节数
    pub const fn size(self) -> usize {
        match self {
            PageSize::Size4K => PAGE_SIZE,
            PageSize::Size2M => LARGE_PAGE_SIZE,
        }
    }

    /// 该大小的叶子所在的页表级（0 为最低一级）
    pub const fn level(self) -> usize {
        match self {
            PageSize::Size4K => 0,
            PageSize::Size2M => 1,
        }
    }

    /// 叶子位于 `level` 级时对应的页大小
    pub const fn from_level(level: usize) -> Option<Self> {
        match level {
            0 => Some(PageSize::Size4K),
            1 => Some(PageSize::Size2M),
            _ => None,
        }
    }

    /// 映射此大小页所需的帧类别
    pub const fn frame_class(self) -> FrameClass {
        match self {
            PageSize::Size4K => FrameClass::Base,
            PageSize::Size2M => FrameClass::Large,
        }
    }
}

impl From<FrameClass> for PageSize {
    fn from(class: FrameClass) -> Self {
        match class {
            FrameClass::Base => PageSize::Size4K,
            FrameClass::Large => PageSize::Size2M,
        }
    }
}

/// 内存管理操作中可恢复的错误
///
/// 资源耗尽和用户触发的非法访问以错误形式返回；
/// 内核不变式被破坏（重复映射、重复释放等）直接 panic。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 帧分配失败
    OutOfMemory,
    /// 虚拟地址空间已用尽（超过最大地址或与 mmap 区域冲突）
    AddressSpaceFull,
    /// 虚拟地址未被映射
    NotMapped,
    /// 提供了无效的地址
    InvalidAddress,
    /// 参数不合法（长度、对齐、标志组合）
    InvalidArgument,
    /// 文件打开方式不允许所请求的映射
    PermissionDenied,
    /// 只能映射普通文件
    NotRegularFile,
    /// mmap 槽位已满
    TooManyMappings,
    /// 用户访问了无效区域或违反了页权限
    AccessViolation,
    /// 文件读写失败
    IoError,
}

impl PagingError {
    /// 转换为系统调用返回的 errno（正值）
    pub fn to_errno(self) -> isize {
        use uapi::errno::*;
        match self {
            PagingError::OutOfMemory | PagingError::AddressSpaceFull => ENOMEM,
            PagingError::NotMapped
            | PagingError::InvalidAddress
            | PagingError::AccessViolation => EFAULT,
            PagingError::InvalidArgument => EINVAL,
            PagingError::PermissionDenied => EACCES,
            PagingError::NotRegularFile => ENODEV,
            PagingError::TooManyMappings => ENFILE,
            PagingError::IoError => EIO,
        }
    }
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;
