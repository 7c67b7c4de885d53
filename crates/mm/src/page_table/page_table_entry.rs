//! Sv39 页表项

use bitflags::bitflags;

use crate::address::{Paddr, PageNum, Ppn, UsizeConvert};

bitflags! {
    /// 页表项标志位
    ///
    /// 低 8 位为硬件定义的标志，`COW` 占用 RSW 保留位中的第一位。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UniversalPTEFlag: u64 {
        const VALID = 1 << 0;
        const READABLE = 1 << 1;
        const WRITEABLE = 1 << 2;
        const EXECUTABLE = 1 << 3;
        const USER_ACCESSIBLE = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        /// 写时复制共享页（硬件忽略）
        const COW = 1 << 8;
    }
}

impl UniversalPTEFlag {
    /// 用户可读写
    pub const fn user_rw() -> Self {
        Self::from_bits_truncate(
            Self::USER_ACCESSIBLE.bits() | Self::READABLE.bits() | Self::WRITEABLE.bits(),
        )
    }

    /// 任一访问权限位（R/W/X）
    pub const fn rwx() -> Self {
        Self::from_bits_truncate(
            Self::READABLE.bits() | Self::WRITEABLE.bits() | Self::EXECUTABLE.bits(),
        )
    }
}

const FLAG_BITS: u32 = 10;
const PPN_MASK: u64 = (1 << 44) - 1;

/// 页表项的解析视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteKind {
    /// 无效表项
    Invalid,
    /// 指向下一级页表
    Table(Ppn),
    /// 叶子：终止翻译
    Leaf {
        /// 映射的物理页号
        ppn: Ppn,
        /// 标志位（含 VALID）
        flags: UniversalPTEFlag,
    },
}

/// Sv39 页表项
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// 无效表项
    pub const fn empty() -> Self {
        Self(0)
    }

    /// 叶子表项
    ///
    /// # Panics
    /// `flags` 中没有任何 R/W/X 位（那会被硬件解释为中间表项）
    pub fn new_leaf(ppn: Ppn, flags: UniversalPTEFlag) -> Self {
        if !flags.intersects(UniversalPTEFlag::rwx()) {
            panic!("pte: leaf without R/W/X permission: {:?}", flags);
        }
        Self(Self::ppn_bits(ppn) | (flags | UniversalPTEFlag::VALID).bits())
    }

    /// 指向下一级页表的中间表项
    pub fn new_table(ppn: Ppn) -> Self {
        Self(Self::ppn_bits(ppn) | UniversalPTEFlag::VALID.bits())
    }

    fn ppn_bits(ppn: Ppn) -> u64 {
        ((ppn.as_usize() as u64) & PPN_MASK) << FLAG_BITS
    }

    /// 原始位
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// 物理页号
    pub fn ppn(self) -> Ppn {
        Ppn::from_usize(((self.0 >> FLAG_BITS) & PPN_MASK) as usize)
    }

    /// 物理地址
    pub fn paddr(self) -> Paddr {
        self.ppn().start_addr()
    }

    /// 标志位
    pub fn flags(self) -> UniversalPTEFlag {
        UniversalPTEFlag::from_bits_truncate(self.0 & ((1 << FLAG_BITS) - 1))
    }

    /// 替换标志位，保留物理页号
    pub fn set_flags(&mut self, flags: UniversalPTEFlag) {
        self.0 = Self::ppn_bits(self.ppn()) | flags.bits();
    }

    /// 是否有效
    pub fn is_valid(self) -> bool {
        self.flags().contains(UniversalPTEFlag::VALID)
    }

    /// 是否为有效叶子
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(UniversalPTEFlag::rwx())
    }

    /// 解析表项
    pub fn kind(self) -> PteKind {
        if !self.is_valid() {
            PteKind::Invalid
        } else if self.is_leaf() {
            PteKind::Leaf {
                ppn: self.ppn(),
                flags: self.flags(),
            }
        } else {
            PteKind::Table(self.ppn())
        }
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            PteKind::Invalid => write!(f, "PTE(invalid)"),
            PteKind::Table(ppn) => write!(f, "PTE(table -> {:#x})", ppn.start_addr()),
            PteKind::Leaf { ppn, flags } => {
                write!(f, "PTE(leaf -> {:#x}, {:?})", ppn.start_addr(), flags)
            }
        }
    }
}
