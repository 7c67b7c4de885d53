//! 页码抽象模块
//!
//! 页码是地址空间中页的索引。[`Vpn`] 额外负责拆分出各级页表的索引字段，
//! 页表遍历只依赖这一处的位运算。

use crate::address::operations::{CalcOps, UsizeConvert};
use crate::address::types::{Paddr, Vaddr};
use crate::config::{PAGE_SIZE_BITS, PTE_INDEX_BITS, PTE_PER_TABLE};

/// 表示一个页码的 Trait，[`Ppn`] 和 [`Vpn`] 均实现此 Trait。
pub trait PageNum: CalcOps + Copy + PartialEq + PartialOrd + Eq + Ord {
    /// 此页码类型关联的地址类型
    type TAddress: UsizeConvert + Copy;

    /// 包含该地址的页的页码（向下取整）
    fn from_addr_floor(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.as_usize() >> PAGE_SIZE_BITS)
    }

    /// 该页的起始地址
    fn start_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize(self.as_usize() << PAGE_SIZE_BITS)
    }
}

macro_rules! impl_page_num {
    ($type:ty, $addr_type:ty) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        $crate::impl_calc_ops!($type);

        impl PageNum for $type {
            type TAddress = $addr_type;
        }
    };
}

/// 物理页码，对应物理地址 (Paddr)。
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn, Paddr);

/// 虚拟页码，对应虚拟地址 (Vaddr)。
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn, Vaddr);

impl Vpn {
    /// 第 `level` 级页表中的索引（level 0 为最低一级）
    pub fn index(self, level: usize) -> usize {
        (self.0 >> (PTE_INDEX_BITS * level)) & (PTE_PER_TABLE - 1)
    }
}
