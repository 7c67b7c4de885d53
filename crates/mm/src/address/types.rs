//! 物理地址与虚拟地址类型

use crate::address::operations::{AlignOps, UsizeConvert};
use crate::arch_ops::arch_ops;

macro_rules! impl_address {
    ($type:ident) => {
        impl UsizeConvert for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl AlignOps for $type {}
        $crate::impl_calc_ops!($type);

        impl core::fmt::LowerHex for $type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Paddr(pub usize);
impl_address!(Paddr);

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Vaddr(pub usize);
impl_address!(Vaddr);

/// 可转换为内核直接映射区指针的物理地址
pub trait ConvertablePaddr {
    /// 通过直接映射区得到可读写的指针
    fn as_mut_ptr<T>(&self) -> *mut T;
}

impl ConvertablePaddr for Paddr {
    fn as_mut_ptr<T>(&self) -> *mut T {
        arch_ops().paddr_to_vaddr(self.0) as *mut T
    }
}
