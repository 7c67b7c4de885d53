//! 地址与页码的基础操作 Trait

/// 与 usize 互相转换
pub trait UsizeConvert: Copy {
    /// 转换为 usize
    fn as_usize(&self) -> usize;
    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;
}

/// 与 usize 的加减运算
///
/// 由 [`impl_calc_ops!`](crate::impl_calc_ops) 为地址和页码类型生成。
pub trait CalcOps:
    UsizeConvert
    + core::ops::Add<usize, Output = Self>
    + core::ops::Sub<usize, Output = Self>
    + core::ops::AddAssign<usize>
    + core::ops::SubAssign<usize>
{
}

/// 对齐操作，`align` 必须是 2 的幂
pub trait AlignOps: UsizeConvert {
    /// 向下对齐
    fn align_down(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        Self::from_usize(self.as_usize() & !(align - 1))
    }

    /// 向上对齐
    fn align_up(self, align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        Self::from_usize((self.as_usize() + align - 1) & !(align - 1))
    }

    /// 是否按 `align` 对齐
    fn is_aligned(self, align: usize) -> bool {
        debug_assert!(align.is_power_of_two());
        self.as_usize() & (align - 1) == 0
    }

    /// 向下对齐到页边界
    fn align_down_to_page(self) -> Self {
        self.align_down(crate::config::PAGE_SIZE)
    }

    /// 向上对齐到页边界
    fn align_up_to_page(self) -> Self {
        self.align_up(crate::config::PAGE_SIZE)
    }

    /// 是否按页对齐
    fn is_page_aligned(self) -> bool {
        self.is_aligned(crate::config::PAGE_SIZE)
    }

    /// 在页内的偏移
    fn page_offset(self) -> usize {
        self.as_usize() & (crate::config::PAGE_SIZE - 1)
    }
}

/// 为 `tuple struct(usize)` 类型实现 [`CalcOps`]
#[macro_export]
macro_rules! impl_calc_ops {
    ($type:ty) => {
        impl core::ops::Add<usize> for $type {
            type Output = Self;
            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl core::ops::Sub<usize> for $type {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }

        impl core::ops::AddAssign<usize> for $type {
            fn add_assign(&mut self, rhs: usize) {
                self.0 += rhs;
            }
        }

        impl core::ops::SubAssign<usize> for $type {
            fn sub_assign(&mut self, rhs: usize) {
                self.0 -= rhs;
            }
        }

        impl $crate::address::operations::CalcOps for $type {}
    };
}
