//! 同步原语
//!
//! 向内核其它模块（帧分配器的空闲池、引用计数表等）提供自旋锁。
//! 锁基于 [`lock_api`] 实现，持有期间屏蔽本地中断。
//!
//! # 架构依赖
//!
//! 此 crate 通过 [`ArchOps`] trait 抽象中断控制和 CPU 信息。
//! 使用前必须调用 [`register_arch_ops`] 注册实现。

#![cfg_attr(not(test), no_std)]

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::RawSpinLock;
pub use spin_lock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由 os crate 实现并注册，提供中断控制和 CPU 信息
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 获取当前 CPU ID
    fn cpu_id(&self) -> usize;

    /// 获取最大 CPU 数量
    fn max_cpu_count(&self) -> usize;
}

static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用；重复注册时所有实现必须等价
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 获取架构操作实例
///
/// # Panics
/// 如果尚未调用 [`register_arch_ops`]，则 panic
#[inline]
pub fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

#[cfg(test)]
pub(crate) mod test_arch {
    use super::ArchOps;
    use std::sync::Once;
    use test_support::mock::arch::{MOCK_ARCH_OPS, MockArchOps};

    impl ArchOps for MockArchOps {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            unsafe { MockArchOps::read_and_disable_interrupts(self) }
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            unsafe { MockArchOps::restore_interrupts(self, flags) }
        }

        fn cpu_id(&self) -> usize {
            MockArchOps::cpu_id(self)
        }

        fn max_cpu_count(&self) -> usize {
            MockArchOps::max_cpu_count(self)
        }
    }

    static INIT: Once = Once::new();

    pub fn install() {
        INIT.call_once(|| unsafe { super::register_arch_ops(&MOCK_ARCH_OPS) });
    }
}
