//! 原始自旋锁
//!
//! 实现 [`lock_api::RawMutex`]，获取锁时屏蔽本地中断，释放时恢复。

use crate::arch_ops;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use lock_api::{GuardNoSend, RawMutex};

/// 屏蔽中断的原始自旋锁。
///
/// 不可重入。嵌套持有多把锁时必须按获取的逆序释放，
/// 否则恢复的中断状态会错乱。
///
/// 注意：屏蔽中断只能阻止**本地 CPU** 上“任务 vs 中断”的并发，
/// 多核之间的互斥由原子标志保证。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    /// 获取锁之前的中断状态，仅由持锁者读写
    saved_flags: AtomicUsize,
}

impl RawSpinLock {
    /// 创建一个未上锁的 RawSpinLock
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
            saved_flags: AtomicUsize::new(0),
        }
    }

    /// 检查锁是否被占用 (仅用于调试/测试)
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    // 保存的中断状态属于当前 CPU，守卫不能跨线程移动
    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        // SAFETY: 返回值在 unlock 中原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        self.saved_flags.store(flags, Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.saved_flags.store(flags, Ordering::Relaxed);
            true
        } else {
            unsafe { arch_ops().restore_interrupts(flags) };
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        // SAFETY: flags 来自 lock/try_lock 时保存的状态
        unsafe { arch_ops().restore_interrupts(flags) };
    }

    fn is_locked(&self) -> bool {
        RawSpinLock::is_locked(self)
    }
}
