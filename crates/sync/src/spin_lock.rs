//! 自旋锁封装
//!
//! 提供对数据的互斥访问。

use crate::raw_spin_lock::RawSpinLock;

/// 提供对数据的互斥访问的自旋锁。
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::new(0);
/// {
///     let mut guard = lock.lock(); // 获取锁
///     *guard += 1; // 访问和修改数据
/// } // 离开作用域，自动释放锁
/// ```
///
/// # 注意
/// SpinLock 不是可重入的，持有锁时再次获取将导致死锁。
/// 持锁期间中断被屏蔽，应避免长时间运行的操作。
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// SpinLock 的 RAII 保护器，离开作用域时释放锁并恢复中断状态。
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_arch;
    use std::sync::Arc;
    use test_support::mock::arch::MOCK_ARCH_OPS;

    #[test]
    fn test_lock_and_modify() {
        test_arch::install();
        let lock = SpinLock::new(0usize);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        test_arch::install();
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_interrupt_state_restored() {
        test_arch::install();
        let lock = SpinLock::new(());
        let before = MOCK_ARCH_OPS.interrupts_enabled();
        {
            let _guard = lock.lock();
            assert!(!MOCK_ARCH_OPS.interrupts_enabled());
        }
        assert_eq!(MOCK_ARCH_OPS.interrupts_enabled(), before);
    }

    #[test]
    fn test_contended_counter() {
        test_arch::install();
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
