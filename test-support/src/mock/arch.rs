//! 架构相关操作的 Mock 实现
//!
//! 每个测试线程视为一个独立的 CPU：中断状态和 CPU ID 都是线程局部的，
//! 因此并行运行的测试互不干扰。

use std::cell::Cell;

thread_local! {
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
}

/// Mock 架构操作
pub struct MockArchOps {
    max_cpus: usize,
}

impl MockArchOps {
    pub const fn new(max_cpus: usize) -> Self {
        Self { max_cpus }
    }

    /// # Safety
    /// 仅用于测试环境。
    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        INTERRUPTS_ENABLED.with(|s| s.replace(false)) as usize
    }

    /// # Safety
    /// flags 必须来自 `read_and_disable_interrupts`。
    pub unsafe fn restore_interrupts(&self, flags: usize) {
        INTERRUPTS_ENABLED.with(|s| s.set(flags != 0));
    }

    /// 当前线程的中断是否处于启用状态
    pub fn interrupts_enabled(&self) -> bool {
        INTERRUPTS_ENABLED.with(|s| s.get())
    }

    pub fn cpu_id(&self) -> usize {
        CPU_ID.with(|c| c.get())
    }

    pub fn max_cpu_count(&self) -> usize {
        self.max_cpus
    }
}

/// 设置当前测试线程所模拟的 CPU ID
pub fn set_cpu_id(id: usize) {
    CPU_ID.with(|c| c.set(id));
}

/// 全局 Mock 实例（模拟 4 个 CPU）
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new(4);
