//! 内存管理相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖）。
//! `mm` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `ArchMmOps`）。

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::mock::arch::MOCK_ARCH_OPS;

/// Mock 的内存管理架构操作
///
/// 采用“恒等映射”（vaddr == paddr）：测试中的“物理地址”就是
/// [`PhysArena`] 在主机上的地址。
pub struct MockMmOps {
    tlb_flushes: AtomicUsize,
}

impl MockMmOps {
    pub const fn new() -> Self {
        Self {
            tlb_flushes: AtomicUsize::new(0),
        }
    }

    /// 将物理地址转换为虚拟地址（恒等映射）
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }

    /// 当前 CPU ID（与 [`MOCK_ARCH_OPS`] 一致，线程局部）
    pub fn cpu_id(&self) -> usize {
        MOCK_ARCH_OPS.cpu_id()
    }

    /// CPU 数量
    pub fn num_cpus(&self) -> usize {
        MOCK_ARCH_OPS.max_cpu_count()
    }

    /// 记录一次 TLB 刷新
    pub fn flush_tlb(&self) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// 累计的 TLB 刷新次数
    pub fn tlb_flushes(&self) -> usize {
        self.tlb_flushes.load(Ordering::Relaxed)
    }
}

impl Default for MockMmOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();

/// 模拟的一段物理内存
///
/// 从主机堆上按指定对齐分配并清零，`Drop` 时归还。
pub struct PhysArena {
    base: *mut u8,
    layout: Layout,
}

impl PhysArena {
    /// 分配 `size` 字节、按 `align` 对齐的区域
    pub fn new(size: usize, align: usize) -> Self {
        let layout = Layout::from_size_align(size, align).expect("bad arena layout");
        // SAFETY: size 非零由调用者保证
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "PhysArena: host allocation failed");
        Self { base, layout }
    }

    /// 起始“物理地址”
    pub fn start(&self) -> usize {
        self.base as usize
    }

    /// 结束“物理地址”（不包含）
    pub fn end(&self) -> usize {
        self.start() + self.layout.size()
    }
}

impl Drop for PhysArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

unsafe impl Send for PhysArena {}
unsafe impl Sync for PhysArena {}
