//! 测试环境：注册 Mock 架构操作，并在主机内存上模拟物理内存

use alloc::sync::Arc;
use std::sync::Once;

use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::fs::MemFile;
use test_support::mock::mm::{MOCK_MM_OPS, MockMmOps, PhysArena};

use crate::address::Paddr;
use crate::config::{FrameAllocatorConfig, LARGE_PAGE_SIZE, PAGE_SIZE};
use crate::frame_allocator::FrameAllocator;
use crate::{ArchMmOps, MmFile, MmInode};

impl ArchMmOps for MockMmOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        MockMmOps::paddr_to_vaddr(self, paddr)
    }

    fn cpu_id(&self) -> usize {
        MockMmOps::cpu_id(self)
    }

    fn num_cpus(&self) -> usize {
        MockMmOps::num_cpus(self)
    }

    fn flush_tlb_page(&self, _vaddr: usize) {
        self.flush_tlb();
    }
}

/// `sync::ArchOps` 与 `MockArchOps` 都不属于本 crate，经由本地类型转发
struct SyncArch;

impl sync::ArchOps for SyncArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn cpu_id(&self) -> usize {
        MOCK_ARCH_OPS.cpu_id()
    }

    fn max_cpu_count(&self) -> usize {
        MOCK_ARCH_OPS.max_cpu_count()
    }
}

static SYNC_ARCH: SyncArch = SyncArch;

impl MmInode for MemFile {
    fn size(&self) -> usize {
        MemFile::size(self)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        Ok(MemFile::read_at(self, offset, buf))
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        Ok(MemFile::write_at(self, offset, buf))
    }
}

/// 测试中文件和 inode 是同一个对象
///
/// `MmFile::inode` 需要 `Arc<dyn MmInode>`，因此测试文件本身以 `Arc` 形式注册。
pub struct TestFile(pub Arc<MemFile>);

impl MmFile for TestFile {
    fn inode(&self) -> Result<Arc<dyn MmInode>, isize> {
        Ok(self.0.clone())
    }

    fn writable(&self) -> bool {
        self.0.writable()
    }

    fn is_regular(&self) -> bool {
        self.0.is_regular()
    }
}

static INIT: Once = Once::new();

/// 注册 Mock 架构操作（幂等）
pub fn install() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&SYNC_ARCH);
        crate::register_arch_ops(&MOCK_MM_OPS);
    });
}

/// 一个分配器加上它管理的模拟物理内存
pub struct TestEnv {
    pub allocator: Arc<FrameAllocator>,
    // 必须晚于 allocator 释放
    _arena: PhysArena,
}

impl TestEnv {
    /// 恰好 `base_frames` 个基本页帧
    pub fn new(base_frames: usize, config: FrameAllocatorConfig) -> Self {
        Self::with_large(base_frames, 0, config)
    }

    /// 恰好 `base_frames` 个基本页帧和 `large_frames` 个大页帧
    pub fn with_large(base_frames: usize, large_frames: usize, config: FrameAllocatorConfig) -> Self {
        install();
        let base_bytes = base_frames * PAGE_SIZE;
        let padded = base_bytes.div_ceil(LARGE_PAGE_SIZE) * LARGE_PAGE_SIZE;
        let arena = PhysArena::new(padded + large_frames * LARGE_PAGE_SIZE, LARGE_PAGE_SIZE);
        // 基本页区域贴着大页区域的下边界，前面多出的填充不交给分配器
        let start = Paddr(arena.start() + padded - base_bytes);
        let allocator = FrameAllocator::new(
            start,
            Paddr(arena.end()),
            config.large_frames(large_frames),
        );
        Self {
            allocator: Arc::new(allocator),
            _arena: arena,
        }
    }
}

/// 以给定内容创建一个可映射的测试文件，同时返回底层 `MemFile` 便于检查内容
pub fn test_file(content: &[u8]) -> (Arc<dyn MmFile>, Arc<MemFile>) {
    wrap(MemFile::new(content))
}

/// 包装任意 `MemFile`
pub fn wrap(file: MemFile) -> (Arc<dyn MmFile>, Arc<MemFile>) {
    let inner = Arc::new(file);
    (Arc::new(TestFile(inner.clone())), inner)
}
