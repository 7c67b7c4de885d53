// Scenario tests for the memory-management core.
//
// Unit tests live next to each module; the tests here drive several layers
// together (allocator + page table + address space + mmap) on the host.

use crate::config::{FrameAllocatorConfig, PAGE_SIZE};
use crate::frame_allocator::FrameClass;
use crate::test_util::TestEnv;

mod address_space;
mod concurrency;

/// 单池分配器，分配顺序确定
fn env(base_frames: usize) -> TestEnv {
    TestEnv::new(base_frames, FrameAllocatorConfig::with_pools(1))
}

fn free_base(env: &TestEnv) -> usize {
    env.allocator.free_frames(FrameClass::Base)
}

fn pages(n: usize) -> usize {
    n * PAGE_SIZE
}
