use super::*;
use crate::address::Vaddr;
use crate::config::LARGE_PAGE_SIZE;
use crate::memory_space::MemorySpace;
use crate::page_table::{PageTable, PagingError, UniversalPTEFlag};
use crate::memory_space::uvm::{grow, shrink};

#[test]
fn test_grow_to_8192_then_oom_keeps_8192() {
    // 根页表 + 一级 + 零级 + 两个数据页
    let env = env(5);
    let mut space = MemorySpace::new(env.allocator.clone()).unwrap();
    assert_eq!(space.grow(8192, UniversalPTEFlag::WRITEABLE), Ok(8192));
    assert_eq!(space.page_table().leaf_count(), (2, 0));
    assert_eq!(free_base(&env), 0);

    assert_eq!(
        space.grow(12288, UniversalPTEFlag::WRITEABLE),
        Err(PagingError::OutOfMemory)
    );
    assert_eq!(space.size(), 8192);
    assert_eq!(space.page_table().leaf_count(), (2, 0));
    assert!(space.page_table().translate(Vaddr(8192)).is_none());

    space.teardown();
    assert_eq!(free_base(&env), 5);
}

#[test]
fn test_oom_midway_rolls_back_whole_increment() {
    let env = env(6);
    let mut space = MemorySpace::new(env.allocator.clone()).unwrap();
    space.grow(pages(1), UniversalPTEFlag::WRITEABLE).unwrap();
    let free = free_base(&env);
    // 两页可用，请求四页
    assert!(space.grow(pages(5), UniversalPTEFlag::WRITEABLE).is_err());
    assert_eq!(free_base(&env), free);
    assert_eq!(space.page_table().leaf_count(), (1, 0));
    space.teardown();
}

#[test]
fn test_grow_shrink_idempotence() {
    let env = env(32);
    let mut pt = PageTable::new(env.allocator.clone()).unwrap();
    grow(&mut pt, 0, pages(2), UniversalPTEFlag::WRITEABLE).unwrap();
    let before = free_base(&env);
    let leaves_before = pt.leaf_count();

    grow(&mut pt, pages(2), pages(9) + 17, UniversalPTEFlag::WRITEABLE).unwrap();
    assert_eq!(pt.leaf_count(), (10, 0));
    assert_eq!(shrink(&mut pt, pages(9) + 17, pages(2)), pages(2));

    assert_eq!(pt.leaf_count(), leaves_before);
    // 中间页表页仍在，数据帧全部归还
    assert_eq!(free_base(&env), before);
    shrink(&mut pt, pages(2), 0);
    pt.destroy();
    assert_eq!(free_base(&env), 32);
}

#[test]
fn test_mixed_sizes_shrink_by_inspecting_mapping() {
    let env = TestEnv::with_large(16, 2, FrameAllocatorConfig::with_pools(1));
    let mut pt = PageTable::new(env.allocator.clone()).unwrap();
    let size = 2 * LARGE_PAGE_SIZE + pages(3);
    grow(&mut pt, 0, size, UniversalPTEFlag::WRITEABLE).unwrap();
    assert_eq!(pt.leaf_count(), (3, 2));

    // 落在第二个大页内部：该大页不能被移除
    shrink(&mut pt, size, LARGE_PAGE_SIZE + pages(1));
    assert_eq!(pt.leaf_count(), (0, 2));
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 0);

    shrink(&mut pt, LARGE_PAGE_SIZE + pages(1), LARGE_PAGE_SIZE);
    assert_eq!(pt.leaf_count(), (0, 1));
    shrink(&mut pt, LARGE_PAGE_SIZE, 0);
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 2);
    pt.destroy();
}

#[test]
fn test_large_page_regrows_over_former_base_pages() {
    let env = TestEnv::with_large(16, 1, FrameAllocatorConfig::with_pools(1));
    let mut pt = PageTable::new(env.allocator.clone()).unwrap();
    grow(&mut pt, 0, pages(1), UniversalPTEFlag::WRITEABLE).unwrap();
    shrink(&mut pt, pages(1), 0);

    assert_eq!(
        grow(&mut pt, 0, LARGE_PAGE_SIZE, UniversalPTEFlag::WRITEABLE),
        Ok(LARGE_PAGE_SIZE)
    );
    assert_eq!(pt.leaf_count(), (0, 1));
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 0);
    // 根页表和一级页表，空的零级页表已被回收
    assert_eq!(free_base(&env), 14);

    shrink(&mut pt, LARGE_PAGE_SIZE, 0);
    pt.destroy();
    assert_eq!(free_base(&env), 16);
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 1);
}

#[test]
fn test_mixed_sizes_survive_shrink_grow_cycles() {
    let env = TestEnv::with_large(16, 2, FrameAllocatorConfig::with_pools(1));
    let mut space = MemorySpace::new(env.allocator.clone()).unwrap();
    space
        .grow(LARGE_PAGE_SIZE + pages(3), UniversalPTEFlag::WRITEABLE)
        .unwrap();
    assert_eq!(space.page_table().leaf_count(), (3, 1));
    space.copy_to_user(Vaddr(LARGE_PAGE_SIZE), b"base").unwrap();
    space.shrink(0);

    space
        .grow(2 * LARGE_PAGE_SIZE, UniversalPTEFlag::WRITEABLE)
        .unwrap();
    assert_eq!(space.page_table().leaf_count(), (0, 2));
    let mut buf = [0xffu8; 4];
    space.copy_from_user(&mut buf, Vaddr(LARGE_PAGE_SIZE)).unwrap();
    assert_eq!(buf, [0; 4]);

    space.shrink(LARGE_PAGE_SIZE);
    space
        .grow(LARGE_PAGE_SIZE + pages(2), UniversalPTEFlag::WRITEABLE)
        .unwrap();
    assert_eq!(space.page_table().leaf_count(), (2, 1));
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 1);

    space.teardown();
    assert_eq!(free_base(&env), 16);
    assert_eq!(env.allocator.free_frames(FrameClass::Large), 2);
}

#[test]
fn test_large_page_oom_falls_back_to_base() {
    // 一个大页帧，增长三个大页的大小
    let env = TestEnv::with_large(1100, 1, FrameAllocatorConfig::with_pools(1));
    let mut pt = PageTable::new(env.allocator.clone()).unwrap();
    let size = 3 * LARGE_PAGE_SIZE;
    assert_eq!(grow(&mut pt, 0, size, UniversalPTEFlag::WRITEABLE), Ok(size));
    assert_eq!(pt.leaf_count(), (1024, 1));
    shrink(&mut pt, size, 0);
    pt.destroy();
    assert_eq!(free_base(&env), 1100);
}

#[test]
fn test_user_copy_round_trip_through_space() {
    let env = env(16);
    let mut space = MemorySpace::new(env.allocator.clone()).unwrap();
    space.grow(pages(3), UniversalPTEFlag::WRITEABLE).unwrap();

    let data: Vec<u8> = (0..pages(2)).map(|i| (i % 251) as u8).collect();
    space.copy_to_user(Vaddr(100), &data).unwrap();
    let mut back = vec![0u8; data.len()];
    space.copy_from_user(&mut back, Vaddr(100)).unwrap();
    assert_eq!(back, data);

    assert_eq!(
        space.copy_from_user(&mut back, Vaddr(pages(2))),
        Err(PagingError::InvalidAddress)
    );
    space.teardown();
    assert_eq!(free_base(&env), 16);
}

#[test]
fn test_guard_page_blocks_user_copies() {
    let env = env(16);
    let mut space = MemorySpace::new(env.allocator.clone()).unwrap();
    space.grow(pages(2), UniversalPTEFlag::WRITEABLE).unwrap();
    space.page_table_mut().clear_user(Vaddr(0));

    assert_eq!(
        space.copy_to_user(Vaddr(0), b"x"),
        Err(PagingError::InvalidAddress)
    );
    assert!(space.copy_to_user(Vaddr(pages(1)), b"x").is_ok());
    space.teardown();
    assert_eq!(free_base(&env), 16);
}
