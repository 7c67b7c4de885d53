use super::*;
use crate::address::{Paddr, Vaddr};
use crate::memory_space::{ForkMode, MemorySpace};
use crate::page_table::UniversalPTEFlag;
use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use test_support::mock::arch::set_cpu_id;

const CPUS: usize = 4;

#[test]
fn test_no_frame_is_issued_twice() {
    let env = TestEnv::new(256, FrameAllocatorConfig::with_pools(CPUS));
    let live: Mutex<HashSet<Paddr>> = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let allocator = &env.allocator;
            let live = &live;
            s.spawn(move || {
                set_cpu_id(cpu);
                let mut held = Vec::new();
                for round in 0..200 {
                    // 每个 CPU 至多 80 帧，总数超过本地池，迫使跨池窃取
                    if held.len() < 80 && round % 3 != 2 {
                        if let Ok(frame) = allocator.allocate_base() {
                            assert!(live.lock().unwrap().insert(frame.paddr()));
                            held.push(frame);
                        }
                    } else if let Some(frame) = held.pop() {
                        assert!(live.lock().unwrap().remove(&frame.paddr()));
                        allocator.free_base(frame);
                    }
                }
                for frame in held {
                    assert!(live.lock().unwrap().remove(&frame.paddr()));
                    allocator.free_base(frame);
                }
            });
        }
    });

    assert!(live.lock().unwrap().is_empty());
    assert_eq!(free_base(&env), 256);
}

#[test]
fn test_concurrent_retain_release_keeps_count() {
    let env = TestEnv::new(8, FrameAllocatorConfig::with_pools(CPUS));
    let frame = env.allocator.allocate_base().unwrap();
    let pa = frame.paddr();

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let allocator = &env.allocator;
            s.spawn(move || {
                set_cpu_id(cpu);
                for _ in 0..1000 {
                    allocator.retain_paddr(pa);
                    assert!(allocator.release(allocator.reclaim(pa)) >= 1);
                }
            });
        }
    });

    assert_eq!(env.allocator.ref_count(pa), 1);
    assert_eq!(env.allocator.release(frame), 0);
    assert_eq!(free_base(&env), 8);
}

#[test]
fn test_address_spaces_on_separate_cpus() {
    let env = TestEnv::new(512, FrameAllocatorConfig::with_pools(CPUS));

    thread::scope(|s| {
        for cpu in 0..CPUS {
            let allocator = env.allocator.clone();
            s.spawn(move || {
                set_cpu_id(cpu);
                let mut parent = MemorySpace::new(allocator).unwrap();
                parent.grow(pages(16), UniversalPTEFlag::WRITEABLE).unwrap();
                parent.copy_to_user(Vaddr(0), &[cpu as u8; 64]).unwrap();

                let mut child = parent.fork(ForkMode::CopyOnWrite).unwrap();
                child.copy_to_user(Vaddr(0), &[0xee; 64]).unwrap();

                let mut buf = [0u8; 64];
                parent.copy_from_user(&mut buf, Vaddr(0)).unwrap();
                assert_eq!(buf, [cpu as u8; 64]);

                child.teardown();
                parent.shrink(pages(4));
                parent.teardown();
            });
        }
    });

    assert_eq!(free_base(&env), 512);
}
