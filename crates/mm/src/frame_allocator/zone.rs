//! 单一大小类别的帧区域
//!
//! 每个区域管理一段连续、按类别大小对齐的物理内存，包含若干空闲池和
//! 每帧一个的原子引用计数。空闲链表是侵入式的，但链接保存在
//! `links` 表中而不是帧内存里，因此释放时填充的垃圾字节不会破坏链表。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::SpinLock;

use crate::address::{PageNum, Ppn, UsizeConvert};
use crate::frame_allocator::FrameClass;

/// 链表结束标记
const NIL: usize = usize::MAX;

/// 一个空闲池：后进先出的单链表
#[derive(Debug)]
pub(super) struct FreeList {
    head: usize,
    len: usize,
}

impl FreeList {
    const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }
}

pub(super) struct Zone {
    class: FrameClass,
    /// 区域内第一帧的页号
    start: Ppn,
    /// 帧数
    frames: usize,
    pools: Vec<SpinLock<FreeList>>,
    /// `links[i]` 为第 i 帧在所属空闲链表中的后继，仅在持有该池锁时修改
    links: Vec<AtomicUsize>,
    refs: Vec<AtomicUsize>,
    free: AtomicUsize,
    /// 轮转放置的游标
    cursor: AtomicUsize,
}

impl Zone {
    /// 创建区域并把所有帧按连续分块分散到 `pools` 个空闲池
    pub(super) fn new(class: FrameClass, start: Ppn, frames: usize, pools: usize) -> Self {
        let pools = pools.max(1);
        let zone = Self {
            class,
            start,
            frames,
            pools: (0..pools).map(|_| SpinLock::new(FreeList::new())).collect(),
            links: (0..frames).map(|_| AtomicUsize::new(NIL)).collect(),
            refs: (0..frames).map(|_| AtomicUsize::new(0)).collect(),
            free: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
        };
        let chunk = frames.div_ceil(pools).max(1);
        // 逆序压入，使每个池按地址升序发放
        for index in (0..frames).rev() {
            zone.push(index / chunk, index);
        }
        zone
    }

    pub(super) fn class(&self) -> FrameClass {
        self.class
    }

    pub(super) fn frames(&self) -> usize {
        self.frames
    }

    pub(super) fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub(super) fn free_frames(&self) -> usize {
        self.free.load(Ordering::Relaxed)
    }

    pub(super) fn pool_free_frames(&self, pool: usize) -> usize {
        self.pools[pool].lock().len()
    }

    /// 物理页号对应的帧序号；不在区域内或未按类别对齐时返回 `None`
    pub(super) fn index_of(&self, ppn: Ppn) -> Option<usize> {
        let offset = ppn.as_usize().checked_sub(self.start.as_usize())?;
        let pages = self.class.pages();
        if offset % pages != 0 {
            return None;
        }
        let index = offset / pages;
        (index < self.frames).then_some(index)
    }

    /// 页号是否落在区域覆盖的物理范围内（不要求对齐）
    pub(super) fn covers(&self, ppn: Ppn) -> bool {
        let start = self.start.as_usize();
        let end = start + self.frames * self.class.pages();
        (start..end).contains(&ppn.as_usize())
    }

    pub(super) fn ppn_of(&self, index: usize) -> Ppn {
        self.start + index * self.class.pages()
    }

    pub(super) fn refs(&self, index: usize) -> &AtomicUsize {
        &self.refs[index]
    }

    /// 先查本地池，再依次从其它池窃取；任意时刻至多持有一把池锁
    pub(super) fn pop(&self, home: usize) -> Option<usize> {
        let n = self.pools.len();
        (0..n).find_map(|i| self.pop_from((home + i) % n))
    }

    fn pop_from(&self, pool: usize) -> Option<usize> {
        let mut list = self.pools[pool].lock();
        if list.head == NIL {
            return None;
        }
        let index = list.head;
        list.head = self.links[index].swap(NIL, Ordering::Relaxed);
        list.len -= 1;
        self.free.fetch_sub(1, Ordering::Relaxed);
        Some(index)
    }

    pub(super) fn push(&self, pool: usize, index: usize) {
        let mut list = self.pools[pool].lock();
        self.links[index].store(list.head, Ordering::Relaxed);
        list.head = index;
        list.len += 1;
        self.free.fetch_add(1, Ordering::Relaxed);
    }

    /// 轮转放置时的下一个池
    pub(super) fn next_round_robin(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.pools.len()
    }
}
