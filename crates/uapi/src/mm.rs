//! mmap / munmap 相关的标志位

use bitflags::bitflags;

bitflags! {
    /// 映射区域的保护标志（`prot` 参数）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        const NONE = 0;
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

bitflags! {
    /// 映射标志（`flags` 参数）
    ///
    /// `SHARED` 与 `PRIVATE` 必须恰好指定其一。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const SHARED = 0x01;
        const PRIVATE = 0x02;
    }
}

impl MapFlags {
    /// 共享方式是否合法（`SHARED` 与 `PRIVATE` 恰好其一）
    pub fn has_valid_sharing(&self) -> bool {
        self.contains(MapFlags::SHARED) != self.contains(MapFlags::PRIVATE)
    }
}
