//! 文件映射接口 trait 定义
//!
//! mmap 只需要文件的极少一部分能力：按偏移读写、查询大小和打开方式。
//! vfs 层的文件对象实现这两个 trait 后即可被映射。

use alloc::sync::Arc;

/// 可用于内存映射读写的 Inode 接口
pub trait MmInode: Send + Sync {
    /// 文件当前大小（字节）
    fn size(&self) -> usize;

    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    ///
    /// 失败时返回负的 errno。
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;
}

/// 可映射到内存的文件接口
pub trait MmFile: Send + Sync {
    /// 获取底层 Inode 用于读写操作
    fn inode(&self) -> Result<Arc<dyn MmInode>, isize>;

    /// 文件是否以可写方式打开
    fn writable(&self) -> bool;

    /// 是否为普通文件（管道、设备等不可映射）
    fn is_regular(&self) -> bool;
}
