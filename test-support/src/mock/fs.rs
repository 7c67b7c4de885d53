//! 文件相关的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖）。
//! `mm` crate 在 `cfg(test)` 下为 [`MemFile`] 实现 `MmFile` / `MmInode`。

use std::sync::Mutex;

/// 位于内存中的普通文件
pub struct MemFile {
    data: Mutex<Vec<u8>>,
    writable: bool,
    regular: bool,
}

impl MemFile {
    /// 以给定内容创建一个可读写的普通文件
    pub fn new(content: &[u8]) -> Self {
        Self {
            data: Mutex::new(content.to_vec()),
            writable: true,
            regular: true,
        }
    }

    /// 以只读方式打开的文件
    pub fn read_only(content: &[u8]) -> Self {
        Self {
            writable: false,
            ..Self::new(content)
        }
    }

    /// 非普通文件（管道、设备等）
    pub fn special() -> Self {
        Self {
            regular: false,
            ..Self::new(&[])
        }
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn is_regular(&self) -> bool {
        self.regular
    }

    pub fn size(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    /// 从 offset 开始读取，返回实际读取的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// 写入到 offset，必要时扩展文件
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        buf.len()
    }

    /// 当前文件内容的拷贝
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}
