//! 错误码定义（与 Linux 一致，系统调用返回其负值）

pub const EIO: isize = 5;
pub const ENOMEM: isize = 12;
pub const EACCES: isize = 13;
pub const EFAULT: isize = 14;
pub const ENODEV: isize = 19;
pub const EINVAL: isize = 22;
pub const ENFILE: isize = 23;
