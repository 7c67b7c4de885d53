//! 测试支持 crate
//!
//! 提供主机端测试使用的 Mock 实现和测试工具。
//! 被测 crate 在 `cfg(test)` 下为这里的类型实现自己的 trait 并完成注册。

pub mod mock;
