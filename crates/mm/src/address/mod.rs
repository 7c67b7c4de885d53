//! 地址模块
//!
//! 此模块提供了物理地址、虚拟地址以及页码的抽象。
//!
//! # 地址类型
//!
//! - [`Paddr`] - 物理地址类型
//! - [`Vaddr`] - 虚拟地址类型
//! - [`ConvertablePaddr`] - 将物理地址转换为内核可访问指针的 Trait
//!
//! # 页码
//!
//! - [`PageNum`] - 表示页码的 Trait
//! - [`Ppn`] - 物理页码（Physical Page Number）
//! - [`Vpn`] - 虚拟页码（Virtual Page Number），可拆分出各级页表索引
//!
//! # 操作
//!
//! - [`UsizeConvert`] - 在类型和 usize 之间进行转换
//! - CalcOps - 与 usize 的加减运算（由 `impl_calc_ops!` 生成）
//! - [`AlignOps`] - 地址对齐操作
pub mod operations;
pub mod page_num;
pub mod types;

pub use operations::{AlignOps, UsizeConvert};
pub use page_num::{PageNum, Ppn, Vpn};
pub use types::{ConvertablePaddr, Paddr, Vaddr};
