//! 可重定向的 ISA 描述框架
//!
//! 本模块让一个指令集只被描述一次，汇编器与模拟器共用同一份定义：
//! - `BitRange`: 指令字中的位段，可拆分、可带条件
//! - `Format`: 位段布局 + 操作数正则 + 反汇编模板 + 专用编解码函数
//! - `Instruction`: 助记符、常量字段与执行函数，预先计算 mask/template
//! - `InstructionSet`: 注册表，按助记符、行前缀、指令字查询
//! - `IsaBuilder`: 声明式构建并校验，告警掩码冲突
//!
//! 内置 `rv32i` 与 `mips` 两个示例指令集。

mod bitfield;
mod config;
mod error;
mod fields;
mod format;
mod instr_def;
mod registry;
mod syntax;

pub mod mips;
pub mod rv32i;

pub use bitfield::{BitRange, Condition, ParamKind};
pub use config::{ConflictInfo, IsaBuilder};
pub use error::{IsaError, IsaResult};
pub use fields::*;
pub use format::{Format, SpecialDisassembler, SpecialProcessor};
pub use instr_def::{Executor, Instruction};
pub use registry::{InstructionLength, InstructionSet};
pub use syntax::{
    Directive, Endianness, Keywords, OPERAND, Syntax, collapse_escapes, memory_operands,
    operand_list,
};

#[cfg(test)]
mod tests;
