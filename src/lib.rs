//! oak_sim: 可重定向的指令集汇编器与模拟器
//!
//! 一个指令集只需描述一次（位段、格式、指令与执行函数），
//! 汇编器、反汇编与模拟核心都由这份描述驱动。
//!
//! # 模块结构
//!
//! - `isa`: 指令集描述框架，以及内置的 RV32I 与 MIPS 子集
//! - `codec`: 操作数编解码（文本 ↔ 位段）与标签表
//! - `asm`: 两遍汇编器
//! - `cpu`: 取指/解码/执行核心
//! - `memory`: 内存抽象层
//! - `sim_env`: 仿真环境（配置、程序装载、环境调用、运行循环）

pub mod asm;
pub mod codec;
pub mod cpu;
pub mod isa;
pub mod memory;
pub mod sim_env;
