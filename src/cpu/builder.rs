//! CPU 配置器
//!
//! 统一配置核心的指令集、内存大小与入口地址。
//!
//! # 示例
//!
//! ```
//! use std::sync::Arc;
//! use oak_sim::cpu::CpuBuilder;
//! use oak_sim::isa::rv32i;
//!
//! let isa = Arc::new(rv32i::instruction_set().expect("RV32I 定义有效"));
//! let cpu = CpuBuilder::new(isa)
//!     .memory_size(64 * 1024)
//!     .entry_pc(0x100)
//!     .build();
//! assert_eq!(cpu.pc(), 0x100);
//! ```

use std::sync::Arc;

use super::CpuCore;
use crate::isa::InstructionSet;
use crate::memory::{FlatMemory, Memory};

/// 默认内存大小（4 MiB）
pub const DEFAULT_MEMORY_SIZE: usize = 4 * 1024 * 1024;

/// CPU 构建器
pub struct CpuBuilder {
    isa: Arc<InstructionSet>,
    memory_size: usize,
    memory_base: u64,
    entry_pc: Option<u64>,
    memory: Option<Box<dyn Memory>>,
}

impl CpuBuilder {
    pub fn new(isa: Arc<InstructionSet>) -> Self {
        Self {
            isa,
            memory_size: DEFAULT_MEMORY_SIZE,
            memory_base: 0,
            entry_pc: None,
            memory: None,
        }
    }

    /// 线性内存大小（字节）
    pub fn memory_size(mut self, size: usize) -> Self {
        self.memory_size = size;
        self
    }

    /// 线性内存的映射基址，入口地址缺省与之相同
    pub fn memory_base(mut self, base: u64) -> Self {
        self.memory_base = base;
        self
    }

    pub fn entry_pc(mut self, pc: u64) -> Self {
        self.entry_pc = Some(pc);
        self
    }

    /// 使用自定义内存实现，忽略 `memory_size`/`memory_base`
    pub fn memory(mut self, memory: Box<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// 构建 CPU 核心
    pub fn build(self) -> CpuCore {
        let memory = self
            .memory
            .unwrap_or_else(|| Box::new(FlatMemory::new(self.memory_size, self.memory_base)));
        let entry_pc = self.entry_pc.unwrap_or_else(|| memory.base());
        tracing::debug!(
            isa = self.isa.name(),
            memory = memory.size(),
            entry = format_args!("0x{entry_pc:08x}"),
            "core configured"
        );
        CpuCore::new(self.isa, memory, entry_pc)
    }
}
