//! CPU 核心与执行引擎
//!
//! `CpuCore` 是与具体指令集无关的取指-解码-执行状态机：
//! 寄存器文件、内存、PC 都由核心独占，指令语义由 ISA 定义中挂在
//! 每条指令上的 `Executor` 提供，执行函数通过固定的能力接口
//! （寄存器读写、PC 读写、内存、状态）操作核心，无需向下转型。

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::codec;
use crate::isa::{Instruction, InstructionSet, IsaError, concat_bytes, split_bytes};
use crate::memory::{MemError, Memory};

mod builder;
mod status;

pub use builder::{CpuBuilder, DEFAULT_MEMORY_SIZE};
pub use status::RegFile;

/// CPU 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// 尚未装载程序
    Idle,
    /// 正常运行中
    Running,
    /// 取指、解码或执行失败（终止态）
    Error,
    /// 请求宿主处理环境调用，处理后可恢复为 Running
    EnvironmentCall,
    /// 断点，可恢复
    EnvironmentBreak,
}

/// 运行时错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Memory(#[from] MemError),
    #[error("Unrecognized instruction 0x{word:08x} at pc 0x{pc:08x}")]
    UnrecognizedInstruction { word: u64, pc: u64 },
    #[error("Instruction {mnemonic} at pc 0x{pc:08x} is not available")]
    UnavailableInstruction { mnemonic: String, pc: u64 },
    #[error("No decoded instruction to execute at pc 0x{pc:08x}")]
    NoDecodedInstruction { pc: u64 },
    #[error("Program of {size} bytes does not fit in {capacity} bytes of memory")]
    ProgramTooLarge { size: usize, capacity: usize },
    #[error(transparent)]
    Isa(#[from] IsaError),
}

/// 单线程 CPU 核心
///
/// 设计约定：
/// - 零寄存器（若 ISA 声明）永远为 0，写入时丢弃
/// - 核心不自动推进 PC，由每条指令自行设置
/// - `fetched`/`decoded`/参数数组每个周期覆盖，不保留历史
pub struct CpuCore {
    isa: Arc<InstructionSet>,
    regs: RegFile,
    memory: Box<dyn Memory>,
    pc: u64,
    entry_pc: u64,
    state: CoreState,
    /// 最近一次取到的指令字
    fetched: u64,
    /// 最近一次解码得到的指令（指令集中的下标）
    decoded: Option<usize>,
    raw_values: Vec<u64>,
    arguments: Vec<u64>,
    disassembly: String,
    last_error: Option<CoreError>,
}

impl CpuCore {
    /// 创建核心并复位
    ///
    /// # 示例
    ///
    /// ```
    /// use std::sync::Arc;
    /// use oak_sim::cpu::{CoreState, CpuCore};
    /// use oak_sim::isa::rv32i;
    /// use oak_sim::memory::FlatMemory;
    ///
    /// let isa = Arc::new(rv32i::instruction_set().unwrap());
    /// let cpu = CpuCore::new(isa, Box::new(FlatMemory::new(4096, 0)), 0);
    /// assert_eq!(cpu.state(), CoreState::Idle);
    /// assert_eq!(cpu.read_reg(2), 4096);
    /// ```
    pub fn new(isa: Arc<InstructionSet>, memory: Box<dyn Memory>, entry_pc: u64) -> Self {
        let regs = RegFile::new(isa.register_count(), isa.register_bits(), isa.zero_register());
        let mut core = CpuCore {
            isa,
            regs,
            memory,
            pc: entry_pc,
            entry_pc,
            state: CoreState::Idle,
            fetched: 0,
            decoded: None,
            raw_values: Vec::new(),
            arguments: Vec::new(),
            disassembly: String::new(),
            last_error: None,
        };
        core.reset();
        core
    }

    /// 复位：清空寄存器，PC 回到入口，栈指针指向内存顶端
    pub fn reset(&mut self) {
        self.regs.clear();
        if let Some(sp) = self.isa.stack_pointer() {
            let top = self.memory.base().wrapping_add(self.memory.size() as u64);
            self.regs.write(sp, top);
        }
        self.pc = self.entry_pc;
        self.state = CoreState::Idle;
        self.fetched = 0;
        self.decoded = None;
        self.raw_values.clear();
        self.arguments.clear();
        self.disassembly.clear();
        self.last_error = None;
    }

    /// 将程序写入入口地址并进入 Running
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), CoreError> {
        let capacity = self.memory.size();
        if program.len() > capacity {
            return Err(CoreError::ProgramTooLarge {
                size: program.len(),
                capacity,
            });
        }
        self.memory.write(self.entry_pc, program)?;
        self.state = CoreState::Running;
        tracing::debug!(bytes = program.len(), entry = self.entry_pc, "program loaded");
        Ok(())
    }

    // ========== 能力接口 ==========

    pub fn isa(&self) -> &InstructionSet {
        &self.isa
    }

    /// 获取当前程序计数器值
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// 设置程序计数器
    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    /// 入口地址
    pub fn entry_pc(&self) -> u64 {
        self.entry_pc
    }

    /// 修改入口地址（下次复位生效）
    pub fn set_entry_pc(&mut self, pc: u64) {
        self.entry_pc = pc;
    }

    /// PC 前进当前指令的字节数
    pub fn advance(&mut self) {
        let bytes = self
            .decoded()
            .map_or_else(|| self.isa.word_bytes(), Instruction::bytes);
        self.pc = self.pc.wrapping_add(bytes as u64);
    }

    /// 获取当前 CPU 状态
    pub fn state(&self) -> CoreState {
        self.state
    }

    /// 设置 CPU 状态
    pub fn set_state(&mut self, state: CoreState) {
        self.state = state;
    }

    pub fn read_reg(&self, reg: usize) -> u64 {
        self.regs.read(reg)
    }

    pub fn write_reg(&mut self, reg: usize, value: u64) {
        self.regs.write(reg, value)
    }

    pub fn memory(&self) -> &dyn Memory {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> &mut dyn Memory {
        self.memory.as_mut()
    }

    /// 按指令集字节序读取 `bytes` 个字节
    pub fn load(&self, addr: u64, bytes: usize) -> Result<u64, CoreError> {
        let data = self.memory.read_bytes(addr, bytes)?;
        Ok(concat_bytes(&data, self.isa.endianness()))
    }

    /// 按指令集字节序写入 `value` 的低 `bytes` 个字节
    pub fn store(&mut self, addr: u64, bytes: usize, value: u64) -> Result<(), CoreError> {
        let data = split_bytes(value, bytes, self.isa.endianness());
        self.memory.write(addr, &data)?;
        Ok(())
    }

    /// 解码后的操作数
    pub fn arguments(&self) -> &[u64] {
        &self.arguments
    }

    /// 第 `index` 个操作数，缺省为 0
    pub fn arg(&self, index: usize) -> u64 {
        self.arguments.get(index).copied().unwrap_or(0)
    }

    /// 未经符号扩展或还原的原始字段值
    pub fn raw_values(&self) -> &[u64] {
        &self.raw_values
    }

    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn decoded(&self) -> Option<&Instruction> {
        self.decoded.and_then(|idx| self.isa.instructions().get(idx))
    }

    /// 最近一次解码的反汇编文本
    pub fn disassembly(&self) -> &str {
        &self.disassembly
    }

    pub fn last_error(&self) -> Option<&CoreError> {
        self.last_error.as_ref()
    }

    /// 环境调用的服务向量：[服务号, 参数...]
    pub fn service(&self) -> Vec<u64> {
        self.isa
            .service_registers()
            .iter()
            .map(|&reg| self.read_reg(reg))
            .collect()
    }

    // ========== 取指 / 解码 / 执行 ==========

    /// 从 PC 处取指
    ///
    /// 先读 1 字节交给 ISA 的长度钩子，再读剩余字节并按字节序拼接。
    /// 上一周期的解码结果在此清空。
    pub fn fetch(&mut self) -> Result<u64, CoreError> {
        self.fetched = 0;
        self.decoded = None;
        self.raw_values.clear();
        self.arguments.clear();
        self.disassembly.clear();
        match self.read_instruction() {
            Ok(word) => {
                self.fetched = word;
                Ok(word)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn read_instruction(&self) -> Result<u64, CoreError> {
        let first = self.memory.load8(self.pc)?;
        let length = self.isa.instruction_length(first);
        let mut bytes = Vec::with_capacity(length);
        bytes.push(first);
        if length > 1 {
            bytes.extend(self.memory.read_bytes(self.pc.wrapping_add(1), length - 1)?);
        }
        Ok(concat_bytes(&bytes, self.isa.endianness()))
    }

    /// 解码最近取到的指令字，返回反汇编文本
    pub fn decode(&mut self) -> Result<String, CoreError> {
        let isa = Arc::clone(&self.isa);
        let word = self.fetched;
        let pc = self.pc;

        let Some(index) = isa.decode_index(word) else {
            return Err(self.fail(CoreError::UnrecognizedInstruction { word, pc }));
        };
        let instruction = &isa.instructions()[index];
        if !instruction.available {
            return Err(self.fail(CoreError::UnavailableInstruction {
                mnemonic: instruction.mnemonic.clone(),
                pc,
            }));
        }

        let unpacked = match codec::unpack(instruction, word) {
            Ok(unpacked) => unpacked,
            Err(err) => return Err(self.fail(err.into())),
        };
        let text = isa.disassemble(instruction, word, &unpacked.arguments);
        tracing::trace!(pc = format_args!("0x{pc:08x}"), word = format_args!("0x{word:08x}"), "{text}");

        self.decoded = Some(index);
        self.raw_values = unpacked.raw;
        self.arguments = unpacked.arguments;
        self.disassembly.clone_from(&text);
        Ok(text)
    }

    /// 执行最近解码的指令
    pub fn execute(&mut self) -> Result<(), CoreError> {
        let pc = self.pc;
        let Some(executor) = self.decoded().map(|i| i.executor) else {
            return Err(self.fail(CoreError::NoDecodedInstruction { pc }));
        };
        executor(self).map_err(|err| self.fail(err))
    }

    /// 执行单步指令
    ///
    /// 仅在 Running 状态下推进；失败时核心已进入 Error，错误可由
    /// `last_error()` 取得。
    pub fn step(&mut self) -> CoreState {
        if self.state != CoreState::Running {
            return self.state;
        }
        if let Err(err) = self.cycle() {
            tracing::debug!(%err, "cycle aborted");
        }
        self.state
    }

    fn cycle(&mut self) -> Result<(), CoreError> {
        self.fetch()?;
        self.decode()?;
        self.execute()
    }

    /// 运行多条指令
    ///
    /// # 返回
    ///
    /// 成功完成的指令数量（失败的周期不计）和最终 CPU 状态
    pub fn run(&mut self, max_instructions: u64) -> (u64, CoreState) {
        let mut executed = 0;
        for _ in 0..max_instructions {
            let state = self.step();
            if state != CoreState::Error {
                executed += 1;
            }
            if state != CoreState::Running {
                return (executed, state);
            }
        }
        (executed, self.state)
    }

    fn fail(&mut self, err: CoreError) -> CoreError {
        tracing::error!(pc = format_args!("0x{:08x}", self.pc), "{err}");
        self.state = CoreState::Error;
        self.last_error = Some(err.clone());
        err
    }

    // ========== 调试输出 ==========

    /// 寄存器列表：(ABI 名, 值)
    pub fn registers(&self) -> Vec<(String, u64)> {
        (0..self.regs.len())
            .map(|i| (self.isa.register_name(i), self.read_reg(i)))
            .collect()
    }

    /// 每行一个寄存器：`x{i} {abi} {value}`
    ///
    /// 寄存器标记不是 `x` 的指令集使用 `r{i}`。
    pub fn register_dump(&self) -> String {
        let prefix = match self.isa.syntax().register_prefix.as_str() {
            "x" => "x",
            _ => "r",
        };
        let mut out = String::new();
        for (i, (name, value)) in self.registers().into_iter().enumerate() {
            let _ = writeln!(out, "{prefix}{i} {name} {value}");
        }
        out
    }

    /// 打印所有寄存器（用于调试）
    pub fn dump_regs(&self) {
        println!("═══════════════════════════════════════════════════════════════════");
        println!("CPU Status Dump ({})", self.isa.name());
        println!("═══════════════════════════════════════════════════════════════════");
        println!("PC: 0x{:08x}  State: {:?}", self.pc, self.state);
        if !self.disassembly.is_empty() {
            println!("Last: {}", self.disassembly);
        }
        println!();
        println!("─── Registers ─────────────────────────────────────────────────────");
        for (i, (name, value)) in self.registers().into_iter().enumerate() {
            if i % 4 == 0 {
                print!("  ");
            }
            print!("{:>5}: 0x{:08x}  ", name, value);
            if i % 4 == 3 {
                println!();
            }
        }
        println!();
    }
}

impl std::fmt::Debug for CpuCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuCore")
            .field("isa", &self.isa.name())
            .field("pc", &format_args!("0x{:08x}", self.pc))
            .field("state", &self.state)
            .field("fetched", &format_args!("0x{:08x}", self.fetched))
            .field("decoded", &self.decoded().map(|i| i.mnemonic.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Assembler;
    use crate::isa::rv32i;
    use crate::memory::FlatMemory;

    fn rv32i_core(size: usize) -> CpuCore {
        let isa = Arc::new(rv32i::instruction_set().unwrap());
        CpuCore::new(isa, Box::new(FlatMemory::new(size, 0)), 0)
    }

    /// 汇编并装载程序
    fn load_asm(cpu: &mut CpuCore, source: &str) {
        let code = Assembler::new(cpu.isa()).assemble_source(source).unwrap();
        cpu.load_program(&code).unwrap();
    }

    /// 将指令写入内存
    fn write_instr(cpu: &mut CpuCore, addr: u64, instr: u32) {
        cpu.memory_mut().store32(addr, instr).unwrap();
    }

    #[test]
    fn test_addi() {
        let mut cpu = rv32i_core(1024);
        cpu.load_program(&[]).unwrap();

        // addi x1, x0, 42
        write_instr(&mut cpu, 0, 0x02A00093);
        cpu.step();

        assert_eq!(cpu.read_reg(1), 42);
        assert_eq!(cpu.pc(), 4);
        assert_eq!(cpu.disassembly(), "ADDI ra, zero, 42");
    }

    #[test]
    fn test_addi_from_source() {
        let mut cpu = rv32i_core(1024);
        load_asm(&mut cpu, "ADDI x1, x0, 5");
        assert_eq!(cpu.memory().load32(0).unwrap(), 0x00500093);

        assert_eq!(cpu.step(), CoreState::Running);
        assert_eq!(cpu.read_reg(1), 5);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_add_sub() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "addi x1, x0, 100\naddi x2, x0, 30\nadd x3, x1, x2\nsub x4, x1, x2",
        );
        cpu.run(4);
        assert_eq!(cpu.read_reg(3), 130);
        assert_eq!(cpu.read_reg(4), 70);
    }

    #[test]
    fn test_lw_sw() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "addi x1, x0, 0x42\naddi x2, x0, 100\nsw x1, 0(x2)\nlw x3, 0(x2)",
        );
        cpu.run(4);
        assert_eq!(cpu.read_reg(3), 0x42);
        assert_eq!(cpu.memory().load32(100).unwrap(), 0x42);
    }

    #[test]
    fn test_beq_taken_to_label() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "beq x1, x1, target\naddi x3, x0, 1\ntarget: addi x4, x0, 2",
        );
        cpu.step();
        // 跳到 origin + 8，而不是 origin + 4
        assert_eq!(cpu.pc(), 8);
        cpu.step();
        assert_eq!(cpu.read_reg(3), 0);
        assert_eq!(cpu.read_reg(4), 2);
    }

    #[test]
    fn test_beq_not_taken() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "addi x1, x0, 5\naddi x2, x0, 10\nbeq x1, x2, skip\naddi x3, x0, 1\nskip: ebreak",
        );
        let (_, state) = cpu.run(10);
        assert_eq!(state, CoreState::EnvironmentBreak);
        assert_eq!(cpu.read_reg(3), 1);
    }

    #[test]
    fn test_jal_and_jalr() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "jal ra, func\nebreak\nfunc: addi a0, zero, 7\njalr zero, ra, 0",
        );
        let (_, state) = cpu.run(10);
        assert_eq!(state, CoreState::EnvironmentBreak);
        assert_eq!(cpu.read_reg(10), 7);
        assert_eq!(cpu.read_reg(1), 4);
    }

    #[test]
    fn test_x0_always_zero() {
        let mut cpu = rv32i_core(1024);
        load_asm(&mut cpu, "addi x0, x0, 42");
        cpu.step();
        assert_eq!(cpu.read_reg(0), 0);
    }

    #[test]
    fn test_simple_loop() {
        let mut cpu = rv32i_core(1024);
        load_asm(
            &mut cpu,
            "
            addi x1, x0, 0      # sum
            addi x2, x0, 1      # i
            addi x3, x0, 11     # limit
    loop:   add x1, x1, x2
            addi x2, x2, 1
            blt x2, x3, loop
            ebreak
            ",
        );
        let (_, state) = cpu.run(100);
        assert_eq!(state, CoreState::EnvironmentBreak);
        assert_eq!(cpu.read_reg(1), 55);
    }

    #[test]
    fn test_fetch_out_of_bounds() {
        let mut cpu = rv32i_core(64);
        load_asm(&mut cpu, "addi x5, x0, 9");
        cpu.set_pc(64);
        let before = cpu.registers();

        assert_eq!(cpu.step(), CoreState::Error);
        assert!(matches!(cpu.last_error(), Some(CoreError::Memory(_))));
        assert_eq!(cpu.registers(), before);
    }

    #[test]
    fn test_unrecognized_instruction() {
        let mut cpu = rv32i_core(64);
        cpu.load_program(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(cpu.step(), CoreState::Error);
        assert!(matches!(
            cpu.last_error(),
            Some(CoreError::UnrecognizedInstruction { word: 0xFFFF_FFFF, pc: 0 })
        ));
    }

    #[test]
    fn test_failed_decode_clears_previous_instruction() {
        let mut cpu = rv32i_core(64);
        load_asm(&mut cpu, "addi x1, x0, 3");
        write_instr(&mut cpu, 4, 0xFFFF_FFFF);

        assert_eq!(cpu.step(), CoreState::Running);
        assert_eq!(cpu.arguments(), &[1, 0, 3]);

        assert_eq!(cpu.step(), CoreState::Error);
        assert_eq!(cpu.fetched(), 0xFFFF_FFFF);
        assert!(cpu.decoded().is_none());
        assert!(cpu.arguments().is_empty());
        assert!(cpu.raw_values().is_empty());
        assert_eq!(cpu.disassembly(), "");
    }

    #[test]
    fn test_run_does_not_count_failed_cycle() {
        let mut cpu = rv32i_core(64);
        load_asm(&mut cpu, "addi x1, x0, 1\naddi x1, x1, 1");
        write_instr(&mut cpu, 8, 0xFFFF_FFFF);

        assert_eq!(cpu.run(10), (2, CoreState::Error));
        assert_eq!(cpu.read_reg(1), 2);
    }

    #[test]
    fn test_program_too_large() {
        let mut cpu = rv32i_core(4);
        let err = cpu.load_program(&[0; 8]).unwrap_err();
        assert!(matches!(err, CoreError::ProgramTooLarge { size: 8, capacity: 4 }));
        assert_eq!(cpu.state(), CoreState::Idle);
    }

    #[test]
    fn test_idle_core_does_not_step() {
        let mut cpu = rv32i_core(64);
        assert_eq!(cpu.step(), CoreState::Idle);
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_reset_sets_stack_pointer() {
        let mut cpu = rv32i_core(2048);
        load_asm(&mut cpu, "addi sp, sp, -16");
        cpu.step();
        assert_eq!(cpu.read_reg(2), 2032);
        cpu.reset();
        assert_eq!(cpu.read_reg(2), 2048);
        assert_eq!(cpu.state(), CoreState::Idle);
        assert!(cpu.decoded().is_none());
    }

    #[test]
    fn test_register_dump_format() {
        let mut cpu = rv32i_core(256);
        load_asm(&mut cpu, "addi a0, zero, 3");
        cpu.step();
        let dump = cpu.register_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 32);
        assert_eq!(lines[0], "x0 zero 0");
        assert_eq!(lines[2], "x2 sp 256");
        assert_eq!(lines[10], "x10 a0 3");
    }

    #[test]
    fn test_ecall_suspends_and_reports_service() {
        let mut cpu = rv32i_core(256);
        load_asm(&mut cpu, "addi a7, zero, 10\naddi a0, zero, 4\necall");
        let (executed, state) = cpu.run(10);
        assert_eq!(executed, 3);
        assert_eq!(state, CoreState::EnvironmentCall);
        assert_eq!(&cpu.service()[..2], &[10, 4]);
        assert_eq!(cpu.pc(), 12);
    }
}
