//! 仿真环境
//!
//! 负责把配置、程序装载与运行循环串起来：
//! - `SimConfig`: 指令集、内存、程序来源与运行限制
//! - 程序装载：原始二进制、ELF（`PT_LOAD` 段）或汇编源码
//! - `run_until_halt`: 运行循环，并作为环境调用的宿主
//!
//! # 示例
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use oak_sim::sim_env::{Arch, ProgramSource, SimConfig, SimEnv};
//!
//! let config = SimConfig::new()
//!     .with_arch(Arch::Rv32i)
//!     .with_source(ProgramSource::Assembly("hello.s".into()))
//!     .with_memory_size(64 * 1024);
//! let mut env = SimEnv::from_config(config).unwrap();
//! let summary = env
//!     .run_until_halt(&mut std::io::stdout(), &AtomicBool::new(false))
//!     .unwrap();
//! println!("{summary}");
//! ```

use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use elf::ElfBytes;
use elf::abi::{EM_MIPS, EM_RISCV, PT_LOAD};
use elf::endian::AnyEndian;
use thiserror::Error;

use crate::asm::{AsmError, Assembler};
use crate::cpu::{CoreError, CoreState, CpuBuilder, CpuCore, DEFAULT_MEMORY_SIZE};
use crate::isa::{InstructionSet, IsaError, IsaResult, mips, rv32i, sign_ext};
use crate::memory::{MemError, Memory};

/// 默认最大执行指令数，超过即视为可能的死循环
pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 1 << 15;

/// 环境调用服务号
pub const SERVICE_PRINT_INT: u64 = 1;
pub const SERVICE_PRINT_STRING: u64 = 4;
pub const SERVICE_EXIT: u64 = 10;
pub const SERVICE_PRINT_CHAR: u64 = 11;

/// 仿真环境错误
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("ELF parse error: {0}")]
    Elf(#[from] elf::ParseError),
    #[error(transparent)]
    Memory(#[from] MemError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Asm(#[from] AsmError),
    #[error(transparent)]
    Isa(#[from] IsaError),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// 内置指令集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arch {
    #[default]
    Rv32i,
    Mips,
}

impl Arch {
    pub fn name(self) -> &'static str {
        match self {
            Arch::Rv32i => "rv32i",
            Arch::Mips => "mips",
        }
    }

    /// 构建对应的指令集
    pub fn instruction_set(self) -> IsaResult<InstructionSet> {
        match self {
            Arch::Rv32i => rv32i::instruction_set(),
            Arch::Mips => mips::instruction_set(),
        }
    }

    /// ELF 头中期望的机器类型
    fn elf_machine(self) -> u16 {
        match self {
            Arch::Rv32i => EM_RISCV,
            Arch::Mips => EM_MIPS,
        }
    }
}

impl FromStr for Arch {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rv32i" | "riscv" => Ok(Arch::Rv32i),
            "mips" | "mips32" => Ok(Arch::Mips),
            other => Err(SimError::Config(format!(
                "Unknown architecture '{other}' (expected rv32i or mips)"
            ))),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 程序来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// 原始二进制，按字节写入入口地址
    Binary(PathBuf),
    /// ELF 可执行文件
    Elf(PathBuf),
    /// 汇编源码，在进程内汇编
    Assembly(PathBuf),
}

/// 仿真配置
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub arch: Arch,
    pub source: Option<ProgramSource>,
    /// 内存大小（字节）
    pub memory_size: usize,
    /// 内存基地址
    pub memory_base: u64,
    /// 入口 PC（缺省为内存基地址，ELF 取文件头中的入口）
    pub entry_pc: Option<u64>,
    /// 最大执行指令数（0 表示无限制）
    pub max_instructions: u64,
    /// 逐条打印反汇编
    pub trace: bool,
    /// 打印装载信息
    pub verbose: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            source: None,
            memory_size: DEFAULT_MEMORY_SIZE,
            memory_base: 0,
            entry_pc: None,
            max_instructions: DEFAULT_INSTRUCTION_LIMIT,
            trace: false,
            verbose: false,
        }
    }
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_source(mut self, source: ProgramSource) -> Self {
        self.source = Some(source);
        self
    }

    /// 设置内存大小
    pub fn with_memory_size(mut self, size: usize) -> Self {
        self.memory_size = size;
        self
    }

    /// 设置内存基地址
    pub fn with_memory_base(mut self, base: u64) -> Self {
        self.memory_base = base;
        self
    }

    /// 设置入口 PC
    pub fn with_entry_pc(mut self, pc: u64) -> Self {
        self.entry_pc = Some(pc);
        self
    }

    /// 设置最大执行指令数（0 表示无限制）
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// 启用详细输出
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// ELF 可装载段
#[derive(Debug, Clone)]
pub struct ElfSegment {
    /// 虚拟地址
    pub vaddr: u64,
    /// 内存中的大小，超出文件数据的部分（BSS）填零
    pub mem_size: usize,
    /// 段数据
    pub data: Vec<u8>,
}

/// ELF 文件解析结果
#[derive(Debug, Clone)]
pub struct ElfImage {
    /// 入口点地址
    pub entry: u64,
    /// 机器类型
    pub machine: u16,
    pub segments: Vec<ElfSegment>,
}

impl ElfImage {
    /// 解析 32 位或 64 位、任意字节序的 ELF
    pub fn parse(data: &[u8]) -> Result<Self, SimError> {
        let file = ElfBytes::<AnyEndian>::minimal_parse(data)?;
        let header = &file.ehdr;

        let mut segments = Vec::new();
        if let Some(phdrs) = file.segments() {
            for phdr in phdrs {
                // 只处理 PT_LOAD 类型的段
                if phdr.p_type != PT_LOAD {
                    continue;
                }
                let data = file.segment_data(&phdr)?.to_vec();
                segments.push(ElfSegment {
                    vaddr: phdr.p_vaddr,
                    mem_size: phdr.p_memsz as usize,
                    data,
                });
            }
        }
        if segments.is_empty() {
            return Err(SimError::Config("ELF file has no loadable segments".into()));
        }

        Ok(ElfImage {
            entry: header.e_entry,
            machine: header.e_machine,
            segments,
        })
    }

    /// 写入所有段，BSS 部分清零
    pub fn load_into(&self, memory: &mut dyn Memory) -> Result<(), SimError> {
        for seg in &self.segments {
            memory.write(seg.vaddr, &seg.data)?;
            if seg.mem_size > seg.data.len() {
                let bss_start = seg.vaddr.wrapping_add(seg.data.len() as u64);
                memory.fill(bss_start, seg.mem_size - seg.data.len(), 0)?;
            }
        }
        Ok(())
    }
}

/// 运行结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 程序请求退出
    Terminated,
    /// 核心进入 Error
    Error(String),
    /// 断点
    Breakpoint { pc: u64 },
    /// 外部停止标志
    Stopped,
    /// 达到最大指令数
    InstructionLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Terminated => write!(f, "Execution complete."),
            StopReason::Error(message) => write!(f, "Error: {message}"),
            StopReason::Breakpoint { pc } => write!(f, "Breakpoint at pc 0x{pc:08x}."),
            StopReason::Stopped => write!(f, "Stopped by request."),
            StopReason::InstructionLimit => write!(f, "Possible infinite loop."),
        }
    }
}

/// 执行计时器：记录执行条数与耗时
#[derive(Debug)]
pub struct ExecutionTimer {
    started: Instant,
    executed: u64,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            executed: 0,
        }
    }

    /// 记一条已完成的指令
    pub fn tick(&mut self) {
        self.executed += 1;
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(self, reason: StopReason) -> RunSummary {
        RunSummary {
            executed: self.executed,
            elapsed: self.started.elapsed(),
            reason,
        }
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub executed: u64,
    pub elapsed: Duration,
    pub reason: StopReason,
}

impl RunSummary {
    /// 每秒执行的指令数
    pub fn instructions_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.executed as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.reason)?;
        write!(
            f,
            "Executed {} instruction(s) in {:?} (IPS: {:.0})",
            self.executed,
            self.elapsed,
            self.instructions_per_second()
        )
    }
}

/// 仿真环境
///
/// 封装 CPU 核心与配置，提供统一的装载与运行接口
#[derive(Debug)]
pub struct SimEnv {
    cpu: CpuCore,
    config: SimConfig,
    /// 累计执行的指令数
    executed: u64,
}

impl SimEnv {
    /// 创建环境但不装载程序
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let isa = Arc::new(config.arch.instruction_set()?);
        let cpu = CpuBuilder::new(isa)
            .memory_size(config.memory_size)
            .memory_base(config.memory_base)
            .entry_pc(config.entry_pc.unwrap_or(config.memory_base))
            .build();
        Ok(SimEnv {
            cpu,
            config,
            executed: 0,
        })
    }

    /// 从配置创建仿真环境并装载 `source` 指定的程序
    pub fn from_config(config: SimConfig) -> Result<Self, SimError> {
        let mut env = Self::new(config)?;
        match env.config.source.clone() {
            Some(ProgramSource::Binary(path)) => {
                let image = std::fs::read(&path)?;
                env.load_binary(&image)?;
                if env.config.verbose {
                    println!("Loaded binary: {}", path.display());
                    println!("  Size: {} bytes", image.len());
                }
            }
            Some(ProgramSource::Assembly(path)) => {
                let source = std::fs::read_to_string(&path)?;
                env.load_source(&source)?;
                if env.config.verbose {
                    println!("Assembled: {}", path.display());
                }
            }
            Some(ProgramSource::Elf(path)) => {
                let data = std::fs::read(&path)?;
                env.load_elf(&data)?;
                if env.config.verbose {
                    println!("Loaded ELF: {}", path.display());
                }
            }
            None => {}
        }
        if env.config.verbose {
            println!("  Entry point: 0x{:08x}", env.cpu.entry_pc());
        }
        Ok(env)
    }

    /// 装载原始机器码到入口地址
    pub fn load_binary(&mut self, image: &[u8]) -> Result<(), SimError> {
        self.cpu.reset();
        self.cpu.load_program(image)?;
        Ok(())
    }

    /// 以入口地址为起点汇编源码并装载
    pub fn load_source(&mut self, source: &str) -> Result<(), SimError> {
        let image = Assembler::new(self.cpu.isa())
            .with_origin(self.cpu.entry_pc())
            .assemble_source(source)?;
        self.load_binary(&image)
    }

    /// 装载 ELF 的所有可装载段；除非配置指定入口，否则使用文件头中的入口
    pub fn load_elf(&mut self, data: &[u8]) -> Result<(), SimError> {
        let image = ElfImage::parse(data)?;
        if image.machine != self.config.arch.elf_machine() {
            tracing::warn!(
                machine = image.machine,
                arch = %self.config.arch,
                "ELF machine type does not match the selected architecture"
            );
        }
        let entry = self.config.entry_pc.unwrap_or(image.entry);
        self.cpu.set_entry_pc(entry);
        self.cpu.reset();
        image.load_into(self.cpu.memory_mut())?;
        self.cpu.set_state(CoreState::Running);
        tracing::debug!(
            segments = image.segments.len(),
            entry = format_args!("0x{entry:08x}"),
            "ELF loaded"
        );
        Ok(())
    }

    pub fn cpu(&self) -> &CpuCore {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CpuCore {
        &mut self.cpu
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// 累计执行的指令数
    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// 运行直到停止条件
    ///
    /// 停止条件：
    /// - 程序通过环境调用请求退出
    /// - CPU 进入 Error 或遇到断点
    /// - `stop` 被置位
    /// - 达到最大指令数
    ///
    /// 程序输出与 trace 写入 `out`。
    pub fn run_until_halt(
        &mut self,
        out: &mut dyn Write,
        stop: &AtomicBool,
    ) -> Result<RunSummary, SimError> {
        if self.cpu.state() == CoreState::Idle {
            return Err(SimError::Config("No program loaded".into()));
        }
        // 断点可恢复：从上次停下的位置继续
        if self.cpu.state() == CoreState::EnvironmentBreak {
            self.cpu.set_state(CoreState::Running);
        }
        let limit = self.config.max_instructions;
        let mut timer = ExecutionTimer::start();

        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                break StopReason::Stopped;
            }
            match self.cpu.state() {
                CoreState::Running => {
                    if limit != 0 && timer.executed() >= limit {
                        break StopReason::InstructionLimit;
                    }
                    let pc = self.cpu.pc();
                    if self.cpu.step() != CoreState::Error {
                        timer.tick();
                        if self.config.trace {
                            writeln!(out, "0x{pc:08x}: {}", self.cpu.disassembly())?;
                        }
                    }
                }
                CoreState::EnvironmentCall => {
                    if self.serve(out)? {
                        break StopReason::Terminated;
                    }
                    self.cpu.set_state(CoreState::Running);
                }
                CoreState::EnvironmentBreak => break StopReason::Breakpoint { pc: self.cpu.pc() },
                CoreState::Error => {
                    let message = self
                        .cpu
                        .last_error()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "core entered the error state".to_string());
                    break StopReason::Error(message);
                }
                CoreState::Idle => break StopReason::Stopped,
            }
        };
        out.flush()?;

        let summary = timer.finish(reason);
        self.executed += summary.executed;
        tracing::debug!(
            executed = summary.executed,
            elapsed = ?summary.elapsed,
            reason = %summary.reason,
            "run finished"
        );
        Ok(summary)
    }

    /// 处理一次环境调用，返回是否请求退出
    fn serve(&mut self, out: &mut dyn Write) -> Result<bool, SimError> {
        let service = self.cpu.service();
        let Some(&number) = service.first() else {
            tracing::warn!("environment call on an ISA without service registers");
            return Ok(false);
        };
        let arg0 = service.get(1).copied().unwrap_or(0);
        tracing::debug!(service = number, arg0, "environment call");

        match number {
            SERVICE_PRINT_INT => {
                let value = sign_ext(arg0, self.cpu.isa().register_bits()) as i64;
                write!(out, "{value}")?;
            }
            SERVICE_PRINT_STRING => {
                let bytes = self.read_c_string(arg0)?;
                out.write_all(&bytes)?;
            }
            SERVICE_EXIT => return Ok(true),
            SERVICE_PRINT_CHAR => out.write_all(&[arg0 as u8])?,
            _ => tracing::warn!(service = number, "ignored unknown environment call service number"),
        }
        Ok(false)
    }

    /// 读取以 NUL 结尾的字符串（不含结尾的 0）
    fn read_c_string(&self, addr: u64) -> Result<Vec<u8>, SimError> {
        let memory = self.cpu.memory();
        let mut bytes = Vec::new();
        let mut cursor = addr;
        loop {
            let byte = memory.load8(cursor)?;
            if byte == 0 {
                return Ok(bytes);
            }
            bytes.push(byte);
            cursor = cursor.wrapping_add(1);
        }
    }

    /// 打印仿真状态
    pub fn dump(&self) {
        println!("=== SimEnv Status ===");
        println!("Instructions executed: {}", self.executed);
        self.cpu.dump_regs();
    }
}
