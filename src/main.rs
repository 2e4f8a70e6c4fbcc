//! oak_sim 命令行入口
//!
//! 默认把输入当作汇编源码：汇编后直接运行。`-o` 只汇编并写出二进制，
//! `-s`/`--elf` 跳过汇编直接装载原始二进制或 ELF。

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use oak_sim::asm::Assembler;
use oak_sim::cpu::DEFAULT_MEMORY_SIZE;
use oak_sim::sim_env::{
    Arch, DEFAULT_INSTRUCTION_LIMIT, ProgramSource, SimConfig, SimEnv, StopReason,
};

/// Retargetable assembler and simulator.
#[derive(Parser)]
#[command(name = "oak_sim", version, about)]
struct Cli {
    /// Input file (assembly source unless --simulate or --elf is given).
    input: PathBuf,

    /// Assemble only and write the binary to FILE.
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["simulate", "elf"])]
    output: Option<PathBuf>,

    /// Instruction set architecture (rv32i, mips).
    #[arg(short, long, default_value = "rv32i", value_parser = parse_arch)]
    arch: Arch,

    /// Treat the input as a raw binary and simulate it.
    #[arg(short, long, conflicts_with = "elf")]
    simulate: bool,

    /// Treat the input as an ELF executable and simulate it.
    #[arg(long)]
    elf: bool,

    /// Memory size in bytes.
    #[arg(short, long, default_value_t = DEFAULT_MEMORY_SIZE)]
    memory_size: usize,

    /// Stop after this many instructions (0 = unlimited).
    #[arg(long, default_value_t = DEFAULT_INSTRUCTION_LIMIT)]
    max_instructions: u64,

    /// Print each instruction as it executes.
    #[arg(long)]
    trace: bool,

    /// Print the register file after the run.
    #[arg(long)]
    dump_registers: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_arch(s: &str) -> Result<Arch, String> {
    s.parse().map_err(|e: oak_sim::sim_env::SimError| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Some(output) = &cli.output {
        assemble_only(&cli.input, output, cli.arch)?;
        return Ok(ExitCode::SUCCESS);
    }

    let source = match (cli.simulate, cli.elf) {
        (true, _) => ProgramSource::Binary(cli.input.clone()),
        (_, true) => ProgramSource::Elf(cli.input.clone()),
        _ => ProgramSource::Assembly(cli.input.clone()),
    };
    let config = SimConfig::new()
        .with_arch(cli.arch)
        .with_source(source)
        .with_memory_size(cli.memory_size)
        .with_max_instructions(cli.max_instructions)
        .with_trace(cli.trace)
        .with_verbose(cli.verbose);

    let mut env = SimEnv::from_config(config)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;

    // Ctrl-C 只置位停止标志，运行循环在下一条指令前退出并报告统计
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))
        .context("failed to install the Ctrl-C handler")?;
    let mut stdout = io::stdout().lock();
    let summary = env
        .run_until_halt(&mut stdout, &stop)
        .context("simulation failed")?;
    writeln!(stdout)?;
    writeln!(stdout, "{summary}")?;

    if cli.dump_registers {
        write!(stdout, "{}", env.cpu().register_dump())?;
    }

    Ok(match summary.reason {
        StopReason::Error(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn assemble_only(input: &Path, output: &Path, arch: Arch) -> Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let isa = arch
        .instruction_set()
        .with_context(|| format!("failed to build the {arch} instruction set"))?;
    let code = match Assembler::new(&isa).assemble_source(&source) {
        Ok(code) => code,
        Err(err) => bail!("{}: {err}", input.display()),
    };
    std::fs::write(output, &code)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} byte(s) to {}", code.len(), output.display());
    Ok(())
}
