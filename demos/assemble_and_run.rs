//! 汇编并运行同一个程序的 RV32I 与 MIPS 版本
//!
//! 程序计算 1 + 2 + ... + 10，并通过环境调用打印结果。

use std::io;
use std::sync::atomic::AtomicBool;

use oak_sim::sim_env::{Arch, SimConfig, SimEnv};

const RV32I_SUM: &str = "\
        addi t0, zero, 0        # sum
        addi t1, zero, 1        # i
        addi t2, zero, 11       # limit
loop:   add  t0, t0, t1
        addi t1, t1, 1
        blt  t1, t2, loop

        addi a7, zero, 4
        addi a0, zero, msg
        ecall
        addi a7, zero, 1
        add  a0, t0, zero
        ecall
        addi a7, zero, 11
        addi a0, zero, '\\n'
        ecall
        addi a7, zero, 10
        ecall

.data
msg:    .asciz \"sum = \"
";

const MIPS_SUM: &str = "\
        addi $t0, $zero, 0
        addi $t1, $zero, 1
        addi $t2, $zero, 11
loop:   add  $t0, $t0, $t1
        addi $t1, $t1, 1
        bne  $t1, $t2, loop

        addi $v0, $zero, 4
        addi $a0, $zero, msg
        syscall
        addi $v0, $zero, 1
        add  $a0, $t0, $zero
        syscall
        addi $v0, $zero, 11
        addi $a0, $zero, '\\n'
        syscall
        addi $v0, $zero, 10
        syscall

.data
msg:    .asciiz \"sum = \"
";

fn main() {
    for (arch, source) in [(Arch::Rv32i, RV32I_SUM), (Arch::Mips, MIPS_SUM)] {
        println!("=== {arch} ===");
        if let Err(err) = run(arch, source) {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
        println!();
    }
}

fn run(arch: Arch, source: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = SimConfig::new()
        .with_arch(arch)
        .with_memory_size(64 * 1024)
        .with_trace(std::env::args().any(|a| a == "--trace"));
    let mut env = SimEnv::new(config)?;
    env.load_source(source)?;

    let summary = env.run_until_halt(&mut io::stdout(), &AtomicBool::new(false))?;
    println!("{summary}");
    print!("{}", env.cpu().register_dump());
    Ok(())
}
