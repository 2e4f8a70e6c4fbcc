//! MIPS32 子集
//!
//! 大端序，寄存器以 `$` 标记。移位指令的第三个操作数由 funct 决定：
//! 立即移位取 shamt，可变移位取 rs，两者用条件切片绑定到同一个操作数。
//! 不模拟延迟槽，算术溢出回绕而不陷入。

use std::sync::Arc;

use super::bitfield::BitRange;
use super::config::IsaBuilder;
use super::error::IsaResult;
use super::fields::{low_mask, range_check, sign_ext};
use super::format::Format;
use super::instr_def::{Executor, Instruction};
use super::registry::InstructionSet;
use super::syntax::{Directive, Endianness, Keywords, memory_operands, operand_list};
use crate::codec::{self, LabelTable};
use crate::cpu::{CoreError, CoreState, CpuCore};

pub const ABI_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1", "$t2", "$t3", "$t4",
    "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7", "$t8", "$t9",
    "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

pub const REG_SP: usize = 29;
pub const REG_RA: usize = 31;

// ========== 操作码 ==========

pub const OP_SPECIAL: u64 = 0x00;
pub const OP_J: u64 = 0x02;
pub const OP_JAL: u64 = 0x03;
pub const OP_BEQ: u64 = 0x04;
pub const OP_BNE: u64 = 0x05;
pub const OP_ADDI: u64 = 0x08;
pub const OP_ADDIU: u64 = 0x09;
pub const OP_SLTI: u64 = 0x0A;
pub const OP_SLTIU: u64 = 0x0B;
pub const OP_ANDI: u64 = 0x0C;
pub const OP_ORI: u64 = 0x0D;
pub const OP_XORI: u64 = 0x0E;
pub const OP_LUI: u64 = 0x0F;
pub const OP_LB: u64 = 0x20;
pub const OP_LW: u64 = 0x23;
pub const OP_SB: u64 = 0x28;
pub const OP_SW: u64 = 0x2B;

/// funct 第 2 位为 1 表示可变移位（移位量来自 rs）
fn variable_shift(word: u64) -> bool {
    word & 0b100 != 0
}

fn immediate_shift(word: u64) -> bool {
    !variable_shift(word)
}

// ========== 专用字段 ==========

/// 分支偏移相对于下一条指令，以字为单位存放
fn encode_branch(text: &str, address: u64, _bits: u32, labels: &LabelTable) -> Result<u64, String> {
    let offset = codec::resolve_offset(text, address, labels)
        .ok_or_else(|| format!("Could not resolve branch target `{text}`"))?;
    if offset & 0b11 != 0 {
        return Err(format!("Branch offset {} is not word aligned", offset as i64));
    }
    let words = ((offset.wrapping_sub(4) as i64) >> 2) as u64;
    if !range_check(words, 16) {
        return Err(format!("Branch offset {} does not fit in 16 bits", offset as i64));
    }
    Ok(words & 0xFFFF)
}

fn decode_branch(encoded: u64) -> u64 {
    (sign_ext(encoded, 16) << 2).wrapping_add(4)
}

/// 跳转目标是绝对地址，存放其 [27:2] 位
fn encode_jump(text: &str, _address: u64, bits: u32, labels: &LabelTable) -> Result<u64, String> {
    let target = labels
        .get(text)
        .or_else(|| codec::parse_number(text))
        .ok_or_else(|| format!("Could not resolve jump target `{text}`"))?;
    if target & 0b11 != 0 {
        return Err(format!("Jump target 0x{target:x} is not word aligned"));
    }
    // 绝对地址，不接受负数
    if target & !low_mask(bits) != 0 {
        return Err(format!("Jump target 0x{target:x} is outside the current 256 MiB region"));
    }
    Ok((target >> 2) & 0x03FF_FFFF)
}

fn decode_jump(encoded: u64) -> u64 {
    encoded << 2
}

// ========== 格式 ==========

struct Formats {
    r: Arc<Format>,
    shift: Arc<Format>,
    jr: Arc<Format>,
    syscall: Arc<Format>,
    i: Arc<Format>,
    iu: Arc<Format>,
    lui: Arc<Format>,
    mem: Arc<Format>,
    branch: Arc<Format>,
    jump: Arc<Format>,
}

fn formats() -> IsaResult<Formats> {
    let three = operand_list(3);

    let r = Format::new(
        "R",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(1),
            BitRange::new("rt", 16, 5).register(2),
            BitRange::new("rd", 11, 5).register(0),
            BitRange::new("shamt", 6, 5),
            BitRange::new("funct", 0, 6),
        ],
    )?;

    let shift = Format::new(
        "RS",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(2).when(variable_shift),
            BitRange::new("rt", 16, 5).register(1),
            BitRange::new("rd", 11, 5).register(0),
            BitRange::new("shamt", 6, 5).immediate(2).unsigned().when(immediate_shift),
            BitRange::new("funct", 0, 6),
        ],
    )?;

    let jr = Format::new(
        "JR",
        &operand_list(1),
        "@mnem @arg0",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(0),
            BitRange::new("zero", 6, 15),
            BitRange::new("funct", 0, 6),
        ],
    )?;

    let syscall = Format::new(
        "SYSCALL",
        &operand_list(0),
        "@mnem",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("code", 6, 20),
            BitRange::new("funct", 0, 6),
        ],
    )?;

    let i_ranges = |imm: BitRange| {
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(1),
            BitRange::new("rt", 16, 5).register(0),
            imm,
        ]
    };
    let i = Format::new(
        "I",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        i_ranges(BitRange::new("imm", 0, 16).immediate(2)),
    )?;
    let iu = Format::new(
        "IU",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        i_ranges(BitRange::new("imm", 0, 16).immediate(2).unsigned()),
    )?;

    let lui = Format::new(
        "LUI",
        &operand_list(2),
        "@mnem @arg0, @arg1",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5),
            BitRange::new("rt", 16, 5).register(0),
            BitRange::new("imm", 0, 16).immediate(1).unsigned(),
        ],
    )?;

    let mem = Format::new(
        "M",
        &memory_operands(),
        "@mnem @arg0, @arg1(@arg2)",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(2),
            BitRange::new("rt", 16, 5).register(0),
            BitRange::new("imm", 0, 16).immediate(1),
        ],
    )?;

    let branch = Format::new(
        "B",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("rs", 21, 5).register(0),
            BitRange::new("rt", 16, 5).register(1),
            BitRange::new("offset", 0, 16).special(2).total_bits(19),
        ],
    )?
    .with_special("offset", encode_branch, decode_branch);

    let jump = Format::new(
        "J",
        &operand_list(1),
        "@mnem @arg0",
        vec![
            BitRange::new("opcode", 26, 6),
            BitRange::new("target", 0, 26).special(0).total_bits(28).unsigned(),
        ],
    )?
    .with_special("target", encode_jump, decode_jump);

    Ok(Formats {
        r: Arc::new(r),
        shift: Arc::new(shift),
        jr: Arc::new(jr),
        syscall: Arc::new(syscall),
        i: Arc::new(i),
        iu: Arc::new(iu),
        lui: Arc::new(lui),
        mem: Arc::new(mem),
        branch: Arc::new(branch),
        jump: Arc::new(jump),
    })
}

// ========== 执行 ==========

#[inline]
fn word(value: u64) -> u64 {
    value & 0xFFFF_FFFF
}

#[inline]
fn source(core: &CpuCore, index: usize) -> u64 {
    core.read_reg(core.arg(index) as usize)
}

fn write_back(core: &mut CpuCore, value: u64) -> Result<(), CoreError> {
    let rd = core.arg(0) as usize;
    core.write_reg(rd, value);
    core.advance();
    Ok(())
}

fn alu_reg(core: &mut CpuCore, op: fn(u64, u64) -> u64) -> Result<(), CoreError> {
    let value = op(source(core, 1), source(core, 2));
    write_back(core, value)
}

fn alu_imm(core: &mut CpuCore, op: fn(u64, u64) -> u64) -> Result<(), CoreError> {
    let value = op(source(core, 1), core.arg(2));
    write_back(core, value)
}

fn slt(a: u64, b: u64) -> u64 {
    ((a as i32) < (b as i32)) as u64
}

fn sltu(a: u64, b: u64) -> u64 {
    (word(a) < word(b)) as u64
}

fn sll(a: u64, shamt: u64) -> u64 {
    a << (shamt & 0x1F)
}

fn srl(a: u64, shamt: u64) -> u64 {
    word(a) >> (shamt & 0x1F)
}

fn sra(a: u64, shamt: u64) -> u64 {
    ((a as i32) >> (shamt & 0x1F)) as u32 as u64
}

fn load(core: &mut CpuCore, bytes: usize, signed: bool) -> Result<(), CoreError> {
    let addr = word(source(core, 2).wrapping_add(core.arg(1)));
    let value = core.load(addr, bytes)?;
    let value = if signed { sign_ext(value, bytes as u32 * 8) } else { value };
    write_back(core, value)
}

fn store(core: &mut CpuCore, bytes: usize) -> Result<(), CoreError> {
    let addr = word(source(core, 2).wrapping_add(core.arg(1)));
    let value = source(core, 0);
    core.store(addr, bytes, value)?;
    core.advance();
    Ok(())
}

fn branch(core: &mut CpuCore, taken: fn(u64, u64) -> bool) -> Result<(), CoreError> {
    if taken(source(core, 0), source(core, 1)) {
        let target = word(core.pc().wrapping_add(core.arg(2)));
        core.set_pc(target);
    } else {
        core.advance();
    }
    Ok(())
}

fn exec_lui(core: &mut CpuCore) -> Result<(), CoreError> {
    let value = core.arg(1) << 16;
    write_back(core, value)
}

/// 目标位于下一条指令所在的 256 MiB 区域
fn jump_target(core: &CpuCore) -> u64 {
    let next = core.pc().wrapping_add(4);
    (next & 0xF000_0000) | core.arg(0)
}

fn exec_j(core: &mut CpuCore) -> Result<(), CoreError> {
    let target = jump_target(core);
    core.set_pc(target);
    Ok(())
}

fn exec_jal(core: &mut CpuCore) -> Result<(), CoreError> {
    let target = jump_target(core);
    let link = core.pc().wrapping_add(4);
    core.write_reg(REG_RA, link);
    core.set_pc(target);
    Ok(())
}

fn exec_jr(core: &mut CpuCore) -> Result<(), CoreError> {
    let target = source(core, 0);
    core.set_pc(target);
    Ok(())
}

fn exec_syscall(core: &mut CpuCore) -> Result<(), CoreError> {
    core.set_state(CoreState::EnvironmentCall);
    core.advance();
    Ok(())
}

// ========== 指令表 ==========

fn special(f: &Formats, mnemonic: &str, funct: u64, exec: Executor) -> Instruction {
    Instruction::new(
        mnemonic,
        &f.r,
        &[("opcode", OP_SPECIAL), ("shamt", 0), ("funct", funct)],
        exec,
    )
}

fn shift(f: &Formats, mnemonic: &str, funct: u64, exec: Executor) -> Instruction {
    Instruction::new(mnemonic, &f.shift, &[("opcode", OP_SPECIAL), ("funct", funct)], exec)
}

fn instructions(f: &Formats) -> Vec<Instruction> {
    vec![
        // ========== R-type ==========
        special(f, "ADD", 0x20, |c| alu_reg(c, u64::wrapping_add)),
        special(f, "ADDU", 0x21, |c| alu_reg(c, u64::wrapping_add)),
        special(f, "SUB", 0x22, |c| alu_reg(c, u64::wrapping_sub)),
        special(f, "SUBU", 0x23, |c| alu_reg(c, u64::wrapping_sub)),
        special(f, "AND", 0x24, |c| alu_reg(c, |a, b| a & b)),
        special(f, "OR", 0x25, |c| alu_reg(c, |a, b| a | b)),
        special(f, "XOR", 0x26, |c| alu_reg(c, |a, b| a ^ b)),
        special(f, "NOR", 0x27, |c| alu_reg(c, |a, b| !(a | b))),
        special(f, "SLT", 0x2A, |c| alu_reg(c, slt)),
        special(f, "SLTU", 0x2B, |c| alu_reg(c, sltu)),
        // ========== 移位 ==========
        shift(f, "SLL", 0x00, |c| alu_imm(c, sll)),
        shift(f, "SRL", 0x02, |c| alu_imm(c, srl)),
        shift(f, "SRA", 0x03, |c| alu_imm(c, sra)),
        shift(f, "SLLV", 0x04, |c| alu_reg(c, sll)),
        shift(f, "SRLV", 0x06, |c| alu_reg(c, srl)),
        shift(f, "SRAV", 0x07, |c| alu_reg(c, sra)),
        // ========== 跳转 ==========
        Instruction::new(
            "JR",
            &f.jr,
            &[("opcode", OP_SPECIAL), ("zero", 0), ("funct", 0x08)],
            exec_jr,
        ),
        Instruction::new("J", &f.jump, &[("opcode", OP_J)], exec_j),
        Instruction::new("JAL", &f.jump, &[("opcode", OP_JAL)], exec_jal),
        Instruction::new(
            "SYSCALL",
            &f.syscall,
            &[("opcode", OP_SPECIAL), ("code", 0), ("funct", 0x0C)],
            exec_syscall,
        ),
        // ========== I-type ==========
        Instruction::new("ADDI", &f.i, &[("opcode", OP_ADDI)], |c| alu_imm(c, u64::wrapping_add)),
        Instruction::new("ADDIU", &f.i, &[("opcode", OP_ADDIU)], |c| alu_imm(c, u64::wrapping_add)),
        Instruction::new("SLTI", &f.i, &[("opcode", OP_SLTI)], |c| alu_imm(c, slt)),
        Instruction::new("SLTIU", &f.i, &[("opcode", OP_SLTIU)], |c| alu_imm(c, sltu)),
        Instruction::new("ANDI", &f.iu, &[("opcode", OP_ANDI)], |c| alu_imm(c, |a, b| a & b)),
        Instruction::new("ORI", &f.iu, &[("opcode", OP_ORI)], |c| alu_imm(c, |a, b| a | b)),
        Instruction::new("XORI", &f.iu, &[("opcode", OP_XORI)], |c| alu_imm(c, |a, b| a ^ b)),
        Instruction::new("LUI", &f.lui, &[("opcode", OP_LUI), ("rs", 0)], exec_lui),
        Instruction::new("LB", &f.mem, &[("opcode", OP_LB)], |c| load(c, 1, true)),
        Instruction::new("LW", &f.mem, &[("opcode", OP_LW)], |c| load(c, 4, false)),
        Instruction::new("SB", &f.mem, &[("opcode", OP_SB)], |c| store(c, 1)),
        Instruction::new("SW", &f.mem, &[("opcode", OP_SW)], |c| store(c, 4)),
        Instruction::new("BEQ", &f.branch, &[("opcode", OP_BEQ)], |c| branch(c, |a, b| a == b)),
        Instruction::new("BNE", &f.branch, &[("opcode", OP_BNE)], |c| branch(c, |a, b| a != b)),
    ]
}

/// 构建 MIPS32 子集指令集
pub fn instruction_set() -> IsaResult<InstructionSet> {
    let f = formats()?;
    IsaBuilder::new("MIPS32")
        .word_bits(32)
        .endianness(Endianness::Big)
        .keywords(Keywords::new().with_register("$"))
        .abi_names(&ABI_NAMES)
        .register_bits(32)
        .zero_register(0)
        .stack_pointer(REG_SP)
        .service_registers(&[2, 4, 5, 6, 7])
        .directive("ascii", Directive::String)
        .directive("asciiz", Directive::CString)
        .directive("byte", Directive::Scalar(8))
        .directive("half", Directive::Scalar(16))
        .directive("word", Directive::Scalar(32))
        .directive("float", Directive::FloatingPoint)
        .directive("double", Directive::FloatingPoint)
        .float_width("float", 4)
        .float_width("double", 8)
        .instructions(instructions(&f))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_offset_round_trip() {
        let labels = LabelTable::new();
        for offset in [4i64, 8, -4, 0, 0x20000, -0x1FFFC] {
            let encoded = encode_branch(&offset.to_string(), 0x100, 19, &labels).unwrap();
            assert_eq!(sign_ext(decode_branch(encoded), 19) as i64, offset);
        }
        assert!(encode_branch("0x20004", 0x100, 19, &labels).is_err());
        assert!(encode_branch("6", 0x100, 19, &labels).is_err());
    }

    #[test]
    fn test_jump_target() {
        let mut labels = LabelTable::new();
        labels.define("main", 0x40);
        assert_eq!(encode_jump("main", 0, 28, &labels), Ok(0x10));
        assert_eq!(decode_jump(0x10), 0x40);
        assert!(encode_jump("0x41", 0, 28, &labels).is_err());
        assert!(encode_jump("0x10000000", 0, 28, &labels).is_err());
        assert!(encode_jump("-4", 0, 28, &labels).is_err());
        assert_eq!(encode_jump("0x0FFFFFFC", 0, 28, &labels), Ok(0x03FF_FFFF));
    }

    #[test]
    fn test_instruction_set_builds_without_conflicts() {
        let isa = instruction_set().unwrap();
        assert_eq!(isa.endianness(), Endianness::Big);
        assert!(isa.detect_conflicts().is_empty());
        assert_eq!(isa.register_name(29), "$sp");
    }
}
