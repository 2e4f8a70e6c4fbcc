//! RV32I 基础指令集
//!
//! 用位段模型描述 RV32I 的全部格式：S 型立即数是普通拆分字段，
//! B/J 型偏移的位序被打乱，交给专用编解码函数处理。
//! 执行函数直接挂在每条指令上。

use std::sync::Arc;

use super::bitfield::BitRange;
use super::config::IsaBuilder;
use super::error::IsaResult;
use super::fields::{range_check, sign_ext};
use super::format::Format;
use super::instr_def::{Executor, Instruction};
use super::registry::InstructionSet;
use super::syntax::{Directive, memory_operands, operand_list};
use crate::codec::{self, LabelTable};
use crate::cpu::{CoreError, CoreState, CpuCore};

// ========== 操作码 ==========

pub const OP_LUI: u64 = 0b0110111;
pub const OP_AUIPC: u64 = 0b0010111;
pub const OP_JAL: u64 = 0b1101111;
pub const OP_JALR: u64 = 0b1100111;
pub const OP_BRANCH: u64 = 0b1100011;
pub const OP_LOAD: u64 = 0b0000011;
pub const OP_STORE: u64 = 0b0100011;
pub const OP_IMM: u64 = 0b0010011;
pub const OP_REG: u64 = 0b0110011;
pub const OP_SYSTEM: u64 = 0b1110011;

pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

// ========== B/J 偏移的位序变换 ==========

/// 13 位分支偏移 -> 12 位编码值
///
/// 编码值第 0 位放 imm[11]，第 1..=10 位放 imm[10:1]，第 11 位放 imm[12]，
/// 恰好对应指令字 [7]、[11:8]、[30:25]、[31]。
fn mangle_branch(offset: u64) -> u64 {
    (offset & 0x7FE) | ((offset >> 11) & 1) | (((offset >> 12) & 1) << 11)
}

fn unmangle_branch(mangled: u64) -> u64 {
    (mangled & 0x7FE) | ((mangled & 1) << 11) | (((mangled >> 11) & 1) << 12)
}

/// 21 位跳转偏移 -> 20 位编码值（指令字 [31:12] 的位序）
fn mangle_jump(offset: u64) -> u64 {
    ((offset >> 12) & 0xFF)
        | (((offset >> 11) & 1) << 8)
        | (((offset >> 1) & 0x3FF) << 9)
        | (((offset >> 20) & 1) << 19)
}

fn unmangle_jump(mangled: u64) -> u64 {
    (((mangled >> 8) & 1) << 11)
        | (((mangled >> 19) & 1) << 20)
        | ((mangled & 0xFF) << 12)
        | (((mangled >> 9) & 0x3FF) << 1)
}

/// 解析 PC 相对目标并检查范围与对齐
fn pc_relative(text: &str, address: u64, bits: u32, labels: &LabelTable) -> Result<u64, String> {
    let offset = codec::resolve_offset(text, address, labels)
        .ok_or_else(|| format!("Could not resolve target `{text}`"))?;
    if !range_check(offset, bits) {
        return Err(format!(
            "Offset {} to `{text}` does not fit in {bits} bits",
            offset as i64
        ));
    }
    if offset & 1 != 0 {
        return Err(format!("Offset {} to `{text}` is not 2-byte aligned", offset as i64));
    }
    Ok(offset)
}

fn encode_branch(text: &str, address: u64, bits: u32, labels: &LabelTable) -> Result<u64, String> {
    pc_relative(text, address, bits, labels).map(mangle_branch)
}

fn encode_jump(text: &str, address: u64, bits: u32, labels: &LabelTable) -> Result<u64, String> {
    pc_relative(text, address, bits, labels).map(mangle_jump)
}

// ========== 格式 ==========

struct Formats {
    r: Arc<Format>,
    i: Arc<Format>,
    load: Arc<Format>,
    shift: Arc<Format>,
    s: Arc<Format>,
    u: Arc<Format>,
    b: Arc<Format>,
    j: Arc<Format>,
    system: Arc<Format>,
}

fn formats() -> IsaResult<Formats> {
    let three = operand_list(3);
    let two = operand_list(2);
    let memory = memory_operands();

    let r = Format::new(
        "R",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(1),
            BitRange::new("rs2", 20, 5).register(2),
            BitRange::new("funct7", 25, 7),
        ],
    )?;

    let i = Format::new(
        "I",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(1),
            BitRange::new("imm", 20, 12).immediate(2),
        ],
    )?;

    let load = Format::new(
        "IL",
        &memory,
        "@mnem @arg0, @arg1(@arg2)",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(2),
            BitRange::new("imm", 20, 12).immediate(1),
        ],
    )?;

    let shift = Format::new(
        "IS",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(1),
            BitRange::new("shamt", 20, 5).immediate(2).unsigned(),
            BitRange::new("funct7", 25, 7),
        ],
    )?;

    let s = Format::new(
        "S",
        &memory,
        "@mnem @arg0, @arg1(@arg2)",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("imm[4:0]", 7, 5).immediate(1).total_bits(12),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(2),
            BitRange::new("rs2", 20, 5).register(0),
            BitRange::new("imm[11:5]", 25, 7).immediate(1).total_bits(12),
        ],
    )?;

    let u = Format::new(
        "U",
        &two,
        "@mnem @arg0, @arg1",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("imm", 12, 20).immediate(1).unsigned(),
        ],
    )?;

    let b = Format::new(
        "B",
        &three,
        "@mnem @arg0, @arg1, @arg2",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("imm[4:0]", 7, 5).special(2).total_bits(13),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5).register(0),
            BitRange::new("rs2", 20, 5).register(1),
            BitRange::new("imm[11:5]", 25, 7).special(2).total_bits(13),
        ],
    )?
    .with_special("imm", encode_branch, unmangle_branch);

    let j = Format::new(
        "J",
        &two,
        "@mnem @arg0, @arg1",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5).register(0),
            BitRange::new("imm", 12, 20).special(1).total_bits(21),
        ],
    )?
    .with_special("imm", encode_jump, unmangle_jump);

    let system = Format::new(
        "SYS",
        &operand_list(0),
        "@mnem",
        vec![
            BitRange::new("opcode", 0, 7),
            BitRange::new("rd", 7, 5),
            BitRange::new("funct3", 12, 3),
            BitRange::new("rs1", 15, 5),
            BitRange::new("funct12", 20, 12),
        ],
    )?;

    Ok(Formats {
        r: Arc::new(r),
        i: Arc::new(i),
        load: Arc::new(load),
        shift: Arc::new(shift),
        s: Arc::new(s),
        u: Arc::new(u),
        b: Arc::new(b),
        j: Arc::new(j),
        system: Arc::new(system),
    })
}

// ========== 执行 ==========

#[inline]
fn word(value: u64) -> u64 {
    value & 0xFFFF_FFFF
}

/// 第 `index` 个操作数所指寄存器的值
#[inline]
fn source(core: &CpuCore, index: usize) -> u64 {
    core.read_reg(core.arg(index) as usize)
}

/// 写回 rd（操作数 0）并顺序前进
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
    let value = core.arg(1) << 12;
    write_back(core, value)
}

fn exec_auipc(core: &mut CpuCore) -> Result<(), CoreError> {
    let value = core.pc().wrapping_add(core.arg(1) << 12);
    write_back(core, value)
}

fn exec_jal(core: &mut CpuCore) -> Result<(), CoreError> {
    let pc = core.pc();
    let rd = core.arg(0) as usize;
    core.write_reg(rd, pc.wrapping_add(4));
    core.set_pc(word(pc.wrapping_add(core.arg(1))));
    Ok(())
}

fn exec_jalr(core: &mut CpuCore) -> Result<(), CoreError> {
    let return_addr = core.pc().wrapping_add(4);
    let target = word(source(core, 1).wrapping_add(core.arg(2))) & !1;
    let rd = core.arg(0) as usize;
    core.write_reg(rd, return_addr);
    core.set_pc(target);
    Ok(())
}

fn exec_ecall(core: &mut CpuCore) -> Result<(), CoreError> {
    core.set_state(CoreState::EnvironmentCall);
    core.advance();
    Ok(())
}

fn exec_ebreak(core: &mut CpuCore) -> Result<(), CoreError> {
    core.set_state(CoreState::EnvironmentBreak);
    core.advance();
    Ok(())
}

// ========== 指令表 ==========

fn reg_op(f: &Formats, mnemonic: &str, funct3: u64, funct7: u64, exec: Executor) -> Instruction {
    Instruction::new(
        mnemonic,
        &f.r,
        &[("opcode", OP_REG), ("funct3", funct3), ("funct7", funct7)],
        exec,
    )
}

fn imm_op(f: &Formats, mnemonic: &str, funct3: u64, exec: Executor) -> Instruction {
    Instruction::new(mnemonic, &f.i, &[("opcode", OP_IMM), ("funct3", funct3)], exec)
}

fn shift_op(f: &Formats, mnemonic: &str, funct3: u64, funct7: u64, exec: Executor) -> Instruction {
    Instruction::new(
        mnemonic,
        &f.shift,
        &[("opcode", OP_IMM), ("funct3", funct3), ("funct7", funct7)],
        exec,
    )
}

fn load_op(f: &Formats, mnemonic: &str, funct3: u64, exec: Executor) -> Instruction {
    Instruction::new(mnemonic, &f.load, &[("opcode", OP_LOAD), ("funct3", funct3)], exec)
}

fn store_op(f: &Formats, mnemonic: &str, funct3: u64, exec: Executor) -> Instruction {
    Instruction::new(mnemonic, &f.s, &[("opcode", OP_STORE), ("funct3", funct3)], exec)
}

fn branch_op(f: &Formats, mnemonic: &str, funct3: u64, exec: Executor) -> Instruction {
    Instruction::new(mnemonic, &f.b, &[("opcode", OP_BRANCH), ("funct3", funct3)], exec)
}

fn instructions(f: &Formats) -> Vec<Instruction> {
    vec![
        // ========== U-type ==========
        Instruction::new("LUI", &f.u, &[("opcode", OP_LUI)], exec_lui),
        Instruction::new("AUIPC", &f.u, &[("opcode", OP_AUIPC)], exec_auipc),
        // ========== 控制流 ==========
        Instruction::new("JAL", &f.j, &[("opcode", OP_JAL)], exec_jal),
        Instruction::new("JALR", &f.i, &[("opcode", OP_JALR), ("funct3", 0)], exec_jalr),
        branch_op(f, "BEQ", 0b000, |c| branch(c, |a, b| a == b)),
        branch_op(f, "BNE", 0b001, |c| branch(c, |a, b| a != b)),
        branch_op(f, "BLT", 0b100, |c| branch(c, |a, b| (a as i32) < (b as i32))),
        branch_op(f, "BGE", 0b101, |c| branch(c, |a, b| (a as i32) >= (b as i32))),
        branch_op(f, "BLTU", 0b110, |c| branch(c, |a, b| word(a) < word(b))),
        branch_op(f, "BGEU", 0b111, |c| branch(c, |a, b| word(a) >= word(b))),
        // ========== Load / Store ==========
        load_op(f, "LB", 0b000, |c| load(c, 1, true)),
        load_op(f, "LH", 0b001, |c| load(c, 2, true)),
        load_op(f, "LW", 0b010, |c| load(c, 4, false)),
        load_op(f, "LBU", 0b100, |c| load(c, 1, false)),
        load_op(f, "LHU", 0b101, |c| load(c, 2, false)),
        store_op(f, "SB", 0b000, |c| store(c, 1)),
        store_op(f, "SH", 0b001, |c| store(c, 2)),
        store_op(f, "SW", 0b010, |c| store(c, 4)),
        // ========== 立即数运算 ==========
        imm_op(f, "ADDI", 0b000, |c| alu_imm(c, u64::wrapping_add)),
        imm_op(f, "SLTI", 0b010, |c| alu_imm(c, slt)),
        imm_op(f, "SLTIU", 0b011, |c| alu_imm(c, sltu)),
        imm_op(f, "XORI", 0b100, |c| alu_imm(c, |a, b| a ^ b)),
        imm_op(f, "ORI", 0b110, |c| alu_imm(c, |a, b| a | b)),
        imm_op(f, "ANDI", 0b111, |c| alu_imm(c, |a, b| a & b)),
        shift_op(f, "SLLI", 0b001, 0b0000000, |c| alu_imm(c, sll)),
        shift_op(f, "SRLI", 0b101, 0b0000000, |c| alu_imm(c, srl)),
        shift_op(f, "SRAI", 0b101, 0b0100000, |c| alu_imm(c, sra)),
        // ========== 寄存器运算 ==========
        reg_op(f, "ADD", 0b000, 0b0000000, |c| alu_reg(c, u64::wrapping_add)),
        reg_op(f, "SUB", 0b000, 0b0100000, |c| alu_reg(c, u64::wrapping_sub)),
        reg_op(f, "SLL", 0b001, 0b0000000, |c| alu_reg(c, sll)),
        reg_op(f, "SLT", 0b010, 0b0000000, |c| alu_reg(c, slt)),
        reg_op(f, "SLTU", 0b011, 0b0000000, |c| alu_reg(c, sltu)),
        reg_op(f, "XOR", 0b100, 0b0000000, |c| alu_reg(c, |a, b| a ^ b)),
        reg_op(f, "SRL", 0b101, 0b0000000, |c| alu_reg(c, srl)),
        reg_op(f, "SRA", 0b101, 0b0100000, |c| alu_reg(c, sra)),
        reg_op(f, "OR", 0b110, 0b0000000, |c| alu_reg(c, |a, b| a | b)),
        reg_op(f, "AND", 0b111, 0b0000000, |c| alu_reg(c, |a, b| a & b)),
        // ========== 系统 ==========
        Instruction::new(
            "ECALL",
            &f.system,
            &[("opcode", OP_SYSTEM), ("rd", 0), ("funct3", 0), ("rs1", 0), ("funct12", 0)],
            exec_ecall,
        ),
        Instruction::new(
            "EBREAK",
            &f.system,
            &[("opcode", OP_SYSTEM), ("rd", 0), ("funct3", 0), ("rs1", 0), ("funct12", 1)],
            exec_ebreak,
        ),
    ]
}

/// 标准 RV32I 指令长度编码：低两位为 11 时是 32 位指令
fn fetch_length(first_byte: u8) -> usize {
    if first_byte & 0b11 == 0b11 { 4 } else { 2 }
}

/// 构建 RV32I 指令集
pub fn instruction_set() -> IsaResult<InstructionSet> {
    let f = formats()?;
    IsaBuilder::new("RV32I")
        .word_bits(32)
        .abi_names(&ABI_NAMES)
        .register_bits(32)
        .zero_register(0)
        .stack_pointer(2)
        .service_registers(&[17, 10, 11, 12, 13, 14, 15, 16])
        .instruction_length(fetch_length)
        .directive("string", Directive::String)
        .directive("asciz", Directive::CString)
        .directive("byte", Directive::Scalar(8))
        .directive("half", Directive::Scalar(16))
        .directive("word", Directive::Scalar(32))
        .directive("dword", Directive::Scalar(64))
        .directive("float", Directive::FloatingPoint)
        .directive("double", Directive::FloatingPoint)
        .float_width("float", 4)
        .float_width("double", 8)
        .instructions(instructions(&f))
        .build()
}
