//! ISA 模块测试

use std::sync::Arc;

use super::*;
use crate::asm::Assembler;
use crate::codec;
use crate::cpu::{CoreError, CpuCore};

fn rv32i() -> InstructionSet {
    rv32i::instruction_set().unwrap()
}

/// 用汇编器汇编源码，按指令集字节序切成指令字
fn assemble_at(isa: &InstructionSet, origin: u64, source: &str) -> Vec<u64> {
    let code = Assembler::new(isa).with_origin(origin).assemble_source(source).unwrap();
    code.chunks(isa.word_bytes())
        .map(|chunk| concat_bytes(chunk, isa.endianness()))
        .collect()
}

fn encode(isa: &InstructionSet, line: &str) -> u64 {
    assemble_at(isa, 0, line)[0]
}

fn disassemble(isa: &InstructionSet, word: u64) -> String {
    let instr = isa.instruction_matching(word).unwrap();
    let unpacked = codec::unpack(instr, word).unwrap();
    isa.disassemble(instr, word, &unpacked.arguments)
}

// ========== RV32I 编码 ==========

#[test]
fn test_encode_addi() {
    let isa = rv32i();
    assert_eq!(encode(&isa, "ADDI x1, x0, 5"), 0x00500093);
    assert_eq!(encode(&isa, "addi ra, zero, 42"), 0x02A00093);
    assert_eq!(encode(&isa, "addi x2, x0, -1"), 0xFFF00113);
}

#[test]
fn test_encode_r_type() {
    let isa = rv32i();
    assert_eq!(encode(&isa, "add x3, x1, x2"), 0x002081B3);
    assert_eq!(encode(&isa, "sub x3, x1, x2"), 0x402081B3);
}

#[test]
fn test_encode_memory() {
    let isa = rv32i();
    assert_eq!(encode(&isa, "sw x1, 8(x2)"), 0x00112423);
    assert_eq!(encode(&isa, "lw x3, 0(x2)"), 0x00012183);
    assert_eq!(encode(&isa, "lw x1, 4(x2)"), 0x00412083);
}

#[test]
fn test_encode_branches() {
    let isa = rv32i();
    assert_eq!(encode(&isa, "beq x1, x2, 8"), 0x00208463);
    assert_eq!(encode(&isa, "blt x2, x3, -8"), 0xFE314CE3);
    assert_eq!(encode(&isa, "jal x0, 4"), 0x0040006F);
}

#[test]
fn test_encode_branch_to_label() {
    let isa = rv32i();
    // 标签在 8 字节之后
    let words = assemble_at(
        &isa,
        0x100,
        "beq x1, x2, target\naddi x0, x0, 0\ntarget: addi x0, x0, 0",
    );
    assert_eq!(words[0], 0x00208463);
}

#[test]
fn test_encode_system() {
    let isa = rv32i();
    assert_eq!(encode(&isa, "ecall"), 0x00000073);
    assert_eq!(encode(&isa, "ebreak"), 0x00100073);
}

// ========== 解码与反汇编 ==========

#[test]
fn test_decode_distinguishes_add_sub() {
    let isa = rv32i();
    assert_eq!(isa.instruction_matching(0x002081B3).unwrap().mnemonic, "ADD");
    assert_eq!(isa.instruction_matching(0x402081B3).unwrap().mnemonic, "SUB");
    assert!(isa.instruction_matching(0xFFFF_FFFF).is_none());
}

#[test]
fn test_unpack_negative_immediate() {
    let isa = rv32i();
    let instr = isa.instruction_matching(0xFFF00113).unwrap();
    let unpacked = codec::unpack(instr, 0xFFF00113).unwrap();
    assert_eq!(unpacked.raw, vec![2, 0, 0xFFF]);
    assert_eq!(unpacked.arguments, vec![2, 0, (-1i64) as u64]);
}

#[test]
fn test_unpack_split_store_immediate() {
    let isa = rv32i();
    // sw x5, -20(sp)
    let word = encode(&isa, "sw x5, -20(sp)");
    let instr = isa.instruction_matching(word).unwrap();
    let unpacked = codec::unpack(instr, word).unwrap();
    assert_eq!(unpacked.arguments, vec![5, (-20i64) as u64, 2]);
}

#[test]
fn test_disassembly_text() {
    let isa = rv32i();
    assert_eq!(disassemble(&isa, 0x02A00093), "ADDI ra, zero, 42");
    assert_eq!(disassemble(&isa, 0x00112423), "SW ra, 8(sp)");
    assert_eq!(disassemble(&isa, 0xFE314CE3), "BLT sp, gp, -8");
    assert_eq!(disassemble(&isa, 0x0040006F), "JAL zero, 4");
    assert_eq!(disassemble(&isa, 0x00000073), "ECALL");
}

#[test]
fn test_round_trip_through_text() {
    let isa = rv32i();
    for line in [
        "LUI a0, 74565",
        "AUIPC t0, 1",
        "JALR ra, t1, -4",
        "BNE s0, s1, -2048",
        "BGEU a0, a1, 4094",
        "LBU t2, 2047(s11)",
        "SH t6, -2048(gp)",
        "SRAI a5, a6, 31",
        "SLTIU t3, t4, -1",
        "JAL ra, -1048576",
        "JAL ra, 1048574",
    ] {
        let word = encode(&isa, line);
        assert_eq!(disassemble(&isa, word), line);
    }
}

/// 每个操作数字段的极值位型：全 0、全 1、仅最高位（有符号最小值）、除最高位外全 1（有符号最大值）
fn extreme_patterns(width: u32) -> [u64; 4] {
    let top = 1u64 << (width - 1);
    [0, low_mask(width), top, top - 1]
}

/// 对指令集里每条可用指令，取各操作数字段的极值构造指令字，
/// 反汇编后再用汇编器汇编，必须得到同一个指令字
fn assert_every_instruction_round_trips(isa: &InstructionSet) {
    let mut checked = 0;
    for instr in isa.instructions().iter().filter(|i| i.available) {
        let template = instr.template();
        let ranges: Vec<&BitRange> = instr
            .format
            .ranges
            .iter()
            .filter(|r| r.parameter.is_some() && r.applies_to(template))
            .collect();

        for choice in 0..4 {
            let mut word = template;
            for index in 0..instr.format.parameter_count() {
                let slices: Vec<&&BitRange> =
                    ranges.iter().filter(|r| r.parameter == Some(index)).collect();
                let Some(width) = slices
                    .iter()
                    .map(|r| r.limit.map_or(r.bits, |(_, hi)| hi + 1))
                    .max()
                else {
                    continue;
                };
                let raw = extreme_patterns(width)[choice];
                for range in slices {
                    word |= range.pack(raw);
                }
            }

            let decoded = isa.instruction_matching(word).unwrap();
            assert_eq!(decoded.mnemonic, instr.mnemonic, "word 0x{word:08x}");
            let text = disassemble(isa, word);
            assert_eq!(encode(isa, &text), word, "`{text}` did not reassemble to 0x{word:08x}");
            checked += 1;
        }
    }
    assert_eq!(checked, 4 * isa.instructions().iter().filter(|i| i.available).count());
}

#[test]
fn test_every_rv32i_instruction_round_trips() {
    assert_every_instruction_round_trips(&rv32i());
}

#[test]
fn test_every_mips_instruction_round_trips() {
    assert_every_instruction_round_trips(&mips::instruction_set().unwrap());
}

// ========== 冲突与定义错误 ==========

fn nop(core: &mut CpuCore) -> Result<(), CoreError> {
    core.advance();
    Ok(())
}

fn toy_format() -> Arc<Format> {
    Arc::new(
        Format::new(
            "T",
            &operand_list(1),
            "@mnem @arg0",
            vec![BitRange::new("op", 0, 4), BitRange::new("a", 4, 4).register(0)],
        )
        .unwrap(),
    )
}

#[test]
fn test_conflicts_are_reported() {
    let f = toy_format();
    let isa = IsaBuilder::new("toy")
        .word_bits(8)
        .abi_names(&["r0", "r1"])
        .instruction(Instruction::new("AAA", &f, &[("op", 1)], nop))
        .instruction(Instruction::new("BB", &f, &[("op", 1)], nop))
        .instruction(Instruction::new("C", &f, &[("op", 2)], nop))
        .build()
        .unwrap();
    let conflicts = isa.detect_conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].first, "AAA");
    assert_eq!(conflicts[0].second, "BB");
    // 首个匹配者胜出：按长度排序后 AAA 在前
    assert_eq!(isa.instruction_matching(0x51).unwrap().mnemonic, "AAA");
}

#[test]
fn test_unavailable_instruction_is_not_a_conflict() {
    let f = toy_format();
    let isa = IsaBuilder::new("toy")
        .word_bits(8)
        .instruction(Instruction::new("AAA", &f, &[("op", 1)], nop))
        .instruction(Instruction::new("BB", &f, &[("op", 1)], nop).unavailable())
        .build()
        .unwrap();
    assert!(isa.detect_conflicts().is_empty());
}

#[test]
fn test_unknown_constant_field_is_rejected() {
    let f = toy_format();
    let err = IsaBuilder::new("toy")
        .word_bits(8)
        .instruction(Instruction::new("X", &f, &[("funct", 1)], nop))
        .build()
        .unwrap_err();
    assert!(matches!(err, IsaError::UnknownConstantField { .. }));
}

#[test]
fn test_word_width_checked_at_build() {
    let f = toy_format();
    let err = IsaBuilder::new("toy")
        .word_bits(16)
        .instruction(Instruction::new("X", &f, &[("op", 1)], nop))
        .build()
        .unwrap_err();
    assert!(matches!(err, IsaError::WordWidthMismatch { covered: 8, word_bits: 16, .. }));
}

#[test]
fn test_prefix_lookup_prefers_longest() {
    let isa = rv32i();
    assert_eq!(isa.instruction_prefixing("addi x1, x0, 1").unwrap().mnemonic, "ADDI");
    assert_eq!(isa.instruction_prefixing("add x1, x0, x1").unwrap().mnemonic, "ADD");
    assert_eq!(isa.instruction_prefixing("  SLTIU a0, a0, 1").unwrap().mnemonic, "SLTIU");
    assert!(isa.instruction_prefixing("mul a0, a0, a1").is_none());
    assert_eq!(isa.instruction("jalr").unwrap().mnemonic, "JALR");
}

#[test]
fn test_register_name_fallback() {
    let isa = rv32i();
    assert_eq!(isa.register_name(10), "a0");
    assert_eq!(isa.register_name(40), "x40");
}

// ========== MIPS：条件位段与重排布局 ==========

#[test]
fn test_mips_conditional_shift_operand() {
    let isa = mips::instruction_set().unwrap();

    // sll $t0, $t1, 4 -> shamt 占用第三个操作数
    let sll = encode(&isa, "sll $t0, $t1, 4");
    assert_eq!(sll, 0x0009_4100);
    assert_eq!(disassemble(&isa, sll), "SLL $t0, $t1, 4");

    // sllv $t0, $t1, $t2 -> rs 占用第三个操作数
    let sllv = encode(&isa, "sllv $t0, $t1, $t2");
    assert_eq!(sllv, 0x0149_4004);
    assert_eq!(disassemble(&isa, sllv), "SLLV $t0, $t1, $t2");
}

#[test]
fn test_mips_reordered_layout() {
    let isa = mips::instruction_set().unwrap();
    // add $t0, $t1, $t2：rd 在 rs/rt 之后
    assert_eq!(encode(&isa, "add $t0, $t1, $t2"), 0x012A_4020);
    assert_eq!(encode(&isa, "addi $t0, $zero, -1"), 0x2008_FFFF);
    assert_eq!(encode(&isa, "lw $t0, 4($sp)"), 0x8FA8_0004);
    assert_eq!(encode(&isa, "syscall"), 0x0000_000C);

    let add = isa.instruction("add").unwrap();
    assert_eq!(add.mask(), 0xFC00_07FF);
    assert_eq!(add.template(), 0x0000_0020);
}

#[test]
fn test_mips_branch_and_jump() {
    let isa = mips::instruction_set().unwrap();
    let words = assemble_at(
        &isa,
        0,
        "loop: add $t0, $t0, $t0
               add $t0, $t0, $t0
               beq $t0, $zero, loop
               add $t0, $t0, $t0
         done: j done
               jal done",
    );
    // beq 在 0x08，跳回 0x00：(0 - 8 - 4) / 4 = -3
    assert_eq!(words[2], 0x1100_FFFD);
    assert_eq!(disassemble(&isa, words[2]), "BEQ $t0, $zero, -8");

    assert_eq!(words[4], 0x0800_0004);
    assert_eq!(words[5], 0x0C00_0004);
    assert_eq!(disassemble(&isa, 0x0800_0004), "J 16");
}
