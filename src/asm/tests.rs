//! 汇编器测试

use std::sync::Arc;

use super::*;
use crate::cpu::{CoreError, CpuCore};
use crate::isa::{BitRange, Format, Instruction, IsaBuilder, IsaError, concat_bytes, mips, operand_list, rv32i};

fn rv32i_isa() -> InstructionSet {
    rv32i::instruction_set().unwrap()
}

fn word_at(code: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([code[offset], code[offset + 1], code[offset + 2], code[offset + 3]])
}

fn lines_of(errors: &[LineError]) -> Vec<usize> {
    errors.iter().map(|e| e.line).collect()
}

#[test]
fn test_addi_little_endian_bytes() {
    let isa = rv32i_isa();
    let code = Assembler::new(&isa).assemble_source("ADDI x1, x0, 5").unwrap();
    assert_eq!(code, vec![0x93, 0x00, 0x50, 0x00]);
}

#[test]
fn test_branch_to_label_eight_ahead() {
    let isa = rv32i_isa();
    let code = Assembler::new(&isa)
        .assemble_source("beq x1, x1, target\naddi x3, x0, 1\ntarget: addi x4, x0, 2")
        .unwrap();
    assert_eq!(code.len(), 12);
    assert_eq!(word_at(&code, 0), 0x00108463);
}

#[test]
fn test_backward_label_and_origin() {
    let isa = rv32i_isa();
    let asm = Assembler::new(&isa).with_origin(0x100);
    let lexed = asm.lex("start: addi x0, x0, 0\nloop: beq x0, x0, start").unwrap();
    assert_eq!(lexed.labels.get("start"), Some(0x100));
    assert_eq!(lexed.labels.get("loop"), Some(0x104));

    let assembled = asm.assemble(&lexed).unwrap();
    assert!(assembled.errors.is_empty());
    // beq 偏移 -4
    assert_eq!(word_at(&assembled.machine_code, 4), 0xFE000EE3);
}

#[test]
fn test_lexed_lines_strip_comments_and_labels() {
    let isa = rv32i_isa();
    let lexed = Assembler::new(&isa)
        .lex("  loop:  addi x1, x1, 1 # count\n\n# only a comment\n  ebreak")
        .unwrap();
    assert_eq!(
        lexed.lines,
        vec![
            SourceLine { number: 1, text: "addi x1, x1, 1".to_string() },
            SourceLine { number: 4, text: "ebreak".to_string() },
        ]
    );
}

#[test]
fn test_char_literal_with_comment_marker() {
    let isa = rv32i_isa();
    let code = Assembler::new(&isa)
        .assemble_source("addi a0, zero, '#'  # hash")
        .unwrap();
    assert_eq!(word_at(&code, 0), 0x02300513);
}

#[test]
fn test_unknown_escape_is_kept_in_strings_and_chars() {
    let isa = rv32i_isa();
    let code = Assembler::new(&isa)
        .assemble_source(".data\n.string \"a\\qb\"")
        .unwrap();
    assert_eq!(code, vec![b'a', b'\\', b'q', b'b']);

    let err = Assembler::new(&isa)
        .assemble_source("addi a0, zero, '\\q'")
        .unwrap_err();
    assert_eq!(lines_of(err.line_errors()), vec![1]);
    assert_eq!(err.line_errors()[0].message, "Could not resolve operand `'\\q'`");
}

#[test]
fn test_escaped_string_advances_by_collapsed_length() {
    let isa = rv32i_isa();
    let asm = Assembler::new(&isa);
    let lexed = asm
        .lex(".data\nmsg: .string \"a\\nb\"\nafter: .byte 1")
        .unwrap();
    assert!(lexed.errors.is_empty());
    assert_eq!(lexed.labels.get("msg"), Some(0));
    assert_eq!(lexed.labels.get("after"), Some(3));

    let assembled = asm.assemble(&lexed).unwrap();
    assert_eq!(assembled.machine_code, vec![b'a', b'\n', b'b', 1]);
}

#[test]
fn test_asciz_appends_terminator() {
    let isa = rv32i_isa();
    let code = Assembler::new(&isa)
        .assemble_source(".data\n.asciz \"hi\\t\"\n.byte 7")
        .unwrap();
    assert_eq!(code, vec![b'h', b'i', b'\t', 0, 7]);
}

#[test]
fn test_scalar_directives() {
    let isa = rv32i_isa();
    let asm = Assembler::new(&isa);
    let source = "\
.data
words: .word 0x12345678, -1
.half 0xBEEF
.dword 1
.byte 'A', '\\n'
ptr: .word words
";
    let lexed = asm.lex(source).unwrap();
    assert_eq!(lexed.labels.get("ptr"), Some(20));

    let code = asm.assemble(&lexed).unwrap().machine_code;
    assert_eq!(code.len(), 24);
    assert_eq!(&code[0..4], &[0x78, 0x56, 0x34, 0x12]);
    assert_eq!(&code[4..8], &[0xFF; 4]);
    assert_eq!(&code[8..10], &[0xEF, 0xBE]);
    assert_eq!(&code[10..18], &[1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(&code[18..20], &[b'A', b'\n']);
    assert_eq!(&code[20..24], &[0, 0, 0, 0]);
}

#[test]
fn test_pass_one_collects_errors() {
    let isa = rv32i_isa();
    let source = "\
addi x1, x0, 1
frob x1
.word 5
.data extra
.data
add x1, x1, x1
bogus
.nope
";
    let lexed = Assembler::new(&isa).lex(source).unwrap();
    assert_eq!(lines_of(&lexed.errors), vec![2, 3, 4, 6, 7, 8]);
    assert_eq!(lexed.errors[0].message, "Instruction frob not found");
    assert_eq!(lexed.errors[1].message, "Directive .word is unsupported in the text section");
    assert_eq!(lexed.errors[2].message, "Directive .data does not take any parameters");
    assert_eq!(lexed.errors[3].message, "Instruction add is in the data section");
    assert_eq!(lexed.errors[4].message, "Unrecognized keyword bogus");
    assert_eq!(lexed.errors[5].message, "Unrecognized directive .nope");
}

#[test]
fn test_invalid_section_directive_does_not_toggle() {
    let isa = rv32i_isa();
    let lexed = Assembler::new(&isa)
        .lex(".data now\naddi x1, x0, 1")
        .unwrap();
    // 仍在代码段，指令被接受
    assert_eq!(lines_of(&lexed.errors), vec![1]);
    assert_eq!(lexed.lines.len(), 1);
}

#[test]
fn test_pass_two_keeps_addresses_after_errors() {
    let isa = rv32i_isa();
    let asm = Assembler::new(&isa);
    let source = "\
addi x1, x0, 5000
add x1, x1, x99
beq x0, x0, end
addi x2, x0
end: ebreak
";
    let lexed = asm.lex(source).unwrap();
    assert!(lexed.errors.is_empty());

    let assembled = asm.assemble(&lexed).unwrap();
    assert_eq!(lines_of(&assembled.errors), vec![1, 2, 4]);
    assert_eq!(assembled.errors[0].message, "Value 5000 is out of range for a 12-bit field");
    assert_eq!(assembled.errors[1].message, "Register x99 does not exist");
    assert_eq!(assembled.errors[2].message, "Argument format for ADDI violated");
    assert_eq!(assembled.machine_code.len(), 20);
    assert_eq!(word_at(&assembled.machine_code, 8), 0x00000463);
    assert_eq!(word_at(&assembled.machine_code, 16), 0x00100073);

    let err = asm.assemble_source(source).unwrap_err();
    assert_eq!(err.line_errors().len(), 3);
}

#[test]
fn test_unresolved_branch_target() {
    let isa = rv32i_isa();
    let err = Assembler::new(&isa)
        .assemble_source("beq x0, x0, nowhere")
        .unwrap_err();
    assert!(matches!(err, AsmError::Source(ref errors) if errors[0].message.contains("nowhere")));
}

#[test]
fn test_duplicate_label_keeps_first() {
    let isa = rv32i_isa();
    let lexed = Assembler::new(&isa)
        .lex("a: addi x0, x0, 0\na: addi x0, x0, 0")
        .unwrap();
    assert!(lexed.errors.is_empty());
    assert_eq!(lexed.labels.get("a"), Some(0));
}

#[test]
fn test_float_is_sized_then_rejected() {
    let isa = rv32i_isa();
    let asm = Assembler::new(&isa);
    let lexed = asm.lex(".data\n.float 1.5, 2.5\nend: .double -0.5").unwrap();
    assert!(lexed.errors.is_empty());
    assert_eq!(lexed.labels.get("end"), Some(8));

    let err = asm.assemble(&lexed).unwrap_err();
    assert_eq!(err, IsaError::UnsupportedDirective { directive: "float".to_string() });
}

fn nop(core: &mut CpuCore) -> Result<(), CoreError> {
    core.advance();
    Ok(())
}

fn toy_isa() -> InstructionSet {
    let f = Arc::new(
        Format::new("N", &operand_list(0), "@mnem", vec![BitRange::new("op", 0, 8)]).unwrap(),
    );
    IsaBuilder::new("toy")
        .word_bits(8)
        .directive("real", Directive::FloatingPoint)
        .directive("fixed", Directive::FixedPoint)
        .instruction(Instruction::new("NOP", &f, &[("op", 0)], nop))
        .build()
        .unwrap()
}

#[test]
fn test_missing_float_width_aborts_pass_one() {
    let isa = toy_isa();
    let asm = Assembler::new(&isa);
    // 前面的用户错误不影响中止
    let err = asm.lex("frob\n.data\n.real 1.0\nbogus").unwrap_err();
    assert_eq!(err, IsaError::MissingFloatWidth { directive: "real".to_string() });
    assert!(err.to_string().contains("file a bug report"));

    let err = asm.assemble_source(".data\n.real 1.0").unwrap_err();
    assert!(matches!(err, AsmError::Isa(IsaError::MissingFloatWidth { .. })));
}

#[test]
fn test_fixed_point_is_unsupported() {
    let isa = toy_isa();
    let err = Assembler::new(&isa).lex(".data\n.fixed 1.0").unwrap_err();
    assert!(matches!(err, IsaError::UnsupportedDirective { .. }));
}

#[test]
fn test_mips_big_endian_emission() {
    let isa = mips::instruction_set().unwrap();
    let code = Assembler::new(&isa)
        .assemble_source("addi $t0, $zero, -1\n.data\n.word 0x01020304")
        .unwrap();
    assert_eq!(code, vec![0x20, 0x08, 0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(concat_bytes(&code[..4], isa.endianness()), 0x2008_FFFF);
}
