//! ISA 定义错误
//!
//! 这类错误说明指令集描述本身有缺陷，而不是用户程序有错，
//! 因此一旦出现就中止当前阶段，并提示向 ISA 作者报告。

use thiserror::Error;

const BUG: &str = " (this is a bug in the instruction set definition, please file a bug report)";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsaError {
    #[error("format `{format}` binds parameter {parameter} but its pattern has only {groups} capture groups{bug}", bug = BUG)]
    MissingCaptureGroup {
        format: String,
        parameter: usize,
        groups: usize,
    },

    #[error("field `{field}` of format `{format}` ends at bit {end}, outside the {word_bits}-bit word{bug}", bug = BUG)]
    FieldOutOfWord {
        format: String,
        field: String,
        end: u32,
        word_bits: u32,
    },

    #[error("format `{format}` covers {covered} bits but the word is {word_bits} bits wide{bug}", bug = BUG)]
    WordWidthMismatch {
        format: String,
        covered: u32,
        word_bits: u32,
    },

    #[error("fields `{first}` and `{second}` of format `{format}` overlap without a condition{bug}", bug = BUG)]
    OverlappingFields {
        format: String,
        first: String,
        second: String,
    },

    #[error("slices of split field `{field}` in format `{format}` do not cover its {total_bits} bits exactly once{bug}", bug = BUG)]
    SplitCoverage {
        format: String,
        field: String,
        total_bits: u32,
    },

    #[error("instruction {mnemonic} sets constant `{field}` which its format does not declare{bug}", bug = BUG)]
    UnknownConstantField { mnemonic: String, field: String },

    #[error("special field `{field}` of format `{format}` has no encoder{bug}", bug = BUG)]
    MissingSpecialProcessor { format: String, field: String },

    #[error("special field `{field}` of format `{format}` has no decoder{bug}", bug = BUG)]
    MissingSpecialDisassembler { format: String, field: String },

    #[error("floating-point directive .{directive} has no configured octet width{bug}", bug = BUG)]
    MissingFloatWidth { directive: String },

    #[error("directive .{directive} is not supported by this assembler")]
    UnsupportedDirective { directive: String },

    #[error("format `{format}` has no operand pattern{bug}", bug = BUG)]
    EmptyPattern { format: String },

    #[error("pattern `{pattern}` does not compile: {reason}{bug}", bug = BUG)]
    InvalidPattern { pattern: String, reason: String },
}

pub type IsaResult<T> = Result<T, IsaError>;
