//! 操作数编解码
//!
//! 汇编方向：把操作数文本按种类（寄存器、立即数、偏移、专用）转换成
//! 字段值，包括进制前缀、字符字面量、标签解析与补码范围检查。
//!
//! 解码方向：从指令字解包各字段，拆分字段按逻辑位重组，专用字段调用
//! 反向函数还原，非寄存器字段做符号扩展。

use std::collections::HashMap;

use thiserror::Error;

use crate::isa::{
    BitRange, Format, Instruction, InstructionSet, IsaError, IsaResult, ParamKind,
    collapse_escapes, fits, sign_ext,
};

/// 标签表：名称 -> 绝对地址
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: HashMap<String, u64>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 定义标签；重复定义时保留首次定义并返回 false
    pub fn define(&mut self, name: &str, address: u64) -> bool {
        if self.labels.contains_key(name) {
            return false;
        }
        self.labels.insert(name.to_string(), address);
        true
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// 用户程序中的操作数错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperandError {
    #[error("Register {0} does not exist")]
    UnknownRegister(String),
    #[error("Value {text} is out of range for a {bits}-bit field")]
    OutOfRange { text: String, bits: u32 },
    #[error("Could not resolve operand `{0}`")]
    Unresolved(String),
    #[error("{0}")]
    Special(String),
}

/// 单个字段编码失败：用户错误或 ISA 定义错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error(transparent)]
    Operand(#[from] OperandError),
    #[error(transparent)]
    Isa(#[from] IsaError),
}

/// 解析数字字面量
///
/// 支持 `0b`/`0o`/`0d`/`0x` 前缀与可选正负号。先按无符号解析，
/// 失败后按有符号解析并保留其补码位模式。
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match body.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("0b") => (2, &body[2..]),
        Some("0o") => (8, &body[2..]),
        Some("0d") => (10, &body[2..]),
        Some("0x") => (16, &body[2..]),
        _ => (10, body),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let literal = format!("{sign}{digits}");
    u64::from_str_radix(&literal, radix)
        .ok()
        .or_else(|| i64::from_str_radix(&literal, radix).ok().map(|v| v as u64))
}

/// 单个字符（可带转义）的码点
///
/// 转义规则与字符串伪指令相同：识别 `\n \0 \' \t \r \\ \"`，
/// 未识别的转义保留反斜杠，因而不再是单个字符。
pub fn char_value(body: &str) -> Option<u64> {
    let collapsed = String::from_utf8(collapse_escapes(body)).ok()?;
    let mut chars = collapsed.chars();
    let ch = chars.next()?;
    chars.next().is_none().then_some(ch as u64)
}

/// 解析 PC 相对偏移：标签取 `label - address`，否则按数字解析
///
/// 供专用字段编码函数使用。
pub fn resolve_offset(text: &str, address: u64, labels: &LabelTable) -> Option<u64> {
    let text = text.trim();
    match labels.get(text) {
        Some(target) => Some(target.wrapping_sub(address)),
        None => parse_number(text),
    }
}

/// 绑定到指令集与标签表的操作数编码器
pub struct OperandCodec<'a> {
    isa: &'a InstructionSet,
    labels: &'a LabelTable,
}

impl<'a> OperandCodec<'a> {
    pub fn new(isa: &'a InstructionSet, labels: &'a LabelTable) -> Self {
        Self { isa, labels }
    }

    /// 寄存器：ABI 名或数字寄存器，编号须能放进字段
    pub fn register(&self, text: &str, bits: u32) -> Result<u64, OperandError> {
        let text = text.trim();
        if let Some(index) = self.isa.abi_names().iter().position(|n| n == text) {
            return Ok(index as u64);
        }
        let number = self
            .isa
            .syntax()
            .register
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        match number {
            Some(n) if fits(n, bits, false) => Ok(n),
            _ => Err(OperandError::UnknownRegister(text.to_string())),
        }
    }

    /// 立即数：标签（绝对地址）> 字符字面量 > 数字
    pub fn immediate(&self, text: &str, bits: u32, signed: bool) -> Result<u64, OperandError> {
        let text = text.trim();
        let value = self
            .labels
            .get(text)
            .or_else(|| self.character(text))
            .or_else(|| parse_number(text))
            .ok_or_else(|| OperandError::Unresolved(text.to_string()))?;
        self.checked(text, value, bits, signed)
    }

    /// PC 相对偏移：标签取 `label - address`
    pub fn offset(&self, text: &str, address: u64, bits: u32, signed: bool) -> Result<u64, OperandError> {
        let text = text.trim();
        let value = self
            .labels
            .get(text)
            .map(|target| target.wrapping_sub(address))
            .or_else(|| self.character(text))
            .or_else(|| parse_number(text))
            .ok_or_else(|| OperandError::Unresolved(text.to_string()))?;
        self.checked(text, value, bits, signed)
    }

    /// 编码一个字段对应的操作数
    ///
    /// 专用字段交给格式提供的函数；缺少该函数属于 ISA 定义错误。
    pub fn encode_field(
        &self,
        format: &Format,
        range: &BitRange,
        text: &str,
        address: u64,
    ) -> Result<u64, FieldError> {
        let bits = range.logical_bits();
        let signed = range.sign_extended;
        let value = match range.kind {
            ParamKind::Register => self.register(text, bits)?,
            ParamKind::Immediate => self.immediate(text, bits, signed)?,
            ParamKind::Condition => self.immediate(text, bits, false)?,
            ParamKind::Offset => self.offset(text, address, bits, signed)?,
            ParamKind::Special => {
                let processor = format.processors.get(&range.field).ok_or_else(|| {
                    IsaError::MissingSpecialProcessor {
                        format: format.name.clone(),
                        field: range.field.clone(),
                    }
                })?;
                processor(text.trim(), address, bits, self.labels).map_err(OperandError::Special)?
            }
        };
        Ok(value)
    }

    fn character(&self, text: &str) -> Option<u64> {
        let caps = self.isa.syntax().character.captures(text)?;
        char_value(caps.get(1)?.as_str())
    }

    fn checked(&self, text: &str, value: u64, bits: u32, signed: bool) -> Result<u64, OperandError> {
        if fits(value, bits, signed) {
            Ok(value)
        } else {
            Err(OperandError::OutOfRange {
                text: text.to_string(),
                bits,
            })
        }
    }
}

/// 解包结果：原始字段值与处理后的操作数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unpacked {
    pub raw: Vec<u64>,
    pub arguments: Vec<u64>,
}

/// 按指令格式解包指令字
pub fn unpack(instruction: &Instruction, word: u64) -> IsaResult<Unpacked> {
    let format = &instruction.format;
    let count = format.parameter_count();
    let mut raw = vec![0u64; count];

    for range in &format.ranges {
        let Some(index) = range.parameter else { continue };
        if !range.applies_to(word) {
            continue;
        }
        raw[index] |= range.unpack(word);
    }

    let mut arguments = raw.clone();
    for (index, value) in arguments.iter_mut().enumerate() {
        let Some(range) = format.parameter_range(index, word) else { continue };
        if range.kind == ParamKind::Special {
            let disassembler = format.disassemblers.get(&range.field).ok_or_else(|| {
                IsaError::MissingSpecialDisassembler {
                    format: format.name.clone(),
                    field: range.field.clone(),
                }
            })?;
            *value = disassembler(*value);
        }
        let extend = range.sign_extended
            && !matches!(range.kind, ParamKind::Register | ParamKind::Condition);
        if extend {
            *value = sign_ext(*value, range.logical_bits());
        }
    }

    Ok(Unpacked { raw, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::rv32i;

    #[test]
    fn test_parse_number_radix() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x1F"), Some(0x1F));
        assert_eq!(parse_number("0X1f"), Some(0x1F));
        assert_eq!(parse_number("0b101"), Some(5));
        assert_eq!(parse_number("0o17"), Some(15));
        assert_eq!(parse_number("0d99"), Some(99));
        assert_eq!(parse_number("+7"), Some(7));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("--1"), None);
    }

    #[test]
    fn test_parse_number_negative_reinterprets() {
        assert_eq!(parse_number("-1"), Some(u64::MAX));
        assert_eq!(parse_number("-0x10"), Some((-16i64) as u64));
        assert_eq!(parse_number("-2048"), Some((-2048i64) as u64));
    }

    #[test]
    fn test_char_value() {
        assert_eq!(char_value("a"), Some(97));
        assert_eq!(char_value("\\n"), Some(10));
        assert_eq!(char_value("\\0"), Some(0));
        assert_eq!(char_value("\\'"), Some(39));
        assert_eq!(char_value("\\t"), Some(9));
        assert_eq!(char_value("\\\""), Some(34));
        assert_eq!(char_value("é"), Some(0xE9));
        // 未识别的转义与字符串一样保留反斜杠，不是单个字符
        assert_eq!(char_value("\\q"), None);
        assert_eq!(char_value("ab"), None);
    }

    #[test]
    fn test_register_operands() {
        let isa = rv32i::instruction_set().unwrap();
        let labels = LabelTable::new();
        let codec = OperandCodec::new(&isa, &labels);
        assert_eq!(codec.register("sp", 5), Ok(2));
        assert_eq!(codec.register("x31", 5), Ok(31));
        assert_eq!(codec.register(" a0 ", 5), Ok(10));
        assert!(matches!(codec.register("x32", 5), Err(OperandError::UnknownRegister(_))));
        assert!(matches!(codec.register("q1", 5), Err(OperandError::UnknownRegister(_))));
    }

    #[test]
    fn test_immediate_resolution_order() {
        let isa = rv32i::instruction_set().unwrap();
        let mut labels = LabelTable::new();
        labels.define("buffer", 0x40);
        let codec = OperandCodec::new(&isa, &labels);
        assert_eq!(codec.immediate("buffer", 12, true), Ok(0x40));
        assert_eq!(codec.immediate("'A'", 12, true), Ok(65));
        assert_eq!(codec.immediate("'\\n'", 12, true), Ok(10));
        assert_eq!(codec.immediate("-5", 12, true), Ok((-5i64) as u64));
        assert!(matches!(
            codec.immediate("nowhere", 12, true),
            Err(OperandError::Unresolved(_))
        ));
    }

    #[test]
    fn test_immediate_range_boundaries() {
        let isa = rv32i::instruction_set().unwrap();
        let labels = LabelTable::new();
        let codec = OperandCodec::new(&isa, &labels);
        assert!(codec.immediate("2047", 12, true).is_ok());
        assert!(codec.immediate("-2048", 12, true).is_ok());
        assert!(codec.immediate("2048", 12, true).is_err());
        assert!(codec.immediate("-2049", 12, true).is_err());
        // 无符号字段额外接受 [0, 2^N-1]
        assert!(codec.immediate("31", 5, false).is_ok());
        assert!(codec.immediate("32", 5, false).is_err());
    }

    #[test]
    fn test_offset_label_is_pc_relative() {
        let isa = rv32i::instruction_set().unwrap();
        let mut labels = LabelTable::new();
        labels.define("back", 0x10);
        labels.define("ahead", 0x30);
        let codec = OperandCodec::new(&isa, &labels);
        assert_eq!(codec.offset("ahead", 0x20, 13, true), Ok(0x10));
        assert_eq!(codec.offset("back", 0x20, 13, true), Ok((-16i64) as u64));
        assert_eq!(resolve_offset("back", 0x20, &labels), Some((-16i64) as u64));
        assert_eq!(resolve_offset("12", 0x20, &labels), Some(12));
    }

    #[test]
    fn test_label_first_definition_wins() {
        let mut labels = LabelTable::new();
        assert!(labels.define("loop", 4));
        assert!(!labels.define("loop", 8));
        assert_eq!(labels.get("loop"), Some(4));
        assert_eq!(labels.len(), 1);
    }
}
