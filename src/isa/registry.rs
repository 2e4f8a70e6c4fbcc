//! 指令集注册表
//!
//! 持有一个体系结构的全部格式与指令，按助记符、行前缀与指令字提供查询，
//! 并根据格式模板渲染反汇编文本。

use std::collections::HashMap;
use std::sync::Arc;

use super::bitfield::ParamKind;
use super::config::ConflictInfo;
use super::format::Format;
use super::instr_def::Instruction;
use super::syntax::{Directive, Endianness, Syntax};

/// 由首字节推断指令总字节数
pub type InstructionLength = fn(u8) -> usize;

pub struct InstructionSet {
    pub(crate) name: String,
    pub(crate) word_bits: Option<u32>,
    pub(crate) formats: Vec<Arc<Format>>,
    /// 按助记符长度降序排列
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) abi_names: Vec<String>,
    pub(crate) register_bits: u32,
    pub(crate) zero_register: Option<usize>,
    pub(crate) stack_pointer: Option<usize>,
    pub(crate) service_registers: Vec<usize>,
    pub(crate) endianness: Endianness,
    pub(crate) float_widths: HashMap<String, usize>,
    pub(crate) directives: HashMap<String, Directive>,
    pub(crate) syntax: Syntax,
    pub(crate) instruction_length: Option<InstructionLength>,
}

impl InstructionSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn word_bits(&self) -> Option<u32> {
        self.word_bits
    }

    pub fn formats(&self) -> &[Arc<Format>] {
        &self.formats
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn abi_names(&self) -> &[String] {
        &self.abi_names
    }

    pub fn register_count(&self) -> usize {
        self.abi_names.len()
    }

    pub fn register_bits(&self) -> u32 {
        self.register_bits
    }

    pub fn zero_register(&self) -> Option<usize> {
        self.zero_register
    }

    pub fn stack_pointer(&self) -> Option<usize> {
        self.stack_pointer
    }

    /// 环境调用时宿主读取的寄存器（服务号在前）
    pub fn service_registers(&self) -> &[usize] {
        &self.service_registers
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    pub fn directive(&self, name: &str) -> Option<Directive> {
        self.directives.get(name).copied()
    }

    /// 浮点伪指令的字节宽度
    pub fn float_width(&self, directive: &str) -> Option<usize> {
        self.float_widths.get(directive).copied()
    }

    /// 寄存器的 ABI 名，超出名表时回退为数字形式
    pub fn register_name(&self, index: usize) -> String {
        match self.abi_names.get(index) {
            Some(name) => name.clone(),
            None => format!("{}{}", self.syntax.register_prefix, index),
        }
    }

    /// 固定字长的字节数；变长指令集取最短指令
    pub fn word_bytes(&self) -> usize {
        match self.word_bits {
            Some(bits) => bits.div_ceil(8) as usize,
            None => self
                .instructions
                .iter()
                .map(Instruction::bytes)
                .min()
                .unwrap_or(1),
        }
    }

    /// 取指钩子：读到首字节后决定还需多少字节
    pub fn instruction_length(&self, first_byte: u8) -> usize {
        match self.instruction_length {
            Some(hook) => hook(first_byte).max(1),
            None => self.word_bytes(),
        }
    }

    /// 按助记符精确查找（不区分大小写）
    pub fn instruction(&self, mnemonic: &str) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|i| i.mnemonic.eq_ignore_ascii_case(mnemonic))
    }

    /// 查找作为该行前缀的最长助记符（不区分大小写）
    pub fn instruction_prefixing(&self, line: &str) -> Option<&Instruction> {
        let line = line.trim_start();
        self.instructions.iter().find(|i| {
            line.get(..i.mnemonic.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(&i.mnemonic))
        })
    }

    /// 按指令字线性查找，首个匹配者胜出
    pub fn decode_index(&self, word: u64) -> Option<usize> {
        self.instructions.iter().position(|i| i.matches(word))
    }

    pub fn instruction_matching(&self, word: u64) -> Option<&Instruction> {
        self.decode_index(word).map(|idx| &self.instructions[idx])
    }

    /// 渲染反汇编文本
    ///
    /// 寄存器参数用 ABI 名，其余以有符号十进制输出。
    pub fn disassemble(&self, instruction: &Instruction, word: u64, arguments: &[u64]) -> String {
        let format = &instruction.format;
        let mut out = String::with_capacity(format.disassembly.len() + 16);
        let mut rest = format.disassembly.as_str();
        while let Some(at) = rest.find('@') {
            out.push_str(&rest[..at]);
            rest = &rest[at + 1..];
            if let Some(tail) = rest.strip_prefix("mnem") {
                out.push_str(&instruction.mnemonic);
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("arg") {
                let digits = tail.len() - tail.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                match tail[..digits].parse::<usize>() {
                    Ok(index) => {
                        out.push_str(&self.render_argument(format, index, word, arguments));
                        rest = &tail[digits..];
                    }
                    Err(_) => out.push('@'),
                }
            } else {
                out.push('@');
            }
        }
        out.push_str(rest);
        out
    }

    fn render_argument(&self, format: &Format, index: usize, word: u64, arguments: &[u64]) -> String {
        let value = arguments.get(index).copied().unwrap_or(0);
        match format.parameter_range(index, word).map(|r| r.kind) {
            Some(ParamKind::Register) => self.register_name(value as usize),
            _ => (value as i64).to_string(),
        }
    }

    /// 检测可被同一指令字同时匹配的可用指令对
    pub fn detect_conflicts(&self) -> Vec<ConflictInfo> {
        let mut conflicts = Vec::new();
        let available: Vec<&Instruction> = self.instructions.iter().filter(|i| i.available).collect();
        for (i, a) in available.iter().enumerate() {
            for b in &available[i + 1..] {
                if a.conflicts_with(b) {
                    conflicts.push(ConflictInfo {
                        first: a.mnemonic.clone(),
                        second: b.mnemonic.clone(),
                        example_word: a.template() | (b.template() & !a.mask()),
                    });
                }
            }
        }
        conflicts
    }
}

impl std::fmt::Debug for InstructionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionSet")
            .field("name", &self.name)
            .field("formats", &self.formats.len())
            .field("instructions", &self.instructions.len())
            .field("registers", &self.abi_names.len())
            .field("endianness", &self.endianness)
            .finish()
    }
}
