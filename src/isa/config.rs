//! ISA 配置与冲突检测
//!
//! `IsaBuilder` 收集格式、指令与语法词汇，构建时统一校验，
//! 并对可能被同一指令字同时匹配的指令对给出告警。

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{IsaError, IsaResult};
use super::instr_def::Instruction;
use super::registry::{InstructionLength, InstructionSet};
use super::syntax::{Directive, Endianness, Keywords, Syntax};
use super::format::Format;

/// 冲突信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub first: String,
    pub second: String,
    /// 同时匹配两者的示例指令字
    pub example_word: u64,
}

impl std::fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "冲突: {} 与 {} (示例: 0x{:08X})",
            self.first, self.second, self.example_word
        )
    }
}

/// ISA 构建器
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use oak_sim::isa::{BitRange, Format, Instruction, IsaBuilder};
///
/// let nop = Arc::new(
///     Format::new("N", r"^\s*[A-Za-z]+\s*$", "@mnem", vec![BitRange::new("opcode", 0, 8)]).unwrap(),
/// );
/// let isa = IsaBuilder::new("toy")
///     .word_bits(8)
///     .abi_names(&["r0", "r1"])
///     .instruction(Instruction::new("NOP", &nop, &[("opcode", 0)], |core| {
///         core.advance();
///         Ok(())
///     }))
///     .build()
///     .expect("无冲突");
/// assert_eq!(isa.word_bytes(), 1);
/// ```
pub struct IsaBuilder {
    name: String,
    word_bits: Option<u32>,
    formats: Vec<Arc<Format>>,
    instructions: Vec<Instruction>,
    abi_names: Vec<String>,
    register_bits: u32,
    zero_register: Option<usize>,
    stack_pointer: Option<usize>,
    service_registers: Vec<usize>,
    endianness: Endianness,
    float_widths: HashMap<String, usize>,
    directives: HashMap<String, Directive>,
    keywords: Keywords,
    instruction_length: Option<InstructionLength>,
}

impl IsaBuilder {
    /// 默认带 `.text`/`.data` 两个段伪指令
    pub fn new(name: &str) -> Self {
        let directives = HashMap::from([
            ("text".to_string(), Directive::Text),
            ("data".to_string(), Directive::Data),
        ]);
        Self {
            name: name.to_string(),
            word_bits: None,
            formats: Vec::new(),
            instructions: Vec::new(),
            abi_names: Vec::new(),
            register_bits: 64,
            zero_register: None,
            stack_pointer: None,
            service_registers: Vec::new(),
            endianness: Endianness::Little,
            float_widths: HashMap::new(),
            directives,
            keywords: Keywords::default(),
            instruction_length: None,
        }
    }

    pub fn word_bits(mut self, bits: u32) -> Self {
        self.word_bits = Some(bits);
        self
    }

    pub fn abi_names(mut self, names: &[&str]) -> Self {
        self.abi_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn register_bits(mut self, bits: u32) -> Self {
        self.register_bits = bits;
        self
    }

    pub fn zero_register(mut self, index: usize) -> Self {
        self.zero_register = Some(index);
        self
    }

    /// 复位时该寄存器被设为内存顶端
    pub fn stack_pointer(mut self, index: usize) -> Self {
        self.stack_pointer = Some(index);
        self
    }

    pub fn service_registers(mut self, registers: &[usize]) -> Self {
        self.service_registers = registers.to_vec();
        self
    }

    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn directive(mut self, name: &str, directive: Directive) -> Self {
        self.directives.insert(name.to_string(), directive);
        self
    }

    /// 浮点伪指令的字节宽度
    pub fn float_width(mut self, directive: &str, octets: usize) -> Self {
        self.float_widths.insert(directive.to_string(), octets);
        self
    }

    pub fn instruction_length(mut self, hook: InstructionLength) -> Self {
        self.instruction_length = Some(hook);
        self
    }

    pub fn format(mut self, format: &Arc<Format>) -> Self {
        if !self.formats.iter().any(|f| Arc::ptr_eq(f, format)) {
            self.formats.push(Arc::clone(format));
        }
        self
    }

    pub fn instruction(mut self, instruction: Instruction) -> Self {
        let format = Arc::clone(&instruction.format);
        self = self.format(&format);
        self.instructions.push(instruction);
        self
    }

    pub fn instructions(self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        instructions.into_iter().fold(self, |b, i| b.instruction(i))
    }

    /// 校验并构建指令集
    pub fn build(self) -> IsaResult<InstructionSet> {
        for format in &self.formats {
            format.validate(self.word_bits)?;
        }
        for instruction in &self.instructions {
            for field in instruction.constants.keys() {
                if !instruction.format.has_field(field) {
                    return Err(IsaError::UnknownConstantField {
                        mnemonic: instruction.mnemonic.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let syntax = Syntax::from_keywords(&self.keywords).map_err(|e| IsaError::InvalidPattern {
            pattern: format!("{:?}", self.keywords),
            reason: e.to_string(),
        })?;

        let mut instructions = self.instructions;
        // 稳定排序：长助记符优先，同长度保持定义顺序
        instructions.sort_by(|a, b| b.mnemonic.len().cmp(&a.mnemonic.len()));

        let isa = InstructionSet {
            name: self.name,
            word_bits: self.word_bits,
            formats: self.formats,
            instructions,
            abi_names: self.abi_names,
            register_bits: self.register_bits,
            zero_register: self.zero_register,
            stack_pointer: self.stack_pointer,
            service_registers: self.service_registers,
            endianness: self.endianness,
            float_widths: self.float_widths,
            directives: self.directives,
            syntax,
            instruction_length: self.instruction_length,
        };

        for conflict in isa.detect_conflicts() {
            tracing::warn!(isa = %isa.name, "{conflict}");
        }
        tracing::debug!(
            isa = %isa.name,
            formats = isa.formats.len(),
            instructions = isa.instructions.len(),
            "instruction set built"
        );
        Ok(isa)
    }
}
