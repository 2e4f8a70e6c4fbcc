//! 两遍汇编器
//!
//! 第一遍（`lex`）去注释、记录标签地址、校验段伪指令并计算每行占用的
//! 字节数；第二遍（`assemble`）重新走一遍已接受的行，把操作数交给
//! 编解码器并按字节序输出机器码。
//!
//! 两遍都按行收集用户错误，ISA 定义错误则立即返回 `Err`。

mod encoder;
mod error;
mod lexer;

pub use error::{AsmError, LineError};

use crate::codec::LabelTable;
use crate::isa::{Directive, InstructionSet};

/// 第一遍接受的一行：去掉注释与标签后的文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 行号（从 1 开始）
    pub number: usize,
    pub text: String,
}

/// 第一遍的结果
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub lines: Vec<SourceLine>,
    pub labels: LabelTable,
    pub errors: Vec<LineError>,
}

/// 第二遍的结果
#[derive(Debug, Clone, Default)]
pub struct Assembled {
    pub machine_code: Vec<u8>,
    pub errors: Vec<LineError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Data,
}

/// 绑定到某个指令集的汇编器
///
/// # 示例
///
/// ```
/// use oak_sim::asm::Assembler;
/// use oak_sim::isa::rv32i;
///
/// let isa = rv32i::instruction_set().unwrap();
/// let code = Assembler::new(&isa).assemble_source("ADDI x1, x0, 5").unwrap();
/// assert_eq!(code, vec![0x93, 0x00, 0x50, 0x00]);
/// ```
pub struct Assembler<'a> {
    isa: &'a InstructionSet,
    origin: u64,
}

impl<'a> Assembler<'a> {
    pub fn new(isa: &'a InstructionSet) -> Self {
        Self { isa, origin: 0 }
    }

    /// 第一条语句的地址（标签与 PC 相对偏移都以此为基准）
    pub fn with_origin(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }

    pub fn isa(&self) -> &InstructionSet {
        self.isa
    }

    /// 两遍汇编，任一遍有用户错误即返回全部错误
    pub fn assemble_source(&self, source: &str) -> Result<Vec<u8>, AsmError> {
        let lexed = self.lex(source)?;
        if !lexed.errors.is_empty() {
            return Err(AsmError::Source(lexed.errors));
        }
        let assembled = self.assemble(&lexed)?;
        if !assembled.errors.is_empty() {
            return Err(AsmError::Source(assembled.errors));
        }
        Ok(assembled.machine_code)
    }

    /// 段切换伪指令
    fn section_switch(&self, name: &str) -> Option<Section> {
        match self.isa.directive(name) {
            Some(Directive::Text) => Some(Section::Text),
            Some(Directive::Data) => Some(Section::Data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests;
