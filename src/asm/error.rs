//! 汇编错误
//!
//! 用户程序的错误按行收集，一遍结束后统一报告；
//! ISA 定义错误则立即中止当前一遍。

use thiserror::Error;

use crate::isa::IsaError;

/// 单行错误（行号从 1 开始）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct LineError {
    pub line: usize,
    pub message: String,
}

impl LineError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// 汇编失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error(transparent)]
    Isa(#[from] IsaError),
    #[error("{} error(s) in source:\n{}", .0.len(), render(.0))]
    Source(Vec<LineError>),
}

impl AsmError {
    /// 用户错误列表；ISA 错误时为空
    pub fn line_errors(&self) -> &[LineError] {
        match self {
            AsmError::Source(errors) => errors,
            AsmError::Isa(_) => &[],
        }
    }
}

fn render(errors: &[LineError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// 处理单行时的失败：记录后继续，或中止整遍
#[derive(Debug)]
pub(crate) enum LineFailure {
    User(String),
    Isa(IsaError),
}

impl From<IsaError> for LineFailure {
    fn from(err: IsaError) -> Self {
        LineFailure::Isa(err)
    }
}

impl From<crate::codec::OperandError> for LineFailure {
    fn from(err: crate::codec::OperandError) -> Self {
        LineFailure::User(err.to_string())
    }
}

impl From<crate::codec::FieldError> for LineFailure {
    fn from(err: crate::codec::FieldError) -> Self {
        match err {
            crate::codec::FieldError::Operand(e) => e.into(),
            crate::codec::FieldError::Isa(e) => LineFailure::Isa(e),
        }
    }
}
