//! 第一遍：词法与地址计算

use super::error::{LineError, LineFailure};
use super::{Assembler, Lexed, Section, SourceLine};
use crate::isa::{Directive, IsaError, IsaResult, collapse_escapes};

impl Assembler<'_> {
    /// 第一遍
    ///
    /// 返回已接受的行与完整的标签表。用户错误按行收集，
    /// 浮点伪指令缺少宽度等 ISA 定义错误立即中止。
    pub fn lex(&self, source: &str) -> IsaResult<Lexed> {
        let syntax = self.isa.syntax();
        let mut lexed = Lexed::default();
        let mut address = self.origin;
        let mut section = Section::Text;

        for (index, raw) in source.lines().enumerate() {
            let number = index + 1;
            let (label, rest) = syntax.split_label(syntax.strip_comment(raw));

            if let Some(label) = label
                && !lexed.labels.define(label, address)
            {
                tracing::warn!(line = number, label, "duplicate label, keeping the first definition");
            }
            if rest.is_empty() {
                continue;
            }

            match self.lex_line(rest, section) {
                Ok((size, next)) => {
                    address = address.wrapping_add(size as u64);
                    section = next;
                    lexed.lines.push(SourceLine {
                        number,
                        text: rest.to_string(),
                    });
                }
                Err(LineFailure::User(message)) => lexed.errors.push(LineError::new(number, message)),
                Err(LineFailure::Isa(err)) => return Err(err),
            }
        }

        tracing::debug!(
            lines = lexed.lines.len(),
            labels = lexed.labels.len(),
            errors = lexed.errors.len(),
            end = format_args!("0x{address:08x}"),
            "pass 1 complete"
        );
        Ok(lexed)
    }

    /// 返回 (本行占用的字节数, 之后所处的段)
    fn lex_line(&self, text: &str, section: Section) -> Result<(usize, Section), LineFailure> {
        if let Some((name, args)) = self.isa.syntax().split_directive(text) {
            if let Some(next) = self.section_switch(name) {
                // 带多余参数的段伪指令不切换段
                if !args.trim().is_empty() {
                    return Err(LineFailure::User(format!(
                        "Directive .{name} does not take any parameters"
                    )));
                }
                return Ok((0, next));
            }
            let Some(directive) = self.isa.directive(name) else {
                return Err(LineFailure::User(format!("Unrecognized directive .{name}")));
            };
            if section == Section::Text {
                return Err(LineFailure::User(format!(
                    "Directive .{name} is unsupported in the text section"
                )));
            }
            let size = self.data_size(name, directive, args)?;
            return Ok((size, section));
        }

        let keyword = text.split_whitespace().next().unwrap_or(text);
        match (self.isa.instruction_prefixing(text), section) {
            (Some(instruction), Section::Text) => Ok((instruction.bytes(), section)),
            (Some(_), Section::Data) => Err(LineFailure::User(format!(
                "Instruction {keyword} is in the data section"
            ))),
            (None, Section::Text) => Err(LineFailure::User(format!("Instruction {keyword} not found"))),
            (None, Section::Data) => Err(LineFailure::User(format!("Unrecognized keyword {keyword}"))),
        }
    }

    /// 数据伪指令占用的字节数
    ///
    /// 字符串先折叠转义再计长，与第二遍输出的字节数一致。
    fn data_size(&self, name: &str, directive: Directive, args: &str) -> Result<usize, LineFailure> {
        let syntax = self.isa.syntax();
        match directive {
            Directive::String | Directive::CString => {
                let body = self.string_body(args).ok_or_else(|| {
                    LineFailure::User(format!("Malformed string for directive .{name}"))
                })?;
                let terminator = usize::from(directive == Directive::CString);
                Ok(collapse_escapes(body).len() + terminator)
            }
            Directive::Scalar(bits) => {
                let count = syntax.data.find_iter(args).count();
                if count == 0 {
                    return Err(LineFailure::User(format!("No {bits}-bit values found")));
                }
                Ok(count * bits.div_ceil(8) as usize)
            }
            Directive::FloatingPoint => {
                let width = self.isa.float_width(name).ok_or_else(|| IsaError::MissingFloatWidth {
                    directive: name.to_string(),
                })?;
                let count = syntax.float.find_iter(args).count();
                if count == 0 {
                    return Err(LineFailure::User("No floating point values found".to_string()));
                }
                Ok(count * width)
            }
            Directive::FixedPoint => Err(IsaError::UnsupportedDirective {
                directive: name.to_string(),
            }
            .into()),
            Directive::Text | Directive::Data => Ok(0),
        }
    }

    /// 字符串伪指令引号之间的原文
    pub(super) fn string_body<'s>(&self, args: &'s str) -> Option<&'s str> {
        self.isa
            .syntax()
            .string
            .captures(args)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}
